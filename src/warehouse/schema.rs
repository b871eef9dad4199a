//! ClickHouse DDL for the weather star schema.
//!
//! Column names and types here are what downstream readers depend on; the
//! row structs in `models::star` mirror them field for field.

pub const DIM_TIME_TABLE: &str = "dim_time";
pub const DIM_LOCATION_TABLE: &str = "dim_location";
pub const FACT_WEATHER_TABLE: &str = "fact_weather";
pub const WEATHER_FULL_VIEW: &str = "weather_full";

const DIM_TIME_COLUMNS: &str = r#"(
    time_id Int64,
    timestamp DateTime,
    year UInt16,
    month UInt8,
    day UInt8,
    hour UInt8,
    day_of_week UInt8,
    quarter UInt8
) ENGINE = ReplacingMergeTree()
ORDER BY time_id"#;

const DIM_LOCATION_COLUMNS: &str = r#"(
    location_id Int64,
    latitude Float64,
    longitude Float64
) ENGINE = ReplacingMergeTree()
ORDER BY location_id"#;

const FACT_WEATHER_COLUMNS: &str = r#"(
    time_id Int64,
    location_id Int64,
    temperature_c Float64,
    dewpoint_c Float64,
    max_temp_c Float64,
    min_temp_c Float64,
    pressure_hpa Float64,
    precipitation_mm Float32,
    wind_speed_ms Float64,
    cloud_cover Float32,
    solar_radiation Float32
) ENGINE = MergeTree()
ORDER BY (time_id, location_id)"#;

const WEATHER_FULL_SELECT: &str = r#"AS
SELECT
    f.*,
    t.timestamp, t.year, t.month, t.day, t.hour, t.day_of_week,
    l.latitude, l.longitude
FROM fact_weather f
JOIN dim_time t ON f.time_id = t.time_id
JOIN dim_location l ON f.location_id = l.location_id"#;

/// Feature projection consumed by model training. The target comes first;
/// the extreme temperatures are left out because they leak the target.
pub const ML_FEATURE_QUERY: &str = r#"
SELECT
    f.temperature_c,
    f.pressure_hpa,
    f.dewpoint_c,
    f.precipitation_mm,
    f.wind_speed_ms,
    f.cloud_cover,
    f.solar_radiation,
    l.latitude,
    l.longitude,
    t.month,
    t.hour,
    t.day_of_week
FROM fact_weather f
JOIN dim_time t ON f.time_id = t.time_id
JOIN dim_location l ON f.location_id = l.location_id
ORDER BY t.timestamp"#;

pub fn create_database(database: &str) -> String {
    format!("CREATE DATABASE IF NOT EXISTS {}", database)
}

/// Statements that drop the view and the three tables, view first.
pub fn drop_statements() -> Vec<String> {
    [
        WEATHER_FULL_VIEW,
        FACT_WEATHER_TABLE,
        DIM_TIME_TABLE,
        DIM_LOCATION_TABLE,
    ]
    .iter()
    .map(|name| format!("DROP TABLE IF EXISTS {}", name))
    .collect()
}

/// CREATE statements for the tables and the view. With `if_not_exists`
/// existing objects are left untouched.
pub fn create_statements(if_not_exists: bool) -> Vec<String> {
    let guard = if if_not_exists { "IF NOT EXISTS " } else { "" };
    vec![
        format!("CREATE TABLE {}{} {}", guard, DIM_TIME_TABLE, DIM_TIME_COLUMNS),
        format!(
            "CREATE TABLE {}{} {}",
            guard, DIM_LOCATION_TABLE, DIM_LOCATION_COLUMNS
        ),
        format!(
            "CREATE TABLE {}{} {}",
            guard, FACT_WEATHER_TABLE, FACT_WEATHER_COLUMNS
        ),
        format!(
            "CREATE VIEW {}{} {}",
            guard, WEATHER_FULL_VIEW, WEATHER_FULL_SELECT
        ),
    ]
}

/// Synchronous delete of every fact inside an inclusive TimeKey range.
pub fn delete_fact_window(lo: i64, hi: i64) -> String {
    format!(
        "ALTER TABLE {} DELETE WHERE time_id BETWEEN {} AND {} SETTINGS mutations_sync = 1",
        FACT_WEATHER_TABLE, lo, hi
    )
}

/// Rows the feature projection would return. Facts whose dimension rows are
/// missing fall out of the joins and are not counted.
pub fn count_feature_rows() -> String {
    format!("SELECT count() FROM ({})", ML_FEATURE_QUERY)
}

pub fn count_fact_window(lo: i64, hi: i64) -> String {
    format!(
        "SELECT count() FROM {} WHERE time_id BETWEEN {} AND {}",
        FACT_WEATHER_TABLE, lo, hi
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_order_starts_with_view() {
        let drops = drop_statements();
        assert_eq!(drops[0], "DROP TABLE IF EXISTS weather_full");
        assert_eq!(drops.len(), 4);
    }

    #[test]
    fn test_create_statements() {
        let strict = create_statements(false);
        assert!(strict[0].starts_with("CREATE TABLE dim_time ("));
        assert!(strict[2].contains("ORDER BY (time_id, location_id)"));
        assert!(strict[3].starts_with("CREATE VIEW weather_full AS"));

        let lenient = create_statements(true);
        assert!(lenient
            .iter()
            .all(|sql| sql.contains("IF NOT EXISTS")));
    }

    #[test]
    fn test_ml_columns_match_query_order() {
        let columns = [
            "temperature_c",
            "pressure_hpa",
            "dewpoint_c",
            "precipitation_mm",
            "wind_speed_ms",
            "cloud_cover",
            "solar_radiation",
            "latitude",
            "longitude",
            "month",
            "hour",
            "day_of_week",
        ];
        let mut last = 0;
        for column in columns {
            let pos = ML_FEATURE_QUERY
                .find(&format!(".{}", column))
                .unwrap_or_else(|| panic!("{} missing from query", column));
            assert!(pos > last, "{} out of order", column);
            last = pos;
        }
    }

    #[test]
    fn test_feature_count_wraps_projection() {
        let sql = count_feature_rows();
        assert!(sql.starts_with("SELECT count() FROM (\nSELECT\n    f.temperature_c"));
        assert!(sql.ends_with("ORDER BY t.timestamp)"));
    }

    #[test]
    fn test_delete_window_sql() {
        assert_eq!(
            delete_fact_window(2024010100, 2024010123),
            "ALTER TABLE fact_weather DELETE WHERE time_id BETWEEN 2024010100 AND 2024010123 \
             SETTINGS mutations_sync = 1"
        );
    }
}
