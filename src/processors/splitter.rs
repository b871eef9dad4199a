use crate::models::{DerivedObservation, DimLocationRow, DimTimeRow, FactWeatherRow, StarSchema};
use std::collections::{BTreeMap, HashMap};

/// Project derived rows into the star schema. Dimensions are distinct by key
/// and sorted; the first row seen for a key supplies its attributes. Facts
/// keep one row per input row.
pub fn split_star_schema(rows: &[DerivedObservation]) -> StarSchema {
    let mut times: BTreeMap<i64, DimTimeRow> = BTreeMap::new();
    let mut locations: HashMap<i64, DimLocationRow> = HashMap::new();
    let mut facts = Vec::with_capacity(rows.len());

    for row in rows {
        let time_id = row.time_key.get();
        let location_id = row.location_key.get();

        times
            .entry(time_id)
            .or_insert_with(|| DimTimeRow::from_datetime(&row.time));
        locations.entry(location_id).or_insert(DimLocationRow {
            location_id,
            latitude: row.latitude,
            longitude: row.longitude,
        });

        facts.push(FactWeatherRow {
            time_id,
            location_id,
            temperature_c: row.temperature_c,
            dewpoint_c: row.dewpoint_c,
            max_temp_c: row.max_temp_c,
            min_temp_c: row.min_temp_c,
            pressure_hpa: row.pressure_hpa,
            precipitation_mm: row.precipitation_mm,
            wind_speed_ms: row.wind_speed_ms,
            cloud_cover: row.cloud_cover,
            solar_radiation: row.solar_radiation,
        });
    }

    let mut dim_location: Vec<DimLocationRow> = locations.into_values().collect();
    dim_location.sort_by_key(|row| row.location_id);

    StarSchema {
        dim_time: times.into_values().collect(),
        dim_location,
        facts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JoinedObservation, RawMeasurements};
    use crate::processors::transform::derive_row;
    use chrono::NaiveDate;

    fn derived(hour: u32, minute: u32, lat: f64, lon: f64) -> DerivedObservation {
        derive_row(&JoinedObservation {
            time: NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(hour, minute, 0)
                .unwrap(),
            latitude: lat,
            longitude: lon,
            raw: RawMeasurements {
                t2m: 273.15,
                msl: 101_325.0,
                ..Default::default()
            },
        })
    }

    #[test]
    fn test_dimensions_are_distinct_and_sorted() {
        let rows = vec![
            derived(1, 0, 45.0, 70.0),
            derived(0, 0, 45.0, 70.25),
            derived(0, 0, 45.0, 70.0),
            derived(1, 0, 45.0, 70.25),
        ];
        let star = split_star_schema(&rows);

        assert_eq!(star.facts.len(), 4);
        assert_eq!(star.dim_time.len(), 2);
        assert_eq!(star.dim_location.len(), 2);
        assert_eq!(star.dim_time[0].time_id, 2024010100);
        assert_eq!(star.dim_time[1].time_id, 2024010101);
        assert!(star.dim_location[0].location_id < star.dim_location[1].location_id);
        assert_eq!(star.facts[0].time_id, 2024010101);
    }

    #[test]
    fn test_every_fact_key_has_a_dimension_row() {
        let rows: Vec<_> = (0..24)
            .flat_map(|h| [derived(h, 0, 45.0, 70.0), derived(h, 0, 45.25, 70.0)])
            .collect();
        let star = split_star_schema(&rows);

        for fact in &star.facts {
            assert!(star.dim_time.iter().any(|t| t.time_id == fact.time_id));
            assert!(star
                .dim_location
                .iter()
                .any(|l| l.location_id == fact.location_id));
        }
        assert_eq!(star.dim_time.len(), 24);
    }

    #[test]
    fn test_sub_hourly_time_row_keeps_first_occurrence() {
        let rows = vec![derived(6, 30, 45.0, 70.0), derived(6, 0, 45.0, 70.0)];
        let star = split_star_schema(&rows);

        assert_eq!(star.dim_time.len(), 1);
        assert_eq!(star.dim_time[0].formatted_timestamp(), "2024-01-01 06:30:00");
        assert_eq!(star.facts.len(), 2);
    }
}
