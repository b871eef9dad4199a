/// Canonical key column names in normalised tables
pub const TIME_COLUMN: &str = "time";
pub const LATITUDE_COLUMN: &str = "latitude";
pub const LONGITUDE_COLUMN: &str = "longitude";

/// Raw NetCDF names handled by the normaliser
pub const RAW_TIME_COLUMN: &str = "valid_time";
pub const EXPVER_DIM: &str = "expver";
pub const ENSEMBLE_DIM: &str = "number";
/// ERA5 final release, preferred over the preliminary ERA5T release
pub const EXPVER_FINAL: i32 = 1;
pub const EXPVER_PRELIMINARY: i32 = 5;

/// File extensions and names
pub const RAW_EXTENSION: &str = "nc";
pub const NORMALISED_EXTENSION: &str = "parquet";
pub const DOWNLOAD_ARCHIVE: &str = "daily_data.zip";
pub const INSTANT_FILE: &str = "data_stream-oper_stepType-instant.parquet";
pub const ACCUM_FILE: &str = "data_stream-oper_stepType-accum.parquet";
pub const AVG_FILE: &str = "data_stream-oper_stepType-avg.parquet";
pub const MAX_FILE: &str = "data_stream-oper_stepType-max.parquet";

/// ERA5 short variable names
pub const VAR_T2M: &str = "t2m";
pub const VAR_D2M: &str = "d2m";
pub const VAR_MX2T: &str = "mx2t";
pub const VAR_MN2T: &str = "mn2t";
pub const VAR_MSL: &str = "msl";
pub const VAR_TP: &str = "tp";
pub const VAR_U10: &str = "u10";
pub const VAR_V10: &str = "v10";
pub const VAR_TCC: &str = "tcc";
pub const VAR_SSRD: &str = "avg_sdswrf";

/// Unit conversion
pub const KELVIN_OFFSET: f64 = 273.15;
pub const PA_PER_HPA: f64 = 100.0;
pub const MM_PER_M: f64 = 1000.0;

/// Physical plausibility bounds used by the integrity checker
pub const MIN_VALID_TEMP_C: f64 = -90.0;
pub const MAX_VALID_TEMP_C: f64 = 60.0;
pub const MIN_VALID_PRESSURE_HPA: f64 = 850.0;
pub const MAX_VALID_PRESSURE_HPA: f64 = 1090.0;

/// Processing defaults
pub const DEFAULT_BATCH_SIZE: usize = 50_000;
pub const DEFAULT_ROW_GROUP_SIZE: usize = 100_000;
pub const DEFAULT_LAG_DAYS: u32 = 5;
pub const DEFAULT_DATA_DIR: &str = "raw_data";
pub const DEFAULT_CONFIG_FILE: &str = "era5-warehouse.toml";
pub const ENV_PREFIX: &str = "ERA5_WAREHOUSE";

/// Warehouse defaults
pub const DEFAULT_CLICKHOUSE_URL: &str = "http://localhost:8123";
pub const DEFAULT_CLICKHOUSE_USER: &str = "default";
pub const DEFAULT_DATABASE: &str = "weather_db";

/// Parquet compression options
pub const COMPRESSION_SNAPPY: &str = "snappy";
pub const COMPRESSION_GZIP: &str = "gzip";
pub const COMPRESSION_LZ4: &str = "lz4";
pub const COMPRESSION_ZSTD: &str = "zstd";
pub const COMPRESSION_NONE: &str = "none";
