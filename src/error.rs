use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProcessingError>;

#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("ClickHouse error: {0}")]
    ClickHouse(#[from] clickhouse::error::Error),

    #[error("Zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[cfg(feature = "netcdf")]
    #[error("NetCDF error: {0}")]
    NetCdf(#[from] netcdf::Error),

    #[error("Data merge error: {0}")]
    DataMerge(String),

    #[error("Missing required data: {0}")]
    MissingData(String),

    #[error("Invalid data format in {path}: {reason}")]
    InvalidFormat { path: PathBuf, reason: String },

    #[error("Schema setup failed at '{statement}': {reason}")]
    SchemaSetup { statement: String, reason: String },

    #[error(
        "Load of {table} stopped after {committed_batches} committed batch(es) \
         ({committed_rows} rows): {source}"
    )]
    PartialLoad {
        table: String,
        committed_batches: usize,
        committed_rows: usize,
        #[source]
        source: Box<ProcessingError>,
    },

    #[error("Warehouse write rejected: {0}")]
    Warehouse(String),

    #[error("A load for window {window} is already running (lock file {lock})")]
    LoadInProgress { window: String, lock: PathBuf },

    #[error("Pipeline stage '{stage}' failed with exit code {code:?}")]
    StageFailed { stage: String, code: Option<i32> },

    #[error("Async task error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl ProcessingError {
    pub fn invalid_format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        ProcessingError::InvalidFormat {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
