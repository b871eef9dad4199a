//! Pipeline settings.
//!
//! One [`PipelineConfig`] drives every stage. It is assembled from built-in
//! defaults, an optional TOML file and `ERA5_WAREHOUSE__*` environment
//! variables, in that order of precedence, then validated.

use crate::error::{ProcessingError, Result};
use crate::models::{LoadWindow, WindowKind};
use crate::utils::constants::{
    COMPRESSION_GZIP, COMPRESSION_LZ4, COMPRESSION_NONE, COMPRESSION_SNAPPY, COMPRESSION_ZSTD,
    DEFAULT_BATCH_SIZE, DEFAULT_CLICKHOUSE_URL, DEFAULT_CLICKHOUSE_USER, DEFAULT_CONFIG_FILE,
    DEFAULT_DATABASE, DEFAULT_DATA_DIR, DEFAULT_LAG_DAYS, ENV_PREFIX,
};
use chrono::{Datelike, NaiveDate};
use clap::ValueEnum;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;
use validator::{Validate, ValidationError};

/// What schema setup does before a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum SchemaMode {
    /// Drop the view and tables, then create them again. Destroys history.
    #[default]
    Recreate,
    /// Create only what is missing.
    Ensure,
}

/// How facts already stored for the window are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum FactWritePolicy {
    /// Delete the window's facts before inserting, so reloads are idempotent.
    #[default]
    ReplaceWindow,
    /// Insert on top of whatever is there. Reloading duplicates facts.
    Append,
}

impl fmt::Display for SchemaMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaMode::Recreate => write!(f, "recreate"),
            SchemaMode::Ensure => write!(f, "ensure"),
        }
    }
}

impl fmt::Display for FactWritePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactWritePolicy::ReplaceWindow => write!(f, "replace_window"),
            FactWritePolicy::Append => write!(f, "append"),
        }
    }
}

/// Which star-schema tables a load writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableSet {
    pub dim_time: bool,
    pub dim_location: bool,
    pub fact_weather: bool,
}

impl TableSet {
    pub fn all() -> Self {
        Self {
            dim_time: true,
            dim_location: true,
            fact_weather: true,
        }
    }

    pub fn facts_only() -> Self {
        Self {
            dim_time: false,
            dim_location: false,
            fact_weather: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.dim_time || self.dim_location || self.fact_weather)
    }
}

impl Default for TableSet {
    fn default() -> Self {
        Self::all()
    }
}

/// Explicit window selection; overrides `lag_days`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSetting {
    pub kind: WindowKind,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ClickHouseSettings {
    #[validate(length(min = 1))]
    pub url: String,
    pub user: String,
    pub password: String,
    #[validate(length(min = 1, message = "database name must not be empty"))]
    pub database: String,
}

impl Default for ClickHouseSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_CLICKHOUSE_URL.to_string(),
            user: DEFAULT_CLICKHOUSE_USER.to_string(),
            password: String::new(),
            database: DEFAULT_DATABASE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PipelineConfig {
    pub data_dir: PathBuf,
    pub window: Option<WindowSetting>,
    #[validate(range(max = 60))]
    pub lag_days: u32,
    #[validate(range(min = 1))]
    pub batch_size: usize,
    #[validate(range(min = 1))]
    pub max_workers: usize,
    pub tables: TableSet,
    pub schema_mode: SchemaMode,
    pub fact_policy: FactWritePolicy,
    pub lock_dir: Option<PathBuf>,
    #[validate(nested)]
    pub clickhouse: ClickHouseSettings,
    #[validate(custom(function = "validate_compression"))]
    pub compression: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            window: None,
            lag_days: DEFAULT_LAG_DAYS,
            batch_size: DEFAULT_BATCH_SIZE,
            max_workers: num_cpus::get(),
            tables: TableSet::all(),
            schema_mode: SchemaMode::default(),
            fact_policy: FactWritePolicy::default(),
            lock_dir: None,
            clickhouse: ClickHouseSettings::default(),
            compression: COMPRESSION_SNAPPY.to_string(),
        }
    }
}

impl PipelineConfig {
    /// Layer defaults, the TOML file and the environment. An explicitly
    /// named file must exist; the default one is optional.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let (path, required) = match file {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };
        debug!(file = %path.display(), required, "Loading configuration");

        let settings = Config::builder()
            .add_source(Config::try_from(&PipelineConfig::default())?)
            .add_source(File::from(path).required(required))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: PipelineConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// The window a run processes: the configured one, or `lag_days`
    /// before `today`.
    pub fn resolve_window(&self, today: NaiveDate) -> Result<LoadWindow> {
        match self.window {
            Some(WindowSetting {
                kind: WindowKind::Daily,
                date,
            }) => Ok(LoadWindow::daily(date)),
            Some(WindowSetting {
                kind: WindowKind::Monthly,
                date,
            }) => LoadWindow::monthly(date.year(), date.month()),
            None => Ok(LoadWindow::lagged(today, self.lag_days)),
        }
    }

    pub fn lock_dir(&self) -> PathBuf {
        self.lock_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join(".locks"))
    }

    /// Re-check after command-line overrides have been applied.
    pub fn revalidate(&self) -> Result<()> {
        self.validate()?;
        if self.tables.is_empty() {
            return Err(ProcessingError::Config(
                "at least one table must be selected".to_string(),
            ));
        }
        Ok(())
    }
}

fn validate_compression(value: &str) -> std::result::Result<(), ValidationError> {
    match value.to_lowercase().as_str() {
        COMPRESSION_SNAPPY | COMPRESSION_GZIP | COMPRESSION_LZ4 | COMPRESSION_ZSTD
        | COMPRESSION_NONE => Ok(()),
        _ => Err(ValidationError::new("unsupported_compression")),
    }
}
