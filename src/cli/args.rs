use crate::config::{FactWritePolicy, SchemaMode};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "era5-warehouse")]
#[command(about = "ERA5 reanalysis ETL into a ClickHouse star schema")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Log file path (appended)")]
    pub log_file: Option<PathBuf>,

    #[arg(
        short,
        long,
        global = true,
        help = "Configuration file [default: era5-warehouse.toml if present]"
    )]
    pub config: Option<PathBuf>,
}

/// Which window a command works on. Without either flag the configured
/// window, or `lag_days` before today, is used.
#[derive(Args, Debug, Clone, Default)]
pub struct WindowArgs {
    #[arg(long, help = "Daily window (YYYY-MM-DD)", conflicts_with = "month")]
    pub date: Option<NaiveDate>,

    #[arg(long, help = "Monthly window (YYYY-MM)")]
    pub month: Option<String>,
}

impl WindowArgs {
    /// The same selection as command-line arguments for a child stage.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(date) = self.date {
            args.push("--date".to_string());
            args.push(date.format("%Y-%m-%d").to_string());
        }
        if let Some(month) = &self.month {
            args.push("--month".to_string());
            args.push(month.clone());
        }
        args
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Unpack and normalise the raw files of a window into Parquet
    Ingest {
        #[command(flatten)]
        window: WindowArgs,
    },

    /// Build the star schema for a window and load it into the warehouse
    Load {
        #[command(flatten)]
        window: WindowArgs,

        #[arg(long, help = "Facts per insert batch")]
        batch_size: Option<usize>,

        #[arg(long, value_enum)]
        schema_mode: Option<SchemaMode>,

        #[arg(long, value_enum)]
        fact_policy: Option<FactWritePolicy>,

        #[arg(long, help = "Load into an in-memory warehouse instead of ClickHouse")]
        dry_run: bool,

        #[arg(long, help = "Also write the star tables as Parquet into this directory")]
        export_dir: Option<PathBuf>,

        #[arg(
            long,
            num_args = 0..=1,
            help = "Write the load report as JSON [default: output/era5-load-{YYMMDD}.json]"
        )]
        report_json: Option<Option<PathBuf>>,
    },

    /// Run ingest then load as child processes
    Run {
        #[command(flatten)]
        window: WindowArgs,
    },

    /// Load every month in a range, skipping months with no data directory
    Backfill {
        #[arg(long, help = "First month (YYYY-MM)")]
        from: String,

        #[arg(long, help = "Last month (YYYY-MM)")]
        to: String,

        #[arg(long)]
        batch_size: Option<usize>,

        #[arg(long, value_enum)]
        schema_mode: Option<SchemaMode>,

        #[arg(long, value_enum)]
        fact_policy: Option<FactWritePolicy>,

        #[arg(long)]
        dry_run: bool,

        #[arg(long, num_args = 0..=1)]
        report_json: Option<Option<PathBuf>>,
    },

    /// Compare the warehouse fact count for a window with the local inputs
    Verify {
        #[command(flatten)]
        window: WindowArgs,
    },

    /// Display information about a Parquet file
    Info {
        #[arg(short, long)]
        file: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_flags() {
        let cli = Cli::parse_from([
            "era5-warehouse",
            "load",
            "--date",
            "2024-01-01",
            "--schema-mode",
            "ensure",
            "--fact-policy",
            "append",
            "--report-json",
        ]);
        match cli.command {
            Commands::Load {
                window,
                schema_mode,
                fact_policy,
                report_json,
                ..
            } => {
                assert_eq!(window.date, NaiveDate::from_ymd_opt(2024, 1, 1));
                assert_eq!(schema_mode, Some(SchemaMode::Ensure));
                assert_eq!(fact_policy, Some(FactWritePolicy::Append));
                assert_eq!(report_json, Some(None));
            }
            _ => panic!("expected load"),
        }
    }

    #[test]
    fn test_date_and_month_conflict() {
        assert!(Cli::try_parse_from([
            "era5-warehouse",
            "ingest",
            "--date",
            "2024-01-01",
            "--month",
            "2024-01"
        ])
        .is_err());
    }

    #[test]
    fn test_window_args_forwarded() {
        let window = WindowArgs {
            date: NaiveDate::from_ymd_opt(2024, 3, 9),
            month: None,
        };
        assert_eq!(window.to_args(), vec!["--date", "2024-03-09"]);
    }
}
