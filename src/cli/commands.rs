use crate::cli::args::{Cli, Commands, WindowArgs};
use crate::config::{FactWritePolicy, PipelineConfig, SchemaMode};
use crate::error::{ProcessingError, Result};
use crate::models::LoadWindow;
use crate::pipeline::{
    run_backfill, run_ingest, run_load, run_verify, LoadOptions, PipelineController,
};
use crate::readers::default_grid_source;
use crate::utils::filename::generate_default_report_filename;
use crate::warehouse::{ClickHouseWarehouse, MemoryWarehouse};
use crate::writers::ParquetWriter;
use chrono::Local;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

pub async fn run(cli: Cli) -> Result<()> {
    setup_logging(cli.verbose, cli.log_file.as_deref())?;

    let config = PipelineConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Ingest { window } => {
            let window = resolve_window(&config, &window)?;
            println!("Ingesting window {}", window);

            let source = default_grid_source()?;
            let outcome = run_ingest(&config, &window, source.as_ref(), true)?;

            if outcome.already_ingested {
                println!(
                    "{}",
                    status_line(true, &format!("Window {} already ingested, nothing to do", window))
                );
            } else {
                if outcome.extracted_files > 0 {
                    println!("Extracted {} file(s) from archive", outcome.extracted_files);
                }
                if let Some(report) = &outcome.normalize {
                    println!("{}", report.summary());
                    for (path, reason) in &report.failed {
                        println!("  failed: {} ({})", path.display(), reason);
                    }
                    let message = if report.has_failures() {
                        format!("{} raw file(s) could not be normalised", report.failed.len())
                    } else {
                        format!("Window {} ingested", window)
                    };
                    println!("{}", status_line(!report.has_failures(), &message));
                }
            }
        }

        Commands::Load {
            window,
            batch_size,
            schema_mode,
            fact_policy,
            dry_run,
            export_dir,
            report_json,
        } => {
            let config = apply_overrides(config, batch_size, schema_mode, fact_policy)?;
            let window = resolve_window(&config, &window)?;
            println!("Loading window {}", window);
            println!(
                "Schema mode: {}, fact policy: {}, batch size: {}",
                config.schema_mode, config.fact_policy, config.batch_size
            );

            let options = LoadOptions {
                export_dir,
                show_progress: true,
            };

            let report = if dry_run {
                let warehouse = MemoryWarehouse::new();
                let report = run_load(&config, window, warehouse.clone(), &options).await?;
                println!(
                    "Dry run: {} fact(s) would be stored in {}",
                    warehouse.fact_count(),
                    config.clickhouse.database
                );
                report
            } else {
                let warehouse = ClickHouseWarehouse::new(&config.clickhouse);
                run_load(&config, window, warehouse, &options).await?
            };

            println!("\n{}", report.summary());
            match report.join.as_ref().filter(|join| join.has_losses()) {
                Some(join) => println!(
                    "{}",
                    status_line(
                        false,
                        &format!(
                            "Inner join dropped {} row(s) across sources",
                            join.total_dropped()
                        )
                    )
                ),
                None => println!("{}", status_line(true, &format!("Window {} loaded", window))),
            }

            if let Some(path) = report_json {
                write_report(&report, path)?;
            }
        }

        Commands::Run { window } => {
            let mut shared: Vec<String> = Vec::new();
            if let Some(path) = &cli.config {
                shared.push("--config".to_string());
                shared.push(path.display().to_string());
            }
            if cli.verbose {
                shared.push("--verbose".to_string());
            }
            if let Some(path) = &cli.log_file {
                shared.push("--log-file".to_string());
                shared.push(path.display().to_string());
            }
            shared.extend(window.to_args());

            let controller = PipelineController::current()?.with_shared_args(shared);
            controller.run().await?;
            println!("{}", status_line(true, "Pipeline complete"));
        }

        Commands::Backfill {
            from,
            to,
            batch_size,
            schema_mode,
            fact_policy,
            dry_run,
            report_json,
        } => {
            let config = apply_overrides(config, batch_size, schema_mode, fact_policy)?;
            let windows = LoadWindow::months_between(
                LoadWindow::parse_month(&from)?,
                LoadWindow::parse_month(&to)?,
            )?;
            println!("Backfilling {} month(s) from {} to {}", windows.len(), from, to);

            let options = LoadOptions {
                export_dir: None,
                show_progress: true,
            };
            let report = if dry_run {
                run_backfill(&config, &windows, MemoryWarehouse::new(), &options).await?
            } else {
                let warehouse = ClickHouseWarehouse::new(&config.clickhouse);
                run_backfill(&config, &windows, warehouse, &options).await?
            };

            for loaded in &report.loaded {
                println!("{}", loaded.summary());
            }
            if report.missing.is_empty() {
                println!(
                    "{}",
                    status_line(true, &format!("Backfilled {} month(s)", report.loaded.len()))
                );
            } else {
                println!(
                    "{}",
                    status_line(
                        false,
                        &format!("Skipped (no data): {}", report.missing.join(", "))
                    )
                );
            }

            if let Some(path) = report_json {
                write_report(&report, path)?;
            }
        }

        Commands::Verify { window } => {
            let window = resolve_window(&config, &window)?;
            println!("Verifying window {}", window);

            let warehouse = ClickHouseWarehouse::new(&config.clickhouse);
            let report = run_verify(&config, &window, &warehouse).await?;
            println!(
                "Expected {} fact(s), warehouse holds {}",
                report.expected_facts, report.warehouse_facts
            );

            if report.orphan_facts() > 0 {
                println!(
                    "{}",
                    status_line(
                        false,
                        &format!(
                            "{} fact(s) have no dimension rows and are missing from the feature query",
                            report.orphan_facts()
                        )
                    )
                );
            }
            if report.is_complete() {
                println!(
                    "{}",
                    status_line(true, &format!("Window {} is complete", window))
                );
            } else {
                return Err(ProcessingError::Warehouse(format!(
                    "window {} holds {} fact(s), expected {}",
                    window, report.warehouse_facts, report.expected_facts
                )));
            }
        }

        Commands::Info { file } => {
            println!("Analyzing Parquet file: {}", file.display());
            let info = ParquetWriter::new().get_file_info(&file)?;
            println!("\n{}", info.summary());
        }
    }

    Ok(())
}

/// Console logging on stderr, plus an append-only plain-text copy when a
/// log file is given.
pub fn setup_logging(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    let console_layer = fmt::layer()
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(level)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| ProcessingError::Config(format!("Failed to initialise logging: {}", e)))
}

fn resolve_window(config: &PipelineConfig, args: &WindowArgs) -> Result<LoadWindow> {
    if let Some(date) = args.date {
        return Ok(LoadWindow::daily(date));
    }
    if let Some(month) = &args.month {
        return LoadWindow::parse_month(month);
    }
    config.resolve_window(Local::now().date_naive())
}

fn apply_overrides(
    mut config: PipelineConfig,
    batch_size: Option<usize>,
    schema_mode: Option<SchemaMode>,
    fact_policy: Option<FactWritePolicy>,
) -> Result<PipelineConfig> {
    if let Some(size) = batch_size {
        config.batch_size = size;
    }
    if let Some(mode) = schema_mode {
        config.schema_mode = mode;
    }
    if let Some(policy) = fact_policy {
        config.fact_policy = policy;
    }
    config.revalidate()?;

    if config.schema_mode == SchemaMode::Recreate {
        warn!("Schema mode 'recreate' drops all existing warehouse tables before loading");
    }
    Ok(config)
}

/// Final line of a command's console summary.
fn status_line(ok: bool, message: &str) -> String {
    if ok {
        format!("✅ {}", message)
    } else {
        format!("⚠️  {}", message)
    }
}

fn write_report<T: Serialize>(report: &T, path: Option<PathBuf>) -> Result<()> {
    let path = path.unwrap_or_else(generate_default_report_filename);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = fs::File::create(&path)?;
    serde_json::to_writer_pretty(file, report)?;
    info!(path = %path.display(), "Wrote load report");
    println!("Report written to {}", path.display());
    Ok(())
}
