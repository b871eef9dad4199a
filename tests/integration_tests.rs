use chrono::{Duration, NaiveDate, NaiveDateTime};
use era5_warehouse::config::{FactWritePolicy, PipelineConfig, SchemaMode};
use era5_warehouse::models::{
    CoordinateValues, GridDataset, GridTable, GridVariable, LoadWindow, SourceKind,
};
use era5_warehouse::pipeline::{run_backfill, run_ingest, run_load, run_verify, LoadOptions};
use era5_warehouse::readers::GridSource;
use era5_warehouse::utils::constants::{
    DOWNLOAD_ARCHIVE, EXPVER_DIM, LATITUDE_COLUMN, LONGITUDE_COLUMN, RAW_TIME_COLUMN,
};
use era5_warehouse::utils::filename::window_dir;
use era5_warehouse::warehouse::{LoadLock, MemoryWarehouse};
use era5_warehouse::writers::ParquetWriter;
use era5_warehouse::ProcessingError;
use pretty_assertions::assert_eq;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn hour(date: NaiveDate, h: i64) -> NaiveDateTime {
    date.and_hms_opt(0, 0, 0).unwrap() + Duration::hours(h)
}

fn variables_for(kind: SourceKind) -> &'static [(&'static str, f64)] {
    match kind {
        SourceKind::Instant => &[
            ("t2m", 273.15),
            ("d2m", 270.15),
            ("msl", 101325.0),
            ("u10", 3.0),
            ("v10", 4.0),
            ("tcc", 0.5),
        ],
        SourceKind::Accumulated => &[("tp", 0.001)],
        SourceKind::Averaged => &[("avg_sdswrf", 120.0)],
        SourceKind::Maximum => &[("mx2t", 275.15), ("mn2t", 271.15)],
    }
}

/// Write the four normalised sources for `window`, one row per
/// (hour, latitude, longitude). `skip_accum` leaves that many trailing rows
/// out of the accumulated source.
fn write_window(
    data_dir: &Path,
    window: &LoadWindow,
    hours: i64,
    cells: &[(f64, f64)],
    skip_accum: usize,
) {
    let dir = window_dir(data_dir, window);
    fs::create_dir_all(&dir).unwrap();
    let writer = ParquetWriter::new();

    for kind in SourceKind::ALL {
        let mut table = GridTable::new();
        for h in 0..hours {
            for (lat, lon) in cells {
                table
                    .push_row(hour(window.start(), h), *lat, *lon, variables_for(kind))
                    .unwrap();
            }
        }
        if kind == SourceKind::Accumulated && skip_accum > 0 {
            let keep = table.len() - skip_accum;
            table.times.truncate(keep);
            table.latitudes.truncate(keep);
            table.longitudes.truncate(keep);
            for column in table.variables.values_mut() {
                column.truncate(keep);
            }
        }
        writer
            .write_grid_table(&table, &dir.join(kind.file_name()))
            .unwrap();
    }
}

fn config(dir: &TempDir) -> PipelineConfig {
    PipelineConfig {
        data_dir: dir.path().to_path_buf(),
        max_workers: 2,
        ..Default::default()
    }
}

fn day() -> LoadWindow {
    LoadWindow::daily(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
}

const GRID: [(f64, f64); 2] = [(45.0, 70.0), (45.25, 70.0)];

fn raw_name(kind: SourceKind) -> PathBuf {
    Path::new(kind.file_name()).with_extension("nc")
}

/// Serves a two-hour grid over `GRID` for each raw step-type file. The
/// instant file carries an `expver` axis whose final version is missing
/// the second hour.
struct FixtureGrids;

impl GridSource for FixtureGrids {
    fn read_dataset(&self, path: &Path) -> era5_warehouse::Result<GridDataset> {
        let kind = SourceKind::ALL
            .into_iter()
            .find(|kind| path.file_name() == Some(raw_name(*kind).as_os_str()))
            .ok_or_else(|| {
                ProcessingError::MissingData(format!("no fixture for {}", path.display()))
            })?;

        let grid = [RAW_TIME_COLUMN, LATITUDE_COLUMN, LONGITUDE_COLUMN];
        let mut dataset = GridDataset::new()
            .with_coord(
                RAW_TIME_COLUMN,
                CoordinateValues::Time(vec![hour(day().start(), 0), hour(day().start(), 1)]),
            )
            .with_coord(LATITUDE_COLUMN, CoordinateValues::Numeric(vec![45.0, 45.25]))
            .with_coord(LONGITUDE_COLUMN, CoordinateValues::Numeric(vec![70.0]));

        for (name, value) in variables_for(kind) {
            if *name == "t2m" {
                continue;
            }
            dataset = dataset.with_variable(GridVariable::new(*name, &grid, vec![*value; 4]));
        }
        if kind == SourceKind::Instant {
            // (time, expver, latitude, longitude) with expver = [final, preliminary]
            dataset = dataset
                .with_coord(EXPVER_DIM, CoordinateValues::Numeric(vec![1.0, 5.0]))
                .with_variable(GridVariable::new(
                    "t2m",
                    &[RAW_TIME_COLUMN, EXPVER_DIM, LATITUDE_COLUMN, LONGITUDE_COLUMN],
                    vec![
                        273.15,
                        274.15,
                        999.0,
                        999.0,
                        f64::NAN,
                        f64::NAN,
                        275.15,
                        276.15,
                    ],
                ));
        }
        Ok(dataset)
    }
}

fn write_download_archive(dir: &Path) {
    let mut zip = zip::ZipWriter::new(File::create(dir.join(DOWNLOAD_ARCHIVE)).unwrap());
    let options = zip::write::FileOptions::default();
    for kind in SourceKind::ALL {
        zip.start_file(raw_name(kind).to_string_lossy(), options)
            .unwrap();
        zip.write_all(b"CDF").unwrap();
    }
    zip.finish().unwrap();
}

#[tokio::test]
async fn test_end_to_end_single_cell() {
    let dir = TempDir::new().unwrap();
    write_window(dir.path(), &day(), 1, &[(45.0, 70.0)], 0);

    let warehouse = MemoryWarehouse::new();
    let report = run_load(&config(&dir), day(), warehouse.clone(), &LoadOptions::default())
        .await
        .unwrap();

    assert_eq!(report.fact_rows, 1);
    assert_eq!(report.dim_time_rows, 1);
    assert_eq!(report.dim_location_rows, 1);
    assert!(report.schema_prepared);
    assert!(warehouse.database_created());

    let times = warehouse.dim_time();
    assert_eq!(times.len(), 1);
    let t = &times[0];
    assert_eq!(t.time_id, 2024010100);
    assert_eq!((t.year, t.month, t.day, t.hour), (2024, 1, 1, 0));
    assert_eq!(t.quarter, 1);
    assert_eq!(t.day_of_week, 1);
    assert_eq!(t.formatted_timestamp(), "2024-01-01 00:00:00");

    let locations = warehouse.dim_location();
    assert_eq!(locations.len(), 1);
    assert_eq!((locations[0].latitude, locations[0].longitude), (45.0, 70.0));

    let facts = warehouse.facts();
    assert_eq!(facts.len(), 1);
    let f = &facts[0];
    assert_eq!(f.time_id, 2024010100);
    assert_eq!(f.location_id, locations[0].location_id);
    assert_eq!(f.temperature_c, 0.0);
    assert_eq!(f.dewpoint_c, -3.0);
    assert_eq!(f.max_temp_c, 2.0);
    assert_eq!(f.min_temp_c, -2.0);
    assert_eq!(f.pressure_hpa, 1013.25);
    assert_eq!(f.precipitation_mm, 1.0);
    assert_eq!(f.wind_speed_ms, 5.0);
    assert_eq!(f.cloud_cover, 0.5);
    assert_eq!(f.solar_radiation, 120.0);
}

#[tokio::test]
async fn test_ingested_download_loads_into_warehouse() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let window_path = window_dir(dir.path(), &day());
    fs::create_dir_all(&window_path).unwrap();
    write_download_archive(&window_path);

    let outcome = run_ingest(&config, &day(), &FixtureGrids, false).unwrap();
    assert_eq!(outcome.extracted_files, 4);
    let normalize = outcome.normalize.unwrap();
    assert_eq!(normalize.converted.len(), 4);
    assert_eq!(normalize.rows_written, 16);
    assert!(!normalize.has_failures());
    assert!(!window_path.join(DOWNLOAD_ARCHIVE).exists());
    for kind in SourceKind::ALL {
        assert!(!window_path.join(raw_name(kind)).exists());
        assert!(window_path.join(kind.file_name()).exists());
    }

    let warehouse = MemoryWarehouse::new();
    let report = run_load(&config, day(), warehouse.clone(), &LoadOptions::default())
        .await
        .unwrap();
    assert_eq!(report.fact_rows, 4);
    assert_eq!(report.dim_time_rows, 2);
    assert_eq!(report.dim_location_rows, 2);
    assert!(!report.join.as_ref().unwrap().has_losses());

    let location_of = |lat: f64| {
        warehouse
            .dim_location()
            .iter()
            .find(|l| l.latitude == lat)
            .map(|l| l.location_id)
            .unwrap()
    };
    let temperature = |time_id: i64, lat: f64| {
        warehouse
            .facts()
            .iter()
            .find(|f| f.time_id == time_id && f.location_id == location_of(lat))
            .map(|f| f.temperature_c)
            .unwrap()
    };
    // Final version where present, preliminary where the final one is NaN
    assert_eq!(temperature(2024010100, 45.0), 0.0);
    assert_eq!(temperature(2024010100, 45.25), 1.0);
    assert_eq!(temperature(2024010101, 45.0), 2.0);
    assert_eq!(temperature(2024010101, 45.25), 3.0);

    for fact in warehouse.facts() {
        assert_eq!(fact.dewpoint_c, -3.0);
        assert_eq!(fact.pressure_hpa, 1013.25);
        assert_eq!(fact.precipitation_mm, 1.0);
        assert_eq!(fact.wind_speed_ms, 5.0);
        assert_eq!(fact.solar_radiation, 120.0);
    }

    let verify = run_verify(&config, &day(), &warehouse).await.unwrap();
    assert!(verify.is_complete());
    assert_eq!(verify.orphan_facts(), 0);

    let again = run_ingest(&config, &day(), &FixtureGrids, false).unwrap();
    assert!(again.already_ingested);
}

#[tokio::test]
async fn test_append_reload_doubles_facts() {
    let dir = TempDir::new().unwrap();
    write_window(dir.path(), &day(), 24, &GRID, 0);

    let config = PipelineConfig {
        schema_mode: SchemaMode::Ensure,
        fact_policy: FactWritePolicy::Append,
        ..config(&dir)
    };
    let warehouse = MemoryWarehouse::new();
    let options = LoadOptions::default();

    run_load(&config, day(), warehouse.clone(), &options).await.unwrap();
    assert_eq!(warehouse.fact_count(), 48);

    run_load(&config, day(), warehouse.clone(), &options).await.unwrap();
    assert_eq!(warehouse.fact_count(), 96);
    // Dimensions replace by key
    assert_eq!(warehouse.dim_time().len(), 24);
    assert_eq!(warehouse.dim_location().len(), 2);
}

#[tokio::test]
async fn test_replace_window_reload_is_idempotent() {
    let dir = TempDir::new().unwrap();
    write_window(dir.path(), &day(), 24, &GRID, 0);

    let config = PipelineConfig {
        schema_mode: SchemaMode::Ensure,
        ..config(&dir)
    };
    let warehouse = MemoryWarehouse::new();
    let options = LoadOptions::default();

    run_load(&config, day(), warehouse.clone(), &options).await.unwrap();
    let first = warehouse.facts();
    let report = run_load(&config, day(), warehouse.clone(), &options).await.unwrap();

    assert_eq!(warehouse.facts(), first);
    assert_eq!(report.cleared_range, Some((2024010100, 2024010123)));
}

#[tokio::test]
async fn test_replace_window_keeps_other_days() {
    let dir = TempDir::new().unwrap();
    let next = LoadWindow::daily(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
    write_window(dir.path(), &day(), 24, &GRID, 0);
    write_window(dir.path(), &next, 24, &GRID, 0);

    let config = PipelineConfig {
        schema_mode: SchemaMode::Ensure,
        ..config(&dir)
    };
    let warehouse = MemoryWarehouse::new();
    let options = LoadOptions::default();

    run_load(&config, day(), warehouse.clone(), &options).await.unwrap();
    run_load(&config, next, warehouse.clone(), &options).await.unwrap();
    run_load(&config, day(), warehouse.clone(), &options).await.unwrap();

    assert_eq!(warehouse.fact_count(), 96);
}

#[tokio::test]
async fn test_failed_batch_leaves_committed_prefix() {
    let dir = TempDir::new().unwrap();
    write_window(dir.path(), &day(), 24, &GRID, 0);

    let config = PipelineConfig {
        batch_size: 10,
        ..config(&dir)
    };
    let warehouse = MemoryWarehouse::new().fail_on_fact_batch(3);

    let err = run_load(&config, day(), warehouse.clone(), &LoadOptions::default())
        .await
        .unwrap_err();

    match err {
        ProcessingError::PartialLoad {
            table,
            committed_batches,
            committed_rows,
            ..
        } => {
            assert_eq!(table, "fact_weather");
            assert_eq!(committed_batches, 2);
            assert_eq!(committed_rows, 20);
        }
        other => panic!("expected PartialLoad, got {:?}", other),
    }

    let facts = warehouse.facts();
    assert_eq!(facts.len(), 20);
    let expected: Vec<i64> = (0..10).flat_map(|h| [2024010100 + h, 2024010100 + h]).collect();
    assert_eq!(facts.iter().map(|f| f.time_id).collect::<Vec<_>>(), expected);

    // The aborted session released its lock
    assert!(LoadLock::acquire(&config.lock_dir(), &day()).is_ok());
}

#[tokio::test]
async fn test_dimension_keys_are_referenced_by_facts() {
    let dir = TempDir::new().unwrap();
    write_window(dir.path(), &day(), 6, &GRID, 0);

    let warehouse = MemoryWarehouse::new();
    let report = run_load(&config(&dir), day(), warehouse.clone(), &LoadOptions::default())
        .await
        .unwrap();

    let facts = warehouse.facts();
    let fact_times: HashSet<i64> = facts.iter().map(|f| f.time_id).collect();
    let fact_locations: HashSet<i64> = facts.iter().map(|f| f.location_id).collect();

    for row in warehouse.dim_time() {
        assert!(fact_times.contains(&row.time_id));
    }
    for row in warehouse.dim_location() {
        assert!(fact_locations.contains(&row.location_id));
    }
    assert_eq!(fact_times.len(), 6);
    assert_eq!(fact_locations.len(), 2);

    let integrity = report.integrity.unwrap();
    assert!(integrity.is_referentially_sound());
    assert_eq!(integrity.total_facts, 12);
}

#[tokio::test]
async fn test_join_loss_is_reported() {
    let dir = TempDir::new().unwrap();
    write_window(dir.path(), &day(), 24, &GRID, 1);

    let warehouse = MemoryWarehouse::new();
    let report = run_load(&config(&dir), day(), warehouse.clone(), &LoadOptions::default())
        .await
        .unwrap();

    let join = report.join.unwrap();
    assert_eq!(join.joined_rows, 47);
    assert!(join.has_losses());
    assert_eq!(join.dropped_for(SourceKind::Accumulated), Some(0));
    assert_eq!(join.dropped_for(SourceKind::Instant), Some(1));
    assert_eq!(join.total_dropped(), 3);
    assert_eq!(warehouse.fact_count(), 47);
}

#[tokio::test]
async fn test_concurrent_load_of_same_window_is_refused() {
    let dir = TempDir::new().unwrap();
    write_window(dir.path(), &day(), 1, &GRID, 0);
    let config = config(&dir);

    let held = LoadLock::acquire(&config.lock_dir(), &day()).unwrap();
    let warehouse = MemoryWarehouse::new();
    let result = run_load(&config, day(), warehouse.clone(), &LoadOptions::default()).await;

    assert!(matches!(result, Err(ProcessingError::LoadInProgress { .. })));
    assert_eq!(warehouse.fact_count(), 0);
    assert!(warehouse.statements().is_empty());

    held.release().unwrap();
    run_load(&config, day(), warehouse.clone(), &LoadOptions::default())
        .await
        .unwrap();
    assert_eq!(warehouse.fact_count(), 2);
}

#[tokio::test]
async fn test_verify_detects_partial_load() {
    let dir = TempDir::new().unwrap();
    write_window(dir.path(), &day(), 24, &GRID, 0);
    let config = PipelineConfig {
        batch_size: 10,
        ..config(&dir)
    };

    let warehouse = MemoryWarehouse::new().fail_on_fact_batch(2);
    assert!(run_load(&config, day(), warehouse.clone(), &LoadOptions::default())
        .await
        .is_err());

    let report = run_verify(&config, &day(), &warehouse).await.unwrap();
    assert_eq!(report.expected_facts, 48);
    assert_eq!(report.warehouse_facts, 10);
    assert!(!report.is_complete());
    assert_eq!(report.total_facts, 10);
    assert_eq!(report.feature_rows, 10);
}

#[tokio::test]
async fn test_backfill_skips_missing_months() {
    let dir = TempDir::new().unwrap();
    let january = LoadWindow::monthly(2024, 1).unwrap();
    let march = LoadWindow::monthly(2024, 3).unwrap();
    write_window(dir.path(), &january, 3, &GRID, 0);
    write_window(dir.path(), &march, 2, &GRID, 0);

    let windows = LoadWindow::months_between(january, march).unwrap();
    let warehouse = MemoryWarehouse::new();
    let report = run_backfill(&config(&dir), &windows, warehouse.clone(), &LoadOptions::default())
        .await
        .unwrap();

    assert_eq!(report.loaded.len(), 2);
    assert_eq!(report.missing, vec!["2024_02".to_string()]);
    assert_eq!(report.loaded[0].schema_mode, SchemaMode::Recreate);
    assert_eq!(report.loaded[1].schema_mode, SchemaMode::Ensure);
    // March did not drop January
    assert_eq!(warehouse.fact_count(), 10);
}

#[tokio::test]
async fn test_export_writes_star_tables() {
    let dir = TempDir::new().unwrap();
    write_window(dir.path(), &day(), 2, &GRID, 0);
    let export = dir.path().join("export");

    let options = LoadOptions {
        export_dir: Some(export.clone()),
        show_progress: false,
    };
    run_load(&config(&dir), day(), MemoryWarehouse::new(), &options)
        .await
        .unwrap();

    let writer = ParquetWriter::new();
    let info = writer.get_file_info(&export.join("fact_weather.parquet")).unwrap();
    assert_eq!(info.total_rows, 4);
    let info = writer.get_file_info(&export.join("dim_time.parquet")).unwrap();
    assert_eq!(info.total_rows, 2);
}
