use crate::archive::ArchiveExtractor;
use crate::config::{PipelineConfig, SchemaMode};
use crate::error::{ProcessingError, Result};
use crate::models::{JoinedObservation, LoadWindow, StarSchema};
use crate::processors::{
    split_star_schema, DataMerger, DimensionalTransform, IntegrityChecker, JoinReport,
    NormalizeReport, Normalizer,
};
use crate::readers::{GridSource, ParquetReader};
use crate::utils::constants::NORMALISED_EXTENSION;
use crate::utils::filename::window_dir;
use crate::utils::progress::ProgressReporter;
use crate::warehouse::{LoadReport, Warehouse, WarehouseLoader};
use crate::writers::ParquetWriter;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub window: String,
    /// Normalised output was already present; nothing was done.
    pub already_ingested: bool,
    pub extracted_files: usize,
    pub normalize: Option<NormalizeReport>,
}

/// Unpack and normalise the raw files of one window.
pub fn run_ingest(
    config: &PipelineConfig,
    window: &LoadWindow,
    source: &dyn GridSource,
    show_progress: bool,
) -> Result<IngestOutcome> {
    let dir = window_dir(&config.data_dir, window);
    if !dir.is_dir() {
        return Err(ProcessingError::MissingData(format!(
            "window directory {} does not exist",
            dir.display()
        )));
    }

    let mut outcome = IngestOutcome {
        window: window.label(),
        already_ingested: false,
        extracted_files: 0,
        normalize: None,
    };

    if has_normalised_output(&dir)? {
        info!(dir = %dir.display(), "Window already ingested, skipping");
        outcome.already_ingested = true;
        return Ok(outcome);
    }

    if let Some(extracted) = ArchiveExtractor::new().extract_download(&dir)? {
        outcome.extracted_files = extracted.len();
    }

    let progress = ProgressReporter::new_spinner("Normalising raw files...", !show_progress);
    let writer = ParquetWriter::new().with_compression(&config.compression)?;
    let report = Normalizer::new(writer).normalize_dir(&dir, source, Some(&progress))?;
    progress.finish_with_message(&report.summary());
    info!(window = %window, "{}", report.summary());

    if report.converted.is_empty() && report.has_failures() {
        return Err(ProcessingError::MissingData(format!(
            "none of the {} raw file(s) in {} could be normalised",
            report.failed.len(),
            dir.display()
        )));
    }

    outcome.normalize = Some(report);
    Ok(outcome)
}

fn has_normalised_output(dir: &Path) -> Result<bool> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(NORMALISED_EXTENSION))
        {
            return Ok(true);
        }
    }
    Ok(false)
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub export_dir: Option<PathBuf>,
    pub show_progress: bool,
}

/// Read, join, derive and split a window's normalised files.
pub fn build_star_schema(
    config: &PipelineConfig,
    window: &LoadWindow,
) -> Result<(StarSchema, JoinReport)> {
    let dir = window_dir(&config.data_dir, window);
    let sources = ParquetReader::new().read_sources(&dir)?;

    let (joined, join_report) = DataMerger::new().merge_sources(&sources)?;
    let outside = rows_outside_window(window, &joined);
    if outside > 0 {
        warn!(window = %window, rows = outside, "Joined rows fall outside the load window");
    }
    if join_report.has_losses() {
        warn!(
            window = %window,
            dropped = join_report.total_dropped(),
            joined = join_report.joined_rows,
            "Inner join dropped rows"
        );
    }

    let derived = DimensionalTransform::new(config.max_workers).derive(&joined)?;
    let star = split_star_schema(&derived);
    info!(
        window = %window,
        dim_time = star.dim_time.len(),
        dim_location = star.dim_location.len(),
        facts = star.facts.len(),
        "Star schema built"
    );
    Ok((star, join_report))
}

/// Joined rows whose timestamp is not in `window`. They are still loaded;
/// the fact delete range widens to cover them.
pub fn rows_outside_window(window: &LoadWindow, joined: &[JoinedObservation]) -> usize {
    joined.iter().filter(|row| !window.contains(row.time)).count()
}

/// Load one window into `warehouse` inside a load session.
pub async fn run_load<W: Warehouse>(
    config: &PipelineConfig,
    window: LoadWindow,
    warehouse: W,
    options: &LoadOptions,
) -> Result<LoadReport> {
    let loader = WarehouseLoader::new(warehouse, config).with_progress(options.show_progress);
    let mut session = loader.begin(window)?;

    let (star, join_report) = build_star_schema(config, &window)?;
    session.record_join(join_report);
    if star.is_empty() {
        return Err(ProcessingError::MissingData(format!(
            "join produced no rows for window {}",
            window
        )));
    }

    let checker = IntegrityChecker::new();
    let integrity = checker.check_integrity(&star);
    if !integrity.is_referentially_sound() || integrity.suspect_facts > 0 {
        warn!("{}", checker.generate_summary(&integrity));
    }
    session.record_integrity(integrity);

    if let Some(dir) = &options.export_dir {
        let writer = ParquetWriter::new().with_compression(&config.compression)?;
        let paths = writer.write_star_schema(&star, dir)?;
        info!(files = paths.len(), dir = %dir.display(), "Exported star schema");
    }

    session.setup_schema().await?;
    session.load_star(&star).await?;
    session.finish()
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub window: String,
    pub expected_facts: u64,
    pub warehouse_facts: u64,
    /// Facts across every window.
    pub total_facts: u64,
    /// Facts that survive both dimension joins of the feature query.
    pub feature_rows: u64,
}

impl VerifyReport {
    pub fn is_complete(&self) -> bool {
        self.expected_facts == self.warehouse_facts
    }

    /// Facts without a matching dimension row.
    pub fn orphan_facts(&self) -> u64 {
        self.total_facts.saturating_sub(self.feature_rows)
    }
}

/// Compare the warehouse's fact count for a window with what the local
/// inputs would produce.
pub async fn run_verify<W: Warehouse>(
    config: &PipelineConfig,
    window: &LoadWindow,
    warehouse: &W,
) -> Result<VerifyReport> {
    let dir = window_dir(&config.data_dir, window);
    let sources = ParquetReader::new().read_sources(&dir)?;
    let (_, join_report) = DataMerger::new().merge_sources(&sources)?;

    let (lo, hi) = window.time_key_range();
    let warehouse_facts = warehouse.count_facts(lo.get(), hi.get()).await?;
    let total_facts = warehouse.count_facts(i64::MIN, i64::MAX).await?;
    let feature_rows = warehouse.count_feature_rows().await?;

    let report = VerifyReport {
        window: window.label(),
        expected_facts: join_report.joined_rows as u64,
        warehouse_facts,
        total_facts,
        feature_rows,
    };
    if report.is_complete() {
        info!(window = %window, facts = warehouse_facts, "Warehouse matches local inputs");
    } else {
        warn!(
            window = %window,
            expected = report.expected_facts,
            actual = report.warehouse_facts,
            "Warehouse fact count differs from local inputs"
        );
    }
    if report.orphan_facts() > 0 {
        warn!(
            orphans = report.orphan_facts(),
            "Facts without dimension rows are invisible to the feature query"
        );
    }
    Ok(report)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BackfillReport {
    pub loaded: Vec<LoadReport>,
    pub missing: Vec<String>,
}

/// Load each monthly window in turn. Months without a directory are
/// skipped. Schema recreation, if requested, happens for the first loaded
/// month only.
pub async fn run_backfill<W: Warehouse + Clone>(
    config: &PipelineConfig,
    windows: &[LoadWindow],
    warehouse: W,
    options: &LoadOptions,
) -> Result<BackfillReport> {
    let mut report = BackfillReport::default();
    let mut config = config.clone();

    for window in windows {
        let dir = window_dir(&config.data_dir, window);
        if !dir.is_dir() {
            warn!(window = %window, dir = %dir.display(), "No data directory, skipping month");
            report.missing.push(window.label());
            continue;
        }

        let loaded = run_load(&config, *window, warehouse.clone(), options).await?;
        report.loaded.push(loaded);
        config.schema_mode = SchemaMode::Ensure;
    }

    info!(
        loaded = report.loaded.len(),
        missing = report.missing.len(),
        "Backfill finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CoordinateValues, GridDataset, GridVariable};
    use crate::utils::constants::{LATITUDE_COLUMN, LONGITUDE_COLUMN, RAW_TIME_COLUMN};
    use chrono::NaiveDate;
    use tempfile::TempDir;

    struct OneCellSource;

    impl GridSource for OneCellSource {
        fn read_dataset(&self, _path: &Path) -> Result<GridDataset> {
            let t = NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap();
            Ok(GridDataset::new()
                .with_coord(RAW_TIME_COLUMN, CoordinateValues::Time(vec![t]))
                .with_coord(LATITUDE_COLUMN, CoordinateValues::Numeric(vec![45.0]))
                .with_coord(LONGITUDE_COLUMN, CoordinateValues::Numeric(vec![70.0]))
                .with_variable(GridVariable::new(
                    "t2m",
                    &[RAW_TIME_COLUMN, LATITUDE_COLUMN, LONGITUDE_COLUMN],
                    vec![273.15],
                )))
        }
    }

    fn config(dir: &TempDir) -> PipelineConfig {
        PipelineConfig {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn test_ingest_normalises_then_skips() {
        let dir = TempDir::new().unwrap();
        let window = LoadWindow::daily(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        let window_path = window_dir(dir.path(), &window);
        fs::create_dir_all(&window_path).unwrap();
        fs::write(window_path.join("data_stream-oper_stepType-instant.nc"), b"x").unwrap();

        let first = run_ingest(&config(&dir), &window, &OneCellSource, false).unwrap();
        assert!(!first.already_ingested);
        assert_eq!(first.normalize.unwrap().converted.len(), 1);
        assert!(window_path.join("data_stream-oper_stepType-instant.parquet").exists());

        let second = run_ingest(&config(&dir), &window, &OneCellSource, false).unwrap();
        assert!(second.already_ingested);
    }

    #[test]
    fn test_rows_outside_window_counts_spillover() {
        let window = LoadWindow::daily(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        let at = |day: u32, hour: u32| JoinedObservation {
            time: NaiveDate::from_ymd_opt(2024, 1, day)
                .unwrap()
                .and_hms_opt(hour, 0, 0)
                .unwrap(),
            latitude: 45.0,
            longitude: 70.0,
            raw: Default::default(),
        };
        let joined = vec![at(1, 0), at(1, 23), at(2, 0)];
        assert_eq!(rows_outside_window(&window, &joined), 1);
        assert_eq!(rows_outside_window(&window, &joined[..2]), 0);
    }

    #[test]
    fn test_ingest_requires_window_directory() {
        let dir = TempDir::new().unwrap();
        let window = LoadWindow::daily(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert!(matches!(
            run_ingest(&config(&dir), &window, &OneCellSource, false),
            Err(ProcessingError::MissingData(_))
        ));
    }
}
