use crate::config::{FactWritePolicy, PipelineConfig, SchemaMode, TableSet};
use crate::error::{ProcessingError, Result};
use crate::models::{FactWeatherRow, LoadWindow, StarSchema};
use crate::processors::{IntegrityReport, JoinReport};
use crate::utils::progress::ProgressReporter;
use crate::warehouse::lock::LoadLock;
use crate::warehouse::schema::{self, FACT_WEATHER_TABLE};
use crate::warehouse::Warehouse;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// What a finished load did.
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub window: String,
    pub schema_mode: SchemaMode,
    pub fact_policy: FactWritePolicy,
    pub schema_prepared: bool,
    pub dim_time_rows: usize,
    pub dim_location_rows: usize,
    pub fact_rows: usize,
    pub fact_batches: usize,
    pub batch_size: usize,
    /// Inclusive TimeKey range cleared before the facts were written.
    pub cleared_range: Option<(i64, i64)>,
    pub join: Option<JoinReport>,
    pub integrity: Option<IntegrityReport>,
    pub elapsed_ms: u128,
}

impl LoadReport {
    fn new(
        window: &LoadWindow,
        schema_mode: SchemaMode,
        fact_policy: FactWritePolicy,
        batch_size: usize,
    ) -> Self {
        Self {
            window: window.label(),
            schema_mode,
            fact_policy,
            schema_prepared: false,
            dim_time_rows: 0,
            dim_location_rows: 0,
            fact_rows: 0,
            fact_batches: 0,
            batch_size,
            cleared_range: None,
            join: None,
            integrity: None,
            elapsed_ms: 0,
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "Window {}: {} dim_time, {} dim_location, {} facts in {} batch(es) ({} ms)",
            self.window,
            self.dim_time_rows,
            self.dim_location_rows,
            self.fact_rows,
            self.fact_batches,
            self.elapsed_ms
        )
    }
}

/// Moves a star schema into a [`Warehouse`]. Every load runs inside a
/// [`LoadSession`] obtained from [`begin`](Self::begin).
pub struct WarehouseLoader<W: Warehouse> {
    warehouse: W,
    lock_dir: PathBuf,
    batch_size: usize,
    schema_mode: SchemaMode,
    fact_policy: FactWritePolicy,
    tables: TableSet,
    show_progress: bool,
}

impl<W: Warehouse> WarehouseLoader<W> {
    pub fn new(warehouse: W, config: &PipelineConfig) -> Self {
        Self {
            warehouse,
            lock_dir: config.lock_dir(),
            batch_size: config.batch_size.max(1),
            schema_mode: config.schema_mode,
            fact_policy: config.fact_policy,
            tables: config.tables,
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn warehouse(&self) -> &W {
        &self.warehouse
    }

    /// Open a session for `window`. Fails with `LoadInProgress` while
    /// another session for the same window is alive.
    pub fn begin(&self, window: LoadWindow) -> Result<LoadSession<'_, W>> {
        let lock = LoadLock::acquire(&self.lock_dir, &window)?;
        info!(
            window = %window,
            schema_mode = %self.schema_mode,
            fact_policy = %self.fact_policy,
            "Load session started"
        );
        Ok(LoadSession {
            loader: self,
            window,
            lock,
            report: LoadReport::new(&window, self.schema_mode, self.fact_policy, self.batch_size),
            started: Instant::now(),
        })
    }
}

/// A single load of one window. Holds the window lock until
/// [`finish`](Self::finish) or drop.
pub struct LoadSession<'a, W: Warehouse> {
    loader: &'a WarehouseLoader<W>,
    window: LoadWindow,
    lock: LoadLock,
    report: LoadReport,
    started: Instant,
}

impl<'a, W: Warehouse> LoadSession<'a, W> {
    pub fn window(&self) -> &LoadWindow {
        &self.window
    }

    pub fn report(&self) -> &LoadReport {
        &self.report
    }

    pub fn record_join(&mut self, join: JoinReport) {
        self.report.join = Some(join);
    }

    pub fn record_integrity(&mut self, integrity: IntegrityReport) {
        self.report.integrity = Some(integrity);
    }

    /// Bootstrap the database, then drop-and-create or create-if-missing
    /// the tables and view.
    pub async fn setup_schema(&mut self) -> Result<()> {
        let warehouse = &self.loader.warehouse;
        warehouse
            .ensure_database()
            .await
            .map_err(|e| schema_error("CREATE DATABASE", e))?;

        let mut statements = Vec::new();
        if self.loader.schema_mode == SchemaMode::Recreate {
            warn!(window = %self.window, "Recreating warehouse tables; existing rows are dropped");
            statements.extend(schema::drop_statements());
        }
        statements.extend(schema::create_statements(
            self.loader.schema_mode == SchemaMode::Ensure,
        ));

        for sql in &statements {
            debug!(sql = %first_line(sql), "Schema statement");
            warehouse
                .execute(sql)
                .await
                .map_err(|e| schema_error(first_line(sql), e))?;
        }

        self.report.schema_prepared = true;
        info!(statements = statements.len(), "Schema ready");
        Ok(())
    }

    /// One bulk write per selected dimension table.
    pub async fn load_dimensions(&mut self, star: &StarSchema) -> Result<()> {
        let warehouse = &self.loader.warehouse;

        if self.loader.tables.dim_time {
            warehouse.insert_dim_time(&star.dim_time).await?;
            self.report.dim_time_rows = star.dim_time.len();
            info!(rows = star.dim_time.len(), "Loaded dim_time");
        }
        if self.loader.tables.dim_location {
            warehouse.insert_dim_location(&star.dim_location).await?;
            self.report.dim_location_rows = star.dim_location.len();
            info!(rows = star.dim_location.len(), "Loaded dim_location");
        }
        Ok(())
    }

    /// Write facts in fixed-size batches. Under `ReplaceWindow` the window's
    /// facts are deleted first. A failed batch stops the load; batches
    /// already written stay written.
    pub async fn load_facts(&mut self, facts: &[FactWeatherRow]) -> Result<()> {
        if !self.loader.tables.fact_weather {
            return Ok(());
        }
        let warehouse = &self.loader.warehouse;

        if self.loader.fact_policy == FactWritePolicy::ReplaceWindow {
            let (lo, hi) = self.clear_range(facts);
            warehouse.delete_fact_window(lo, hi).await?;
            self.report.cleared_range = Some((lo, hi));
            info!(lo, hi, "Cleared facts for window");
        }

        let batch_size = self.loader.batch_size;
        let total_batches = facts.len().div_ceil(batch_size);
        let progress = ProgressReporter::new(
            facts.len() as u64,
            &format!("Loading {} facts in {} batches", facts.len(), total_batches),
            !self.loader.show_progress,
        );

        for (index, batch) in facts.chunks(batch_size).enumerate() {
            if let Err(e) = warehouse.insert_facts(batch).await {
                error!(
                    batch = index + 1,
                    of = total_batches,
                    committed_rows = self.report.fact_rows,
                    error = %e,
                    "Fact batch failed"
                );
                progress.abandon_with_message("Fact load aborted");
                return Err(ProcessingError::PartialLoad {
                    table: FACT_WEATHER_TABLE.to_string(),
                    committed_batches: self.report.fact_batches,
                    committed_rows: self.report.fact_rows,
                    source: Box::new(e),
                });
            }
            self.report.fact_batches += 1;
            self.report.fact_rows += batch.len();
            progress.increment(batch.len() as u64);
            debug!(batch = index + 1, of = total_batches, rows = batch.len(), "Fact batch committed");
        }

        progress.finish_with_message(&format!("Loaded {} facts", self.report.fact_rows));
        info!(
            rows = self.report.fact_rows,
            batches = self.report.fact_batches,
            "Loaded fact_weather"
        );
        Ok(())
    }

    /// Dimensions first, then facts.
    pub async fn load_star(&mut self, star: &StarSchema) -> Result<()> {
        self.load_dimensions(star).await?;
        self.load_facts(&star.facts).await
    }

    /// Release the lock and hand back the report.
    pub fn finish(mut self) -> Result<LoadReport> {
        self.report.elapsed_ms = self.started.elapsed().as_millis();
        let report = self.report;
        self.lock.release()?;
        info!("{}", report.summary());
        Ok(report)
    }

    /// The window's TimeKey range, widened to cover any fact outside it.
    fn clear_range(&self, facts: &[FactWeatherRow]) -> (i64, i64) {
        let (lo, hi) = self.window.time_key_range();
        let (mut lo, mut hi) = (lo.get(), hi.get());
        for fact in facts {
            if fact.time_id < lo || fact.time_id > hi {
                warn!(time_id = fact.time_id, window = %self.window, "Fact outside load window");
                lo = lo.min(fact.time_id);
                hi = hi.max(fact.time_id);
            }
        }
        (lo, hi)
    }
}

fn first_line(sql: &str) -> &str {
    sql.lines().next().unwrap_or(sql).trim_end_matches(" (")
}

fn schema_error(statement: &str, e: ProcessingError) -> ProcessingError {
    ProcessingError::SchemaSetup {
        statement: statement.to_string(),
        reason: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DimLocationRow, DimTimeRow};
    use crate::warehouse::MemoryWarehouse;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn window() -> LoadWindow {
        LoadWindow::daily(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
    }

    fn star(hours: u32) -> StarSchema {
        let mut star = StarSchema::default();
        for h in 0..hours {
            let ts = window().start().and_hms_opt(h, 0, 0).unwrap();
            let dim = DimTimeRow::from_datetime(&ts);
            star.facts.push(FactWeatherRow {
                time_id: dim.time_id,
                location_id: 7,
                temperature_c: 1.0,
                dewpoint_c: 0.0,
                max_temp_c: 2.0,
                min_temp_c: 0.5,
                pressure_hpa: 1010.0,
                precipitation_mm: 0.0,
                wind_speed_ms: 1.0,
                cloud_cover: 0.1,
                solar_radiation: 0.0,
            });
            star.dim_time.push(dim);
        }
        star.dim_location.push(DimLocationRow {
            location_id: 7,
            latitude: 45.0,
            longitude: 70.0,
        });
        star
    }

    fn config(dir: &TempDir) -> PipelineConfig {
        PipelineConfig {
            lock_dir: Some(dir.path().join("locks")),
            batch_size: 5,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_full_load_writes_everything() {
        let dir = TempDir::new().unwrap();
        let loader = WarehouseLoader::new(MemoryWarehouse::new(), &config(&dir));

        let mut session = loader.begin(window()).unwrap();
        session.setup_schema().await.unwrap();
        session.load_star(&star(12)).await.unwrap();
        let report = session.finish().unwrap();

        assert!(report.schema_prepared);
        assert_eq!(report.fact_rows, 12);
        assert_eq!(report.fact_batches, 3);
        assert_eq!(report.dim_time_rows, 12);
        assert_eq!(report.cleared_range, Some((2024010100, 2024010123)));
        assert_eq!(loader.warehouse().fact_count(), 12);
        assert!(loader.warehouse().database_created());
        assert_eq!(loader.warehouse().statements()[0], "DROP TABLE IF EXISTS weather_full");
    }

    #[tokio::test]
    async fn test_ensure_mode_does_not_drop() {
        let dir = TempDir::new().unwrap();
        let config = PipelineConfig {
            schema_mode: SchemaMode::Ensure,
            ..config(&dir)
        };
        let loader = WarehouseLoader::new(MemoryWarehouse::new(), &config);

        let mut session = loader.begin(window()).unwrap();
        session.setup_schema().await.unwrap();
        session.finish().unwrap();

        let statements = loader.warehouse().statements();
        assert_eq!(statements.len(), 4);
        assert!(statements.iter().all(|s| !s.starts_with("DROP")));
    }

    #[tokio::test]
    async fn test_failed_batch_reports_committed_prefix() {
        let dir = TempDir::new().unwrap();
        let warehouse = MemoryWarehouse::new().fail_on_fact_batch(3);
        let config = PipelineConfig {
            fact_policy: FactWritePolicy::Append,
            ..config(&dir)
        };
        let loader = WarehouseLoader::new(warehouse, &config);

        let mut session = loader.begin(window()).unwrap();
        match session.load_facts(&star(20).facts).await {
            Err(ProcessingError::PartialLoad {
                table,
                committed_batches,
                committed_rows,
                ..
            }) => {
                assert_eq!(table, "fact_weather");
                assert_eq!(committed_batches, 2);
                assert_eq!(committed_rows, 10);
            }
            other => panic!("expected PartialLoad, got {:?}", other),
        }
        drop(session);
        assert_eq!(loader.warehouse().fact_count(), 10);
    }

    #[tokio::test]
    async fn test_second_session_for_window_is_refused() {
        let dir = TempDir::new().unwrap();
        let loader = WarehouseLoader::new(MemoryWarehouse::new(), &config(&dir));

        let first = loader.begin(window()).unwrap();
        assert!(matches!(
            loader.begin(window()),
            Err(ProcessingError::LoadInProgress { .. })
        ));
        drop(first);
        assert!(loader.begin(window()).is_ok());
    }

    #[tokio::test]
    async fn test_table_selection() {
        let dir = TempDir::new().unwrap();
        let config = PipelineConfig {
            tables: TableSet::facts_only(),
            ..config(&dir)
        };
        let loader = WarehouseLoader::new(MemoryWarehouse::new(), &config);

        let mut session = loader.begin(window()).unwrap();
        session.load_star(&star(3)).await.unwrap();
        let report = session.finish().unwrap();

        assert_eq!(report.dim_time_rows, 0);
        assert!(loader.warehouse().dim_time().is_empty());
        assert_eq!(loader.warehouse().fact_count(), 3);
    }
}
