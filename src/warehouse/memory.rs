use crate::error::{ProcessingError, Result};
use crate::models::{DimLocationRow, DimTimeRow, FactWeatherRow};
use crate::warehouse::schema::{
    DIM_LOCATION_TABLE, DIM_TIME_TABLE, FACT_WEATHER_TABLE,
};
use crate::warehouse::Warehouse;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MemoryState {
    database_created: bool,
    statements: Vec<String>,
    dim_time: BTreeMap<i64, DimTimeRow>,
    dim_location: BTreeMap<i64, DimLocationRow>,
    facts: Vec<FactWeatherRow>,
    fact_batches_attempted: usize,
    fail_on_fact_batch: Option<usize>,
}

/// In-process stand-in for the warehouse. Dimension tables replace rows by
/// key like a ReplacingMergeTree after merges; facts append. Clones share
/// state.
#[derive(Debug, Clone, Default)]
pub struct MemoryWarehouse {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the `n`-th fact batch (1-based, counted over the warehouse's
    /// lifetime) fail without storing anything.
    pub fn fail_on_fact_batch(self, n: usize) -> Self {
        self.lock().fail_on_fact_batch = Some(n);
        self
    }

    pub fn fact_count(&self) -> usize {
        self.lock().facts.len()
    }

    pub fn facts(&self) -> Vec<FactWeatherRow> {
        self.lock().facts.clone()
    }

    pub fn dim_time(&self) -> Vec<DimTimeRow> {
        self.lock().dim_time.values().cloned().collect()
    }

    pub fn dim_location(&self) -> Vec<DimLocationRow> {
        self.lock().dim_location.values().cloned().collect()
    }

    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.clone()
    }

    pub fn database_created(&self) -> bool {
        self.lock().database_created
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Warehouse for MemoryWarehouse {
    async fn ensure_database(&self) -> Result<()> {
        self.lock().database_created = true;
        Ok(())
    }

    async fn execute(&self, sql: &str) -> Result<()> {
        let mut state = self.lock();
        state.statements.push(sql.to_string());

        if let Some(name) = sql.strip_prefix("DROP TABLE IF EXISTS ") {
            match name.trim() {
                DIM_TIME_TABLE => state.dim_time.clear(),
                DIM_LOCATION_TABLE => state.dim_location.clear(),
                FACT_WEATHER_TABLE => state.facts.clear(),
                _ => {}
            }
        }
        Ok(())
    }

    async fn insert_dim_time(&self, rows: &[DimTimeRow]) -> Result<()> {
        let mut state = self.lock();
        for row in rows {
            state.dim_time.insert(row.time_id, row.clone());
        }
        Ok(())
    }

    async fn insert_dim_location(&self, rows: &[DimLocationRow]) -> Result<()> {
        let mut state = self.lock();
        for row in rows {
            state.dim_location.insert(row.location_id, row.clone());
        }
        Ok(())
    }

    async fn insert_facts(&self, rows: &[FactWeatherRow]) -> Result<()> {
        let mut state = self.lock();
        state.fact_batches_attempted += 1;
        if state.fail_on_fact_batch == Some(state.fact_batches_attempted) {
            return Err(ProcessingError::Warehouse(format!(
                "injected failure on fact batch {}",
                state.fact_batches_attempted
            )));
        }
        state.facts.extend_from_slice(rows);
        Ok(())
    }

    async fn delete_fact_window(&self, lo: i64, hi: i64) -> Result<()> {
        self.lock()
            .facts
            .retain(|fact| fact.time_id < lo || fact.time_id > hi);
        Ok(())
    }

    async fn count_facts(&self, lo: i64, hi: i64) -> Result<u64> {
        let count = self
            .lock()
            .facts
            .iter()
            .filter(|fact| (lo..=hi).contains(&fact.time_id))
            .count();
        Ok(count as u64)
    }

    async fn count_feature_rows(&self) -> Result<u64> {
        let state = self.lock();
        let count = state
            .facts
            .iter()
            .filter(|fact| {
                state.dim_time.contains_key(&fact.time_id)
                    && state.dim_location.contains_key(&fact.location_id)
            })
            .count();
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(time_id: i64) -> FactWeatherRow {
        FactWeatherRow {
            time_id,
            location_id: 1,
            temperature_c: 0.0,
            dewpoint_c: 0.0,
            max_temp_c: 0.0,
            min_temp_c: 0.0,
            pressure_hpa: 1000.0,
            precipitation_mm: 0.0,
            wind_speed_ms: 0.0,
            cloud_cover: 0.0,
            solar_radiation: 0.0,
        }
    }

    #[tokio::test]
    async fn test_delete_window_keeps_outside_rows() {
        let warehouse = MemoryWarehouse::new();
        warehouse
            .insert_facts(&[fact(2024010100), fact(2024010123), fact(2024010200)])
            .await
            .unwrap();

        warehouse.delete_fact_window(2024010100, 2024010123).await.unwrap();
        assert_eq!(warehouse.fact_count(), 1);
        assert_eq!(warehouse.count_facts(2024010200, 2024010223).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_injected_failure_stores_nothing() {
        let warehouse = MemoryWarehouse::new().fail_on_fact_batch(2);
        warehouse.insert_facts(&[fact(1)]).await.unwrap();
        assert!(warehouse.insert_facts(&[fact(2)]).await.is_err());
        warehouse.insert_facts(&[fact(3)]).await.unwrap();
        assert_eq!(warehouse.fact_count(), 2);
    }

    #[tokio::test]
    async fn test_feature_rows_skip_orphan_facts() {
        let warehouse = MemoryWarehouse::new();
        let hour = chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let time = DimTimeRow::from_datetime(&hour);
        warehouse.insert_dim_time(&[time.clone()]).await.unwrap();
        warehouse
            .insert_dim_location(&[DimLocationRow {
                location_id: 1,
                latitude: 45.0,
                longitude: 70.0,
            }])
            .await
            .unwrap();
        warehouse
            .insert_facts(&[fact(time.time_id), fact(2024010101)])
            .await
            .unwrap();

        assert_eq!(warehouse.fact_count(), 2);
        assert_eq!(warehouse.count_feature_rows().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_drop_clears_table() {
        let warehouse = MemoryWarehouse::new();
        warehouse.insert_facts(&[fact(1)]).await.unwrap();
        warehouse.execute("DROP TABLE IF EXISTS fact_weather").await.unwrap();
        assert_eq!(warehouse.fact_count(), 0);
        assert_eq!(warehouse.statements().len(), 1);
    }
}
