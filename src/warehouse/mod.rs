pub mod clickhouse_warehouse;
pub mod loader;
pub mod lock;
pub mod memory;
pub mod schema;

pub use clickhouse_warehouse::ClickHouseWarehouse;
pub use loader::{LoadReport, LoadSession, WarehouseLoader};
pub use lock::LoadLock;
pub use memory::MemoryWarehouse;

use crate::error::Result;
use crate::models::{DimLocationRow, DimTimeRow, FactWeatherRow};

/// The storage side of a load. Implementations only move rows and run
/// statements; batching, ordering and policy live in the loader.
#[allow(async_fn_in_trait)]
pub trait Warehouse {
    /// Create the target database if it does not exist.
    async fn ensure_database(&self) -> Result<()>;

    /// Run one DDL or mutation statement against the target database.
    async fn execute(&self, sql: &str) -> Result<()>;

    async fn insert_dim_time(&self, rows: &[DimTimeRow]) -> Result<()>;

    async fn insert_dim_location(&self, rows: &[DimLocationRow]) -> Result<()>;

    /// Write one batch of facts. A batch is committed as a unit or not at all.
    async fn insert_facts(&self, rows: &[FactWeatherRow]) -> Result<()>;

    /// Remove facts whose `time_id` lies in `lo..=hi`, waiting for the
    /// mutation to finish.
    async fn delete_fact_window(&self, lo: i64, hi: i64) -> Result<()>;

    async fn count_facts(&self, lo: i64, hi: i64) -> Result<u64>;

    /// Facts reachable through both dimension joins, i.e. the row count of
    /// the model feature projection.
    async fn count_feature_rows(&self) -> Result<u64>;
}
