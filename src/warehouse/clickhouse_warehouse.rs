use crate::config::ClickHouseSettings;
use crate::error::Result;
use crate::models::{DimLocationRow, DimTimeRow, FactWeatherRow};
use crate::warehouse::schema::{
    self, DIM_LOCATION_TABLE, DIM_TIME_TABLE, FACT_WEATHER_TABLE,
};
use crate::warehouse::Warehouse;
use clickhouse::{Client, Row};
use serde::Serialize;
use tracing::debug;

/// ClickHouse over HTTP. Holds a server-level client for database
/// bootstrap and a database-scoped one for everything else.
#[derive(Clone)]
pub struct ClickHouseWarehouse {
    server: Client,
    client: Client,
    database: String,
}

impl ClickHouseWarehouse {
    pub fn new(settings: &ClickHouseSettings) -> Self {
        let server = Client::default()
            .with_url(&settings.url)
            .with_user(&settings.user)
            .with_password(&settings.password);
        let client = server.clone().with_database(&settings.database);

        Self {
            server,
            client,
            database: settings.database.clone(),
        }
    }

    async fn insert_rows<T>(&self, table: &str, rows: &[T]) -> Result<()>
    where
        T: Row + Serialize,
    {
        if rows.is_empty() {
            return Ok(());
        }
        let mut insert = self.client.insert::<T>(table)?;
        for row in rows {
            insert.write(row).await?;
        }
        insert.end().await?;
        debug!(table, rows = rows.len(), "Inserted rows");
        Ok(())
    }
}

impl Warehouse for ClickHouseWarehouse {
    async fn ensure_database(&self) -> Result<()> {
        self.server
            .query(&schema::create_database(&self.database))
            .execute()
            .await?;
        Ok(())
    }

    async fn execute(&self, sql: &str) -> Result<()> {
        self.client.query(sql).execute().await?;
        Ok(())
    }

    async fn insert_dim_time(&self, rows: &[DimTimeRow]) -> Result<()> {
        self.insert_rows(DIM_TIME_TABLE, rows).await
    }

    async fn insert_dim_location(&self, rows: &[DimLocationRow]) -> Result<()> {
        self.insert_rows(DIM_LOCATION_TABLE, rows).await
    }

    async fn insert_facts(&self, rows: &[FactWeatherRow]) -> Result<()> {
        self.insert_rows(FACT_WEATHER_TABLE, rows).await
    }

    async fn delete_fact_window(&self, lo: i64, hi: i64) -> Result<()> {
        self.execute(&schema::delete_fact_window(lo, hi)).await
    }

    async fn count_facts(&self, lo: i64, hi: i64) -> Result<u64> {
        let count = self
            .client
            .query(&schema::count_fact_window(lo, hi))
            .fetch_one::<u64>()
            .await?;
        Ok(count)
    }

    async fn count_feature_rows(&self) -> Result<u64> {
        let count = self
            .client
            .query(&schema::count_feature_rows())
            .fetch_one::<u64>()
            .await?;
        Ok(count)
    }
}
