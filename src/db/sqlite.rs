use async_trait::async_trait;
use sqlx::{Pool, Row, Sqlite};
use tracing::debug;

use super::{CacheRecord, KvStore, Partition, StoreError};

/// Persistent store over the `cache_records` table. Survives restarts.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn get(&self, partition: Partition, key: &str) -> Result<Option<CacheRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT value, stored_at FROM cache_records WHERE partition = ? AND key = ?",
        )
        .bind(partition.as_str())
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let raw: String = row.try_get("value")?;
                let stored_at: i64 = row.try_get("stored_at")?;
                let value = serde_json::from_str(&raw)?;
                Ok(Some(CacheRecord::new(key, value, stored_at)))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, partition: Partition, record: CacheRecord) -> Result<(), StoreError> {
        let raw = serde_json::to_string(&record.value)?;

        sqlx::query(
            "INSERT INTO cache_records (partition, key, value, stored_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(partition, key) DO UPDATE SET value = excluded.value, stored_at = excluded.stored_at",
        )
        .bind(partition.as_str())
        .bind(&record.key)
        .bind(raw)
        .bind(record.stored_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, partition: Partition, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM cache_records WHERE partition = ? AND key = ?")
            .bind(partition.as_str())
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn clear(&self, partition: Partition) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM cache_records WHERE partition = ?")
            .bind(partition.as_str())
            .execute(&self.pool)
            .await?;

        debug!("Cleared {} records from partition {}", result.rows_affected(), partition);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}
