//! In-process store used when no database is configured, and by tests

use async_trait::async_trait;
use moka::future::Cache;
use std::collections::HashMap;

use super::{CacheRecord, KvStore, Partition, StoreError};

/// One bounded moka cache per partition.
///
/// No TTL is configured: whether a record is still valid is decided by the
/// cache policy at read time, never by the store.
#[derive(Clone)]
pub struct MemoryStore {
    partitions: HashMap<Partition, Cache<String, CacheRecord>>,
}

impl MemoryStore {
    /// Create a store holding at most `capacity` records per partition
    pub fn new(capacity: u64) -> Self {
        let partitions = Partition::ALL
            .iter()
            .map(|p| (*p, Cache::builder().max_capacity(capacity).build()))
            .collect();

        Self { partitions }
    }

    fn partition(&self, partition: Partition) -> Result<&Cache<String, CacheRecord>, StoreError> {
        self.partitions
            .get(&partition)
            .ok_or_else(|| StoreError::Unavailable(format!("partition {} not initialised", partition)))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, partition: Partition, key: &str) -> Result<Option<CacheRecord>, StoreError> {
        match self.partitions.get(&partition) {
            Some(cache) => Ok(cache.get(key).await),
            None => Ok(None),
        }
    }

    async fn put(&self, partition: Partition, record: CacheRecord) -> Result<(), StoreError> {
        let cache = self.partition(partition)?;
        cache.insert(record.key.clone(), record).await;
        Ok(())
    }

    async fn delete(&self, partition: Partition, key: &str) -> Result<(), StoreError> {
        if let Some(cache) = self.partitions.get(&partition) {
            cache.invalidate(key).await;
        }
        Ok(())
    }

    async fn clear(&self, partition: Partition) -> Result<(), StoreError> {
        if let Some(cache) = self.partitions.get(&partition) {
            cache.invalidate_all();
            cache.run_pending_tasks().await;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
