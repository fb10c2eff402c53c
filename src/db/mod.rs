//! Persistent key-value store backing every cache partition

pub mod connection;
pub mod memory;
pub mod migration;
pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub const INIT_SCHEMA: &str = r#"
-- One row per cached record, partitioned by record family
CREATE TABLE IF NOT EXISTS cache_records (
    partition TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    stored_at INTEGER NOT NULL,
    PRIMARY KEY (partition, key)
);

CREATE INDEX IF NOT EXISTS idx_cache_records_stored_at ON cache_records(partition, stored_at);
"#;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Named record families. Key shapes per partition are rendered by
/// [`crate::cache::CacheKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Partition {
    /// Generic read-through results plus small derived records
    Results,
    HeightToHash,
    BlockMetadata,
    Blocks,
    BlockRanges,
    BlockDetails,
    Transactions,
    TransactionDetails,
    /// Comprehensive per-address aggregate
    AddressFull,
    AddressBalances,
    /// Paginated txid pages and per-range scan results
    AddressTxids,
    Utxos,
    SpendingTx,
    OutputStatus,
    Mempool,
    AssetData,
    AssetHolders,
    Settings,
}

impl Partition {
    pub const ALL: [Partition; 18] = [
        Partition::Results,
        Partition::HeightToHash,
        Partition::BlockMetadata,
        Partition::Blocks,
        Partition::BlockRanges,
        Partition::BlockDetails,
        Partition::Transactions,
        Partition::TransactionDetails,
        Partition::AddressFull,
        Partition::AddressBalances,
        Partition::AddressTxids,
        Partition::Utxos,
        Partition::SpendingTx,
        Partition::OutputStatus,
        Partition::Mempool,
        Partition::AssetData,
        Partition::AssetHolders,
        Partition::Settings,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Results => "results",
            Partition::HeightToHash => "heightToHash",
            Partition::BlockMetadata => "blockMetadata",
            Partition::Blocks => "blocks",
            Partition::BlockRanges => "blockRanges",
            Partition::BlockDetails => "blockDetails",
            Partition::Transactions => "transactions",
            Partition::TransactionDetails => "transactionDetails",
            Partition::AddressFull => "addressFull",
            Partition::AddressBalances => "addressBalances",
            Partition::AddressTxids => "addressTxids",
            Partition::Utxos => "utxos",
            Partition::SpendingTx => "spendingTx",
            Partition::OutputStatus => "outputStatus",
            Partition::Mempool => "mempool",
            Partition::AssetData => "assetData",
            Partition::AssetHolders => "assetHolders",
            Partition::Settings => "settings",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Partition {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Partition::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| StoreError::Unavailable(format!("unknown partition '{}'", s)))
    }
}

/// A stored value and the time (ms since epoch) of its last successful write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord {
    pub key: String,
    pub value: serde_json::Value,
    pub stored_at: i64,
}

impl CacheRecord {
    pub fn new(key: impl Into<String>, value: serde_json::Value, stored_at: i64) -> Self {
        Self {
            key: key.into(),
            value,
            stored_at,
        }
    }
}

/// Storage backend for cache partitions.
///
/// Implementations must tolerate concurrent single-key access. Callers treat
/// every error as a cache miss (reads) or a no-op (writes), so backends should
/// report failures rather than retry internally.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Returns `None` when the key or partition holds nothing
    async fn get(&self, partition: Partition, key: &str) -> Result<Option<CacheRecord>, StoreError>;

    /// Inserts or overwrites the record under `record.key`
    async fn put(&self, partition: Partition, record: CacheRecord) -> Result<(), StoreError>;

    async fn delete(&self, partition: Partition, key: &str) -> Result<(), StoreError>;

    /// Removes every record of one partition; a no-op when it is empty
    async fn clear(&self, partition: Partition) -> Result<(), StoreError>;

    /// Backend name for logs
    fn name(&self) -> &'static str;
}
