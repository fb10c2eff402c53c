//! Per-method cache duration policy

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Coarse duration bucket a method belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheClass {
    Volatile,
    Short,
    Medium,
    Long,
    Day,
    Indefinite,
}

/// Duration slot assigned to a method. The assignment is fixed; only the
/// durations behind the configurable slots change at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CachePolicy {
    /// Chain tip counters
    ChainTip,
    Mempool,
    /// UTXO, balance and spent-info lookups
    Utxo,
    TxHistory,
    AssetData,
    /// Chain statistics, fixed at five minutes
    ChainStats,
    /// Data keyed by an immutable hash, or deterministic functions
    Immutable,
    /// Methods missing from the table, fixed at sixty seconds
    Unclassified,
    /// State-changing calls: never read from or written to the cache
    Uncached,
}

pub const CHAIN_STATS_DURATION: Duration = Duration::from_secs(5 * 60);
pub const UNCLASSIFIED_DURATION: Duration = Duration::from_secs(60);

impl CachePolicy {
    pub fn class(&self) -> CacheClass {
        match self {
            CachePolicy::ChainTip | CachePolicy::Mempool | CachePolicy::Unclassified => CacheClass::Short,
            CachePolicy::Utxo | CachePolicy::ChainStats => CacheClass::Medium,
            CachePolicy::TxHistory => CacheClass::Long,
            CachePolicy::AssetData => CacheClass::Day,
            CachePolicy::Immutable => CacheClass::Indefinite,
            CachePolicy::Uncached => CacheClass::Volatile,
        }
    }

    pub fn is_cacheable(&self) -> bool {
        !matches!(self, CachePolicy::Uncached)
    }
}

pub fn policy_for(method: &str) -> CachePolicy {
    match method {
        "getblockcount" | "getbestblockhash" | "getdifficulty" => CachePolicy::ChainTip,

        "getrawmempool"
        | "getmempoolinfo"
        | "getmempoolentry"
        | "getmempoolancestors"
        | "getmempooldescendants"
        | "getaddressmempool" => CachePolicy::Mempool,

        "getaddressutxos"
        | "getaddressbalance"
        | "listassetbalancesbyaddress"
        | "gettxout"
        | "getspentinfo" => CachePolicy::Utxo,

        "getaddresstxids" | "getaddressdeltas" => CachePolicy::TxHistory,

        "getassetdata" | "listassets" | "listaddressesbyasset" => CachePolicy::AssetData,

        "getblockhash"
        | "getblock"
        | "getblockheader"
        | "gettxoutproof"
        | "getrawtransaction"
        | "decodeblock"
        | "decoderawtransaction"
        | "decodescript"
        | "combinerawtransaction"
        | "createrawtransaction"
        | "help" => CachePolicy::Immutable,

        "getchaintips" | "getchaintxstats" | "getnetworkhashps" | "getblockchaininfo" => {
            CachePolicy::ChainStats
        }

        "sendrawtransaction" | "signrawtransaction" | "testmempoolaccept" => CachePolicy::Uncached,

        _ => CachePolicy::Unclassified,
    }
}

/// The six user-configurable durations, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheDurations {
    pub address_data: u64,
    pub block_count: u64,
    pub mempool: u64,
    pub utxo: u64,
    pub tx_history: u64,
    pub asset_data: u64,
}

impl Default for CacheDurations {
    fn default() -> Self {
        Self {
            address_data: 3_600_000,
            block_count: 60_000,
            mempool: 30_000,
            utxo: 1_800_000,
            tx_history: 3_600_000,
            asset_data: 86_400_000,
        }
    }
}

impl CacheDurations {
    /// `None` means the policy never expires
    pub fn duration_for(&self, policy: CachePolicy) -> Option<Duration> {
        match policy {
            CachePolicy::ChainTip => Some(Duration::from_millis(self.block_count)),
            CachePolicy::Mempool => Some(Duration::from_millis(self.mempool)),
            CachePolicy::Utxo => Some(Duration::from_millis(self.utxo)),
            CachePolicy::TxHistory => Some(Duration::from_millis(self.tx_history)),
            CachePolicy::AssetData => Some(Duration::from_millis(self.asset_data)),
            CachePolicy::ChainStats => Some(CHAIN_STATS_DURATION),
            CachePolicy::Unclassified => Some(UNCLASSIFIED_DURATION),
            CachePolicy::Uncached => Some(Duration::ZERO),
            CachePolicy::Immutable => None,
        }
    }

    pub fn address_data(&self) -> Duration {
        Duration::from_millis(self.address_data)
    }

    pub fn mempool(&self) -> Duration {
        Duration::from_millis(self.mempool)
    }

    pub fn utxo(&self) -> Duration {
        Duration::from_millis(self.utxo)
    }

    pub fn block_count(&self) -> Duration {
        Duration::from_millis(self.block_count)
    }

    pub fn asset_data(&self) -> Duration {
        Duration::from_millis(self.asset_data)
    }
}

/// A record stored at `stored_at` is valid at `now` when the policy never
/// expires or its age is strictly below the duration.
pub fn is_valid(max_age: Option<Duration>, stored_at: i64, now: i64) -> bool {
    match max_age {
        None => true,
        Some(max_age) => now.saturating_sub(stored_at) < max_age.as_millis() as i64,
    }
}
