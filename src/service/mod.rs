//! Explorer views assembled from read-through calls and derived cache records

pub mod accessors;
pub mod address;
pub mod analysis;
pub mod output_status;
pub mod search;
pub mod tracer;
pub mod warmer;

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::blockchain::RpcError;
use crate::cache::CacheClient;
use crate::db::Partition;
use crate::models::AggregateAddressRecord;

pub use address::{merge_recent_first, plan_block_ranges, ranges_for_page, BlockRange};
pub use output_status::OutputStatus;
pub use search::SearchTarget;
pub use tracer::{FundFlowTracer, TraceFilters, TraceGraph, TraceRegistry};

pub struct ExplorerService {
    client: Arc<CacheClient>,
    /// Addresses whose background warm-up has been started this process
    warmed: Mutex<HashSet<String>>,
    /// Serializes read-modify-write cycles on aggregate address records
    aggregate_lock: tokio::sync::Mutex<()>,
}

impl ExplorerService {
    pub fn new(client: Arc<CacheClient>) -> Self {
        Self {
            client,
            warmed: Mutex::new(HashSet::new()),
            aggregate_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn client(&self) -> &Arc<CacheClient> {
        &self.client
    }

    /// Apply `update` to the aggregate record of `address`, creating it when
    /// absent
    pub(crate) async fn update_aggregate<F>(&self, address: &str, update: F) -> AggregateAddressRecord
    where
        F: FnOnce(&mut AggregateAddressRecord) + Send,
    {
        let _guard = self.aggregate_lock.lock().await;

        let mut record = self
            .client
            .load::<AggregateAddressRecord>(Partition::AddressFull, address)
            .await
            .map(|cached| cached.value)
            .unwrap_or_else(|| AggregateAddressRecord::new(address));

        update(&mut record);
        self.client.save(Partition::AddressFull, address, &record).await;

        record
    }

    /// Like [`ExplorerService::update_aggregate`] but leaves addresses without
    /// a record untouched
    pub(crate) async fn update_existing_aggregate<F>(&self, address: &str, update: F)
    where
        F: FnOnce(&mut AggregateAddressRecord) + Send,
    {
        let _guard = self.aggregate_lock.lock().await;

        if let Some(cached) = self
            .client
            .load::<AggregateAddressRecord>(Partition::AddressFull, address)
            .await
        {
            let mut record = cached.value;
            update(&mut record);
            self.client.save(Partition::AddressFull, address, &record).await;
        }
    }
}

/// Name the address index uses for the base coin
pub const BASE_ASSET: &str = "EVR";

pub(crate) const SATOSHIS_PER_COIN: f64 = 100_000_000.0;

/// Base-coin amount with 8 decimals
pub fn format_satoshis(satoshis: i64) -> String {
    format!("{:.8}", satoshis as f64 / SATOSHIS_PER_COIN)
}

/// Asset amount with as many decimals as the asset's `units`
pub fn format_asset_amount(amount: f64, units: u32) -> String {
    format!("{:.*}", units as usize, amount)
}

pub(crate) fn decode<T: DeserializeOwned>(method: &str, value: Value) -> Result<T, RpcError> {
    serde_json::from_value(value).map_err(|e| RpcError::Decode {
        method: method.to_string(),
        reason: e.to_string(),
    })
}
