//! Background cache warming

use std::sync::{Arc, PoisonError};
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::address::{merge_recent_first, MAX_SCAN_BLOCKS, PAGE_SIZE};
use super::{format_satoshis, ExplorerService};
use crate::blockchain::models::{AddressBalance, AddressUtxo};
use crate::blockchain::RpcError;
use crate::cache::AddressQuery;

/// Pages written ahead of time for a warmed address
pub const WARM_PAGES: usize = 5;
const PRELOAD_BLOCKS: u32 = 10;

impl ExplorerService {
    /// Fetch the full lookback window of txids plus balance, UTXOs and assets
    /// for `address`, fold them into its aggregate record and pre-write the
    /// first pages. Returns whether it succeeded.
    pub async fn optimize_address_cache(&self, address: &str) -> bool {
        info!("Optimizing cache for address {}", address);

        match self.warm_address(address).await {
            Ok(count) => {
                info!(
                    "Address cache optimization complete for {}, cached {} transactions",
                    address, count
                );
                true
            }
            Err(e) => {
                error!("Error optimizing address cache for {}: {}", address, e);
                false
            }
        }
    }

    async fn warm_address(&self, address: &str) -> Result<usize, RpcError> {
        let query = AddressQuery::from(address);
        let tip = self.get_block_count().await?;
        let start = tip.saturating_sub(MAX_SCAN_BLOCKS);

        let mut txids: Vec<String> = self
            .client
            .call_as("getaddresstxids", vec![query.to_range_param(start, tip)])
            .await?;
        txids.reverse();

        let balance: AddressBalance = self
            .client
            .call_as("getaddressbalance", vec![query.to_param()])
            .await?;
        let utxos: Vec<AddressUtxo> = self
            .client
            .call_as("getaddressutxos", vec![query.to_param()])
            .await?;
        let assets = self.get_assets_for_address(address).await;

        let now = self.client.now();
        let record = self
            .update_aggregate(address, move |record| {
                record.all_txids = merge_recent_first(&record.all_txids, &txids, true);
                record.complete |= start == 0;
                record.txids_at = Some(now);
                record.balance = Some(format_satoshis(balance.balance));
                record.raw_balance = Some(balance);
                record.balance_at = Some(now);
                record.utxos = Some(utxos);
                record.utxos_at = Some(now);
                record.asset_balances = Some(assets);
                record.assets_at = Some(now);
            })
            .await;

        let pages = record.all_txids.len().div_ceil(PAGE_SIZE).min(WARM_PAGES);
        for page in 1..=pages as u32 {
            let (page_txids, has_more) = record.page(page, PAGE_SIZE);
            self.save_page(address, page, &page_txids, has_more).await;
        }

        Ok(record.all_txids.len())
    }

    /// Start warming `address` in the background unless that already happened
    /// in this process. The handle resolves to the warm-up result.
    pub fn spawn_address_warmup(self: &Arc<Self>, address: &str) -> Option<JoinHandle<bool>> {
        let first = self
            .warmed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address.to_string());
        if !first {
            return None;
        }

        let service = self.clone();
        let address = address.to_string();
        Some(tokio::spawn(async move { service.optimize_address_cache(&address).await }))
    }

    /// Warm the chain-level views every page shows
    pub async fn preload_common_data(&self) -> bool {
        info!("Preloading common data to warm cache");

        let result: Result<(), RpcError> = async {
            self.get_block_count().await?;
            self.get_latest_blocks_metadata(None, PRELOAD_BLOCKS).await?;
            self.get_blockchain_info().await?;
            self.get_difficulty().await?;
            self.get_network_hash_ps(120, -1).await?;
            self.get_mempool_info().await?;
            self.get_raw_mempool(true).await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                info!("Cache preloading complete");
                true
            }
            Err(e) => {
                error!("Error preloading cache: {}", e);
                false
            }
        }
    }
}
