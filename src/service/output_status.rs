//! Spent/unspent resolution for single outputs

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::address::MAX_SCAN_BLOCKS;
use super::ExplorerService;
use crate::blockchain::models::BlockTx;
use crate::cache::CacheKey;
use crate::db::Partition;

/// Mempool transactions inspected concurrently while looking for a spender
const MEMPOOL_SCAN_BATCH: usize = 10;
/// How long a fruitless block scan is trusted
const SPENDER_MISS_TTL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_SPENDER_SCAN_BLOCKS: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum OutputStatus {
    Unspent,
    Spent {
        #[serde(rename = "spendingTx")]
        spending_tx: String,
    },
    /// Not in the UTXO set and no spender could be located
    SpentUnknownSpender,
}

impl OutputStatus {
    pub fn is_spent(&self) -> bool {
        !matches!(self, OutputStatus::Unspent)
    }
}

impl ExplorerService {
    /// Resolve `txid:vout` through the UTXO set, the spent index and the
    /// mempool in that order. A recorded `Spent` is never replaced.
    pub async fn get_output_status(&self, txid: &str, vout: u32) -> OutputStatus {
        let key = CacheKey::output_status(txid, vout).to_string();
        let ttl = self.client.durations().utxo();

        if let Some(cached) = self.client.load::<OutputStatus>(Partition::OutputStatus, &key).await {
            if matches!(cached.value, OutputStatus::Spent { .. }) || self.client.is_fresh(cached.stored_at, ttl) {
                return cached.value;
            }
        }

        let status = match self.get_tx_out(txid, vout, true).await {
            Ok(Some(_)) => OutputStatus::Unspent,
            Ok(None) => self.locate_spender(txid, vout).await,
            Err(e) => {
                warn!("UTXO lookup failed for {}:{}: {}", txid, vout, e);
                return OutputStatus::SpentUnknownSpender;
            }
        };

        self.store_output_status(&key, status).await
    }

    async fn locate_spender(&self, txid: &str, vout: u32) -> OutputStatus {
        if let Some(info) = self.get_spent_info(txid, vout).await {
            return OutputStatus::Spent { spending_tx: info.txid };
        }

        let mempool = match self.get_mempool_transactions().await {
            Ok(mempool) => mempool,
            Err(e) => {
                warn!("Mempool unavailable while resolving {}:{}: {}", txid, vout, e);
                return OutputStatus::SpentUnknownSpender;
            }
        };

        let candidates: Vec<&String> = mempool.keys().collect();
        for batch in candidates.chunks(MEMPOOL_SCAN_BATCH) {
            let lookups = batch.iter().map(|candidate| async move {
                match self.get_transaction_details(candidate).await {
                    Ok(details) => details.tx.input_spending(txid, vout).map(|_| candidate.to_string()),
                    Err(e) => {
                        debug!("Skipping mempool tx {}: {}", candidate, e);
                        None
                    }
                }
            });

            if let Some(spender) = join_all(lookups).await.into_iter().flatten().next() {
                return OutputStatus::Spent { spending_tx: spender };
            }
        }

        OutputStatus::SpentUnknownSpender
    }

    /// Writes `status` unless a `Spent` result was recorded meanwhile, and
    /// returns whichever status is now on record
    async fn store_output_status(&self, key: &str, status: OutputStatus) -> OutputStatus {
        if !matches!(status, OutputStatus::Spent { .. }) {
            if let Some(cached) = self.client.load::<OutputStatus>(Partition::OutputStatus, key).await {
                if matches!(cached.value, OutputStatus::Spent { .. }) {
                    return cached.value;
                }
            }
        }

        self.client.save(Partition::OutputStatus, key, &status).await;
        status
    }

    /// Walk back up to `max_blocks` blocks from the tip looking for the
    /// transaction spending `txid:vout`. The walk never exceeds
    /// [`MAX_SCAN_BLOCKS`].
    pub async fn find_spending_tx(&self, txid: &str, vout: u32, max_blocks: u64) -> Option<String> {
        let max_blocks = max_blocks.min(MAX_SCAN_BLOCKS);
        let key = CacheKey::FindSpendingTx {
            txid: txid.to_string(),
            vout,
        }
        .to_string();

        if let Some(cached) = self.client.load::<Option<String>>(Partition::SpendingTx, &key).await {
            if cached.value.is_some() || self.client.is_fresh(cached.stored_at, SPENDER_MISS_TTL) {
                return cached.value;
            }
        }

        let tip = match self.get_block_count().await {
            Ok(tip) => tip,
            Err(e) => {
                warn!("Cannot scan for spender of {}:{}: {}", txid, vout, e);
                return None;
            }
        };

        let lowest = (tip + 1).saturating_sub(max_blocks);
        let mut found = None;

        'blocks: for height in (lowest..=tip).rev() {
            let block = match self.get_block_hash(height).await {
                Ok(hash) => self.get_block(&hash, 2).await,
                Err(e) => Err(e),
            };
            let block = match block {
                Ok(block) => block,
                Err(e) => {
                    warn!("Error checking block {}: {}", height, e);
                    continue;
                }
            };

            for entry in &block.tx {
                let spends = match entry {
                    BlockTx::Full(tx) => tx.input_spending(txid, vout).is_some(),
                    BlockTx::Id(id) => match self.get_transaction(id).await {
                        Ok(tx) => tx.input_spending(txid, vout).is_some(),
                        Err(e) => {
                            debug!("Skipping tx {} in block {}: {}", id, height, e);
                            false
                        }
                    },
                };

                if spends {
                    found = Some(entry.txid().to_string());
                    break 'blocks;
                }
            }
        }

        self.client.save(Partition::SpendingTx, &key, &found).await;
        found
    }
}
