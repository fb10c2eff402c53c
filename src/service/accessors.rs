//! Per-domain getters over the read-through client

use futures::future::join_all;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, warn};

use super::{decode, ExplorerService};
use crate::blockchain::models::{AddressBalance, AddressUtxo, AssetData, Block, SpentInfo, Transaction, TxOut};
use crate::blockchain::RpcError;
use crate::cache::{AddressQuery, CacheKey};
use crate::db::Partition;
use crate::models::{AggregateAddressRecord, BlockDetails, BlockMetadata, LatestBlocks, TransactionDetails};

/// Confirmed transaction and block details are rebuilt after this long, as
/// their confirmation counts move on
const DETAILS_REFRESH: Duration = Duration::from_secs(60 * 60);

impl ExplorerService {
    // Chain tip and statistics

    pub async fn get_block_count(&self) -> Result<u64, RpcError> {
        self.client.call_as("getblockcount", vec![]).await
    }

    pub async fn get_best_block_hash(&self) -> Result<String, RpcError> {
        self.client.call_as("getbestblockhash", vec![]).await
    }

    pub async fn get_difficulty(&self) -> Result<Value, RpcError> {
        self.client.call("getdifficulty", vec![]).await
    }

    pub async fn get_blockchain_info(&self) -> Result<Value, RpcError> {
        self.client.call("getblockchaininfo", vec![]).await
    }

    pub async fn get_chain_tips(&self) -> Result<Value, RpcError> {
        self.client.call("getchaintips", vec![]).await
    }

    pub async fn get_chain_tx_stats(&self, nblocks: Option<u64>, blockhash: Option<&str>) -> Result<Value, RpcError> {
        let mut params = Vec::new();
        if let Some(nblocks) = nblocks {
            params.push(json!(nblocks));
        }
        if let Some(hash) = blockhash.filter(|h| !h.is_empty()) {
            params.push(json!(hash));
        }
        self.client.call("getchaintxstats", params).await
    }

    pub async fn get_network_hash_ps(&self, nblocks: i64, height: i64) -> Result<Value, RpcError> {
        self.client.call("getnetworkhashps", vec![json!(nblocks), json!(height)]).await
    }

    // Mempool

    pub async fn get_mempool_info(&self) -> Result<Value, RpcError> {
        self.client.call("getmempoolinfo", vec![]).await
    }

    pub async fn get_raw_mempool(&self, verbose: bool) -> Result<Value, RpcError> {
        self.client.call("getrawmempool", vec![json!(verbose)]).await
    }

    pub async fn get_mempool_entry(&self, txid: &str) -> Result<Value, RpcError> {
        self.client.call("getmempoolentry", vec![json!(txid)]).await
    }

    pub async fn get_mempool_ancestors(&self, txid: &str, verbose: bool) -> Result<Value, RpcError> {
        self.client.call("getmempoolancestors", vec![json!(txid), json!(verbose)]).await
    }

    pub async fn get_mempool_descendants(&self, txid: &str, verbose: bool) -> Result<Value, RpcError> {
        self.client.call("getmempooldescendants", vec![json!(txid), json!(verbose)]).await
    }

    /// Verbose mempool keyed by txid
    pub async fn get_mempool_transactions(&self) -> Result<Map<String, Value>, RpcError> {
        let key = CacheKey::Mempool.to_string();
        let ttl = self.client.durations().mempool();

        if let Some(mempool) = self.client.load_fresh(Partition::Mempool, &key, ttl).await {
            return Ok(mempool);
        }

        let value = self.client.call("getrawmempool", vec![json!(true)]).await?;
        let mempool: Map<String, Value> = decode("getrawmempool", value)?;
        self.client.save(Partition::Mempool, &key, &mempool).await;

        Ok(mempool)
    }

    // Blocks

    pub async fn get_block_hash(&self, height: u64) -> Result<String, RpcError> {
        let key = height.to_string();
        if let Some(cached) = self.client.load::<String>(Partition::HeightToHash, &key).await {
            return Ok(cached.value);
        }

        let hash: String = self.client.call_as("getblockhash", vec![json!(height)]).await?;
        self.client.save(Partition::HeightToHash, &key, &hash).await;

        Ok(hash)
    }

    pub async fn get_block(&self, hash: &str, verbosity: u8) -> Result<Block, RpcError> {
        let key = format!("{}_{}", hash, verbosity);
        if let Some(cached) = self.client.load::<Block>(Partition::Blocks, &key).await {
            return Ok(cached.value);
        }

        let block: Block = self
            .client
            .call_as("getblock", vec![json!(hash), json!(verbosity)])
            .await?;

        self.client.save(Partition::Blocks, &key, &block).await;
        self.client
            .save(Partition::HeightToHash, &block.height.to_string(), &block.hash)
            .await;

        Ok(block)
    }

    pub async fn get_block_header(&self, hash: &str, verbose: bool) -> Result<Value, RpcError> {
        self.client.call("getblockheader", vec![json!(hash), json!(verbose)]).await
    }

    pub async fn decode_block(&self, block_hex: &str) -> Result<Value, RpcError> {
        self.client.call("decodeblock", vec![json!(block_hex)]).await
    }

    pub async fn get_block_metadata(&self, height: u64) -> Result<BlockMetadata, RpcError> {
        let key = height.to_string();
        if let Some(cached) = self.client.load(Partition::BlockMetadata, &key).await {
            return Ok(cached.value);
        }

        let hash = self.get_block_hash(height).await?;
        let block = self.get_block(&hash, 1).await?;

        let metadata = BlockMetadata {
            height,
            hash: block.hash,
            time: block.time,
            size: block.size,
            tx_count: block.tx.len(),
        };
        self.client.save(Partition::BlockMetadata, &key, &metadata).await;

        Ok(metadata)
    }

    /// Up to `count` blocks walking down from `start` (the tip when absent or
    /// above it), newest first
    pub async fn get_latest_blocks_metadata(&self, start: Option<u64>, count: u32) -> Result<LatestBlocks, RpcError> {
        let block_count = self.get_block_count().await?;
        let top = start.filter(|h| *h <= block_count).unwrap_or(block_count);

        let key = CacheKey::BlockRange { start: top, count }.to_string();
        let ttl = self.client.durations().block_count();
        if let Some(latest) = self.client.load_fresh(Partition::BlockRanges, &key, ttl).await {
            return Ok(latest);
        }

        let n = (count as u64).min(top + 1);
        let fetches = (0..n).map(|i| self.get_block_metadata(top - i));
        let mut metadatas = join_all(fetches)
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;

        // Completion order is arbitrary
        metadatas.sort_by(|a, b| b.height.cmp(&a.height));

        let latest = LatestBlocks {
            metadatas,
            current_height: block_count,
        };
        self.client.save(Partition::BlockRanges, &key, &latest).await;

        Ok(latest)
    }

    /// `id` is a height or a block hash
    pub async fn get_block_details(&self, id: &str) -> Result<BlockDetails, RpcError> {
        let height = if id.len() < 64 { id.parse::<u64>().ok() } else { None };
        let hash = match height {
            Some(height) => self.get_block_hash(height).await?,
            None => id.to_string(),
        };

        if let Some(details) = self
            .client
            .load_fresh(Partition::BlockDetails, &hash, DETAILS_REFRESH)
            .await
        {
            return Ok(details);
        }

        let block = self.get_block(&hash, 2).await?;
        let current_height = self.get_block_count().await?;
        let confirmations = current_height.saturating_sub(block.height) + 1;

        let details = BlockDetails {
            block,
            confirmations,
            current_height,
        };
        self.client.save(Partition::BlockDetails, &hash, &details).await;

        Ok(details)
    }

    // Transactions and outputs

    /// Confirmed transactions are kept for good; unconfirmed ones are
    /// refetched after the mempool duration.
    pub async fn get_transaction(&self, txid: &str) -> Result<Transaction, RpcError> {
        let mempool_ttl = self.client.durations().mempool();

        if let Some(cached) = self.client.load::<Transaction>(Partition::Transactions, txid).await {
            if cached.value.is_confirmed() || self.client.is_fresh(cached.stored_at, mempool_ttl) {
                return Ok(cached.value);
            }
        }

        let value = self
            .client
            .refresh("getrawtransaction", vec![json!(txid), json!(1)])
            .await?;
        let mut tx: Transaction = decode("getrawtransaction", value)?;

        if tx.blockheight.is_none() {
            if let Some(blockhash) = tx.blockhash.clone() {
                match self.get_block_header(&blockhash, true).await {
                    Ok(header) => tx.blockheight = header.get("height").and_then(Value::as_u64),
                    Err(e) => warn!("Failed to get block height for tx {}: {}", txid, e),
                }
            }
        }

        self.client.save(Partition::Transactions, txid, &tx).await;
        Ok(tx)
    }

    pub async fn get_transaction_details(&self, txid: &str) -> Result<TransactionDetails, RpcError> {
        if let Some(cached) = self
            .client
            .load::<TransactionDetails>(Partition::TransactionDetails, txid)
            .await
        {
            let ttl = if cached.value.confirmations > 1 {
                DETAILS_REFRESH
            } else {
                self.client.durations().mempool()
            };
            if self.client.is_fresh(cached.stored_at, ttl) {
                return Ok(cached.value);
            }
        }

        let tx = self.get_transaction(txid).await?;
        let current_height = self.get_block_count().await?;

        let blockheight = tx.blockheight;
        let confirmations = blockheight
            .map(|h| current_height.saturating_sub(h) + 1)
            .unwrap_or(0);

        let details = TransactionDetails {
            tx,
            blockheight,
            confirmations,
            current_height,
        };
        self.client.save(Partition::TransactionDetails, txid, &details).await;

        Ok(details)
    }

    /// `None` when the output is spent or unknown
    pub async fn get_tx_out(&self, txid: &str, n: u32, include_mempool: bool) -> Result<Option<TxOut>, RpcError> {
        self.client
            .call_as("gettxout", vec![json!(txid), json!(n), json!(include_mempool)])
            .await
    }

    pub async fn get_tx_out_proof(&self, txids: &[String], blockhash: Option<&str>) -> Result<String, RpcError> {
        let mut params = vec![json!(txids)];
        if let Some(hash) = blockhash.filter(|h| !h.is_empty()) {
            params.push(json!(hash));
        }
        self.client.call_as("gettxoutproof", params).await
    }

    /// Spending input of `txid:vout` from the spent index. Found spenders are
    /// kept for good; misses and errors are remembered for the UTXO duration.
    pub async fn get_spent_info(&self, txid: &str, vout: u32) -> Option<SpentInfo> {
        let key = CacheKey::SpentInfo {
            txid: txid.to_string(),
            vout,
        }
        .to_string();

        if let Some(cached) = self.client.load::<Option<SpentInfo>>(Partition::SpendingTx, &key).await {
            if cached.value.is_some() || self.client.is_fresh(cached.stored_at, self.client.durations().utxo()) {
                return cached.value;
            }
        }

        let info = match self
            .client
            .call_as::<Option<SpentInfo>>("getspentinfo", vec![json!({ "txid": txid, "index": vout })])
            .await
        {
            Ok(info) => info,
            Err(e) => {
                debug!("getspentinfo failed for {}:{}: {}", txid, vout, e);
                None
            }
        };

        self.client.save(Partition::SpendingTx, &key, &info).await;
        info
    }

    // Address index

    pub async fn get_address_balance(&self, query: &AddressQuery) -> Result<AddressBalance, RpcError> {
        self.client.call_as("getaddressbalance", vec![query.to_param()]).await
    }

    pub async fn get_address_deltas(&self, query: &AddressQuery, start: Option<u64>, end: Option<u64>) -> Result<Value, RpcError> {
        let param = match (start, end) {
            (Some(start), Some(end)) => query.to_range_param(start, end),
            _ => query.to_param(),
        };
        self.client.call("getaddressdeltas", vec![param]).await
    }

    pub async fn get_address_mempool(&self, query: &AddressQuery) -> Result<Value, RpcError> {
        self.client.call("getaddressmempool", vec![query.to_param()]).await
    }

    /// For a single address the aggregate record and the per-address UTXO
    /// record are consulted first
    pub async fn get_address_utxos(&self, query: &AddressQuery) -> Result<Vec<AddressUtxo>, RpcError> {
        let ttl = self.client.durations().utxo();

        if let Some(address) = query.single() {
            if let Some(full) = self
                .client
                .load::<AggregateAddressRecord>(Partition::AddressFull, address)
                .await
            {
                if let (Some(utxos), Some(at)) = (full.value.utxos, full.value.utxos_at) {
                    if self.client.is_fresh(at, ttl) {
                        return Ok(utxos);
                    }
                }
            }

            if let Some(utxos) = self.client.load_fresh(Partition::Utxos, address, ttl).await {
                return Ok(utxos);
            }
        }

        let utxos: Vec<AddressUtxo> = self
            .client
            .call_as("getaddressutxos", vec![query.to_param()])
            .await?;

        if let Some(address) = query.single() {
            self.client.save(Partition::Utxos, address, &utxos).await;

            let now = self.client.now();
            let snapshot = utxos.clone();
            self.update_existing_aggregate(address, move |record| {
                record.utxos = Some(snapshot);
                record.utxos_at = Some(now);
            })
            .await;
        }

        Ok(utxos)
    }

    // Assets

    /// Names are case-insensitive; lookups use the upper-cased form
    pub async fn get_asset_data(&self, name: &str) -> Result<AssetData, RpcError> {
        let name = name.to_uppercase();
        let ttl = self.client.durations().asset_data();

        if let Some(data) = self.client.load_fresh(Partition::AssetData, &name, ttl).await {
            return Ok(data);
        }

        let data: AssetData = self.client.call_as("getassetdata", vec![json!(name)]).await?;
        self.client.save(Partition::AssetData, &name, &data).await;

        Ok(data)
    }

    pub async fn list_addresses_by_asset(&self, name: &str, only_total: bool, count: u32, start: u32) -> Result<Value, RpcError> {
        let name = name.to_uppercase();
        let key = CacheKey::AssetHolders {
            name: name.clone(),
            only_total,
            count,
            start,
        }
        .to_string();
        let ttl = self.client.durations().asset_data();

        if let Some(holders) = self.client.load_fresh(Partition::AssetHolders, &key, ttl).await {
            return Ok(holders);
        }

        let holders = self
            .client
            .call(
                "listaddressesbyasset",
                vec![json!(name), json!(only_total), json!(count), json!(start)],
            )
            .await?;
        self.client.save(Partition::AssetHolders, &key, &holders).await;

        Ok(holders)
    }

    pub async fn list_asset_balances_by_address(&self, address: &str, only_total: bool, count: u32, start: u32) -> Result<Value, RpcError> {
        self.client
            .call(
                "listassetbalancesbyaddress",
                vec![json!(address), json!(only_total), json!(count), json!(start)],
            )
            .await
    }

    pub async fn list_assets(&self, asset: &str, verbose: bool, count: u64, start: u64) -> Result<Value, RpcError> {
        self.client
            .call("listassets", vec![json!(asset), json!(verbose), json!(count), json!(start)])
            .await
    }

    // Raw transactions

    pub async fn combine_raw_transaction(&self, hex_strings: &[String]) -> Result<Value, RpcError> {
        self.client.call("combinerawtransaction", vec![json!(hex_strings)]).await
    }

    pub async fn create_raw_transaction(&self, inputs: Value, outputs: Value) -> Result<Value, RpcError> {
        self.client.call("createrawtransaction", vec![inputs, outputs]).await
    }

    pub async fn decode_raw_transaction(&self, hex: &str) -> Result<Value, RpcError> {
        self.client.call("decoderawtransaction", vec![json!(hex)]).await
    }

    pub async fn decode_script(&self, hex: &str) -> Result<Value, RpcError> {
        self.client.call("decodescript", vec![json!(hex)]).await
    }

    /// Never cached
    pub async fn send_raw_transaction(&self, hex: &str, allow_high_fees: bool) -> Result<Value, RpcError> {
        self.client
            .call("sendrawtransaction", vec![json!(hex), json!(allow_high_fees)])
            .await
    }

    /// Never cached
    pub async fn test_mempool_accept(&self, raw_txs: &[String], allow_high_fees: bool) -> Result<Value, RpcError> {
        self.client
            .call("testmempoolaccept", vec![json!(raw_txs), json!(allow_high_fees)])
            .await
    }

    pub async fn help(&self, command: Option<&str>) -> Result<Value, RpcError> {
        let params = command.map(|c| vec![json!(c)]).unwrap_or_default();
        self.client.call("help", params).await
    }
}
