//! Address summaries and paginated transaction history

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, error, info, warn};

use super::{format_asset_amount, format_satoshis, ExplorerService, BASE_ASSET, SATOSHIS_PER_COIN};
use crate::blockchain::models::{AddressBalance, AddressUtxo};
use crate::blockchain::RpcError;
use crate::cache::{AddressQuery, CacheKey};
use crate::db::Partition;
use crate::models::{AddressDetails, AggregateAddressRecord, AssetBalance, PageRecord, TxidPage};

pub const PAGE_SIZE: usize = 10;
/// Width of the first (most recent) block window
pub const INITIAL_WINDOW: u64 = 10;
/// Most windows planned for one scan
pub const MAX_RANGES: usize = 8;
/// Most blocks covered by one scan
pub const MAX_SCAN_BLOCKS: u64 = 10_000;

/// Inclusive block height window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    pub start: u64,
    pub end: u64,
}

impl BlockRange {
    fn blocks(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Windows walking back from `tip`, newest first, each twice as wide as the
/// one before it.
pub fn plan_block_ranges(tip: u64) -> Vec<BlockRange> {
    let mut ranges = Vec::new();
    let mut scan_start = tip;
    let mut window = INITIAL_WINDOW;
    let mut scanned = 0;

    while scan_start > 0 && ranges.len() < MAX_RANGES && scanned + window <= MAX_SCAN_BLOCKS {
        let start = scan_start.saturating_sub(window - 1);
        let range = BlockRange { start, end: scan_start };
        scanned += range.blocks();
        ranges.push(range);

        if start == 0 {
            break;
        }
        scan_start = start - 1;
        window *= 2;
    }

    ranges
}

/// Windows scanned for `page`. Later pages start further down the plan; this
/// is an approximation and does not line up with exact txid offsets.
pub fn ranges_for_page(ranges: &[BlockRange], page: u32) -> &[BlockRange] {
    if ranges.is_empty() {
        return ranges;
    }

    let offset = (page.max(1) as usize - 1) * ranges.len() / 2;
    let from = offset.min(ranges.len() - 1);
    let to = (offset + MAX_RANGES).min(ranges.len());

    &ranges[from..to]
}

/// Merge `fetched` into `existing`, both most-recent-first. Unknown txids
/// are placed next to the known txids they were fetched alongside; with no
/// known txid to anchor on they go in front when `fetched_newer`, else at
/// the back. Nothing in `existing` is dropped or reordered.
pub fn merge_recent_first(existing: &[String], fetched: &[String], fetched_newer: bool) -> Vec<String> {
    let mut merged = existing.to_vec();
    let mut known: HashSet<String> = existing.iter().cloned().collect();
    let mut leading = Vec::new();
    let mut cursor: Option<usize> = None;

    for txid in fetched {
        if let Some(pos) = merged.iter().position(|known_id| known_id == txid) {
            if cursor.is_none() && !leading.is_empty() {
                let count = leading.len();
                merged.splice(pos..pos, leading.drain(..));
                cursor = Some(pos + count + 1);
            } else {
                cursor = Some(pos + 1);
            }
            continue;
        }

        if !known.insert(txid.clone()) {
            continue;
        }

        match cursor.as_mut() {
            Some(at) => {
                merged.insert(*at, txid.clone());
                *at += 1;
            }
            None => leading.push(txid.clone()),
        }
    }

    if !leading.is_empty() {
        if fetched_newer {
            merged.splice(0..0, leading);
        } else {
            merged.extend(leading);
        }
    }

    merged
}

/// Balance and UTXOs fetched together for the detail view
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BalanceSnapshot {
    balance: AddressBalance,
    utxos: Vec<AddressUtxo>,
}

impl ExplorerService {
    /// One page of txids for `query`, most recent first
    pub async fn get_address_txids(&self, query: &AddressQuery, page: u32) -> Result<TxidPage, RpcError> {
        self.collect_address_txids(query, page).await.map(|(txids, _)| txids)
    }

    /// Page of txids plus whether every block window answered. Pages built
    /// while a window was failing are returned but never cached.
    async fn collect_address_txids(&self, query: &AddressQuery, page: u32) -> Result<(TxidPage, bool), RpcError> {
        let page = page.max(1);
        let ttl = self.client.durations().address_data();
        let single = query.single().map(str::to_string);

        if let Some(address) = single.as_deref() {
            let page_key = CacheKey::address_page(address, page).to_string();
            if let Some(record) = self
                .client
                .load_fresh::<PageRecord>(Partition::AddressTxids, &page_key, ttl)
                .await
            {
                debug!("Page cache hit for address {} page {}", address, page);
                let has_more = record.txids.len() > PAGE_SIZE || record.has_more;
                let mut page_txids = record.txids;
                page_txids.truncate(PAGE_SIZE);
                return Ok((TxidPage { page_txids, has_more }, true));
            }

            if let Some(full) = self
                .client
                .load::<AggregateAddressRecord>(Partition::AddressFull, address)
                .await
            {
                let full = full.value;
                let fresh = full.txids_at.is_some_and(|at| self.client.is_fresh(at, ttl));
                let end = page as usize * PAGE_SIZE;
                if fresh && (full.complete || end < full.all_txids.len()) {
                    debug!("Aggregate cache hit for address {} page {}", address, page);
                    let (page_txids, has_more) = full.page(page, PAGE_SIZE);
                    self.save_page(address, page, &page_txids, has_more).await;
                    return Ok((TxidPage { page_txids, has_more }, true));
                }
            }
        }

        let tip = self.get_block_count().await?;
        let plan = plan_block_ranges(tip);
        let ranges = ranges_for_page(&plan, page);
        info!(
            "Scanning {} block ranges for {:?} page {}",
            ranges.len(),
            query.addresses(),
            page
        );

        let scans = ranges.iter().map(|range| async move { (*range, self.scan_range(query, *range).await) });
        let mut results = join_all(scans).await;
        results.sort_by_key(|(range, _)| range.start);

        let mut found = Vec::with_capacity(results.len());
        let mut failed = 0;
        for (range, scan) in results {
            match scan {
                Ok(txids) => found.push((range, txids)),
                Err(e) => {
                    warn!("Error searching blocks {}-{}: {}", range.start, range.end, e);
                    failed += 1;
                }
            }
        }
        let settled = failed == 0;

        // Oldest window first, then flipped to most recent first
        let mut seen = HashSet::new();
        let mut combined: Vec<String> = found
            .iter()
            .flat_map(|(_, txids)| txids.iter())
            .filter(|txid| seen.insert(txid.as_str()))
            .cloned()
            .collect();
        combined.reverse();

        let lowest_start = ranges.last().map(|range| range.start).unwrap_or(0);
        let has_more = combined.len() > PAGE_SIZE || (!combined.is_empty() && lowest_start > 0);

        if let Some(address) = single.as_deref().filter(|_| settled || !combined.is_empty()) {
            let fetched_newer = found.iter().any(|(range, _)| range.end == tip);
            let now = self.client.now();
            let fetched = combined.clone();
            let record = self
                .update_aggregate(address, move |record| {
                    record.all_txids = merge_recent_first(&record.all_txids, &fetched, fetched_newer);
                    if settled {
                        record.txids_at = Some(now);
                    }
                })
                .await;
            debug!(
                "Aggregate for {} now holds {} txids",
                address,
                record.all_txids.len()
            );
        }

        let page_txids: Vec<String> = combined.into_iter().take(PAGE_SIZE).collect();
        match single.as_deref() {
            Some(address) if settled => self.save_page(address, page, &page_txids, has_more).await,
            Some(address) => warn!(
                "{} of {} block ranges failed for {} page {}, page not cached",
                failed,
                ranges.len(),
                address,
                page
            ),
            None => {}
        }

        Ok((TxidPage { page_txids, has_more }, settled))
    }

    /// Txids for `query` inside one window. Only answered windows are cached.
    async fn scan_range(&self, query: &AddressQuery, range: BlockRange) -> Result<Vec<String>, RpcError> {
        let key = CacheKey::AddressRange {
            query: query.clone(),
            start: range.start,
            end: range.end,
        }
        .to_string();

        if let Some(cached) = self.client.load::<Vec<String>>(Partition::AddressTxids, &key).await {
            return Ok(cached.value);
        }

        let txids = self
            .client
            .call_as::<Vec<String>>("getaddresstxids", vec![query.to_range_param(range.start, range.end)])
            .await?;
        self.client.save(Partition::AddressTxids, &key, &txids).await;

        Ok(txids)
    }

    pub(crate) async fn save_page(&self, address: &str, page: u32, txids: &[String], has_more: bool) {
        let key = CacheKey::address_page(address, page).to_string();
        let record = PageRecord {
            txids: txids.to_vec(),
            has_more,
        };
        self.client.save(Partition::AddressTxids, &key, &record).await;
    }

    /// Balance, asset balances and one page of txids. Failures degrade to an
    /// empty summary.
    pub async fn get_address_details(&self, address: &str, page: u32) -> AddressDetails {
        let page = page.max(1);
        match self.build_address_details(address, page).await {
            Ok(details) => details,
            Err(e) => {
                error!("Error building details for {} page {}: {}", address, page, e);
                AddressDetails::empty(page)
            }
        }
    }

    async fn build_address_details(&self, address: &str, page: u32) -> Result<AddressDetails, RpcError> {
        let ttl = self.client.durations().address_data();
        let details_key = CacheKey::AddressDetails {
            address: address.to_string(),
            page,
        }
        .to_string();

        if let Some(details) = self.client.load_fresh(Partition::Results, &details_key, ttl).await {
            return Ok(details);
        }

        if let Some(full) = self
            .client
            .load::<AggregateAddressRecord>(Partition::AddressFull, address)
            .await
        {
            let full = full.value;
            let fresh = full.txids_at.is_some_and(|at| self.client.is_fresh(at, ttl));
            let end = page as usize * PAGE_SIZE;
            if let Some(balance) = full.balance.clone().filter(|_| fresh) {
                if full.complete || end < full.all_txids.len() {
                    let (page_txids, has_more) = full.page(page, PAGE_SIZE);
                    let details = AddressDetails {
                        balance,
                        asset_balances: full.asset_balances.clone().unwrap_or_default(),
                        page_txids,
                        current_page: page,
                        has_more,
                    };
                    self.client.save(Partition::Results, &details_key, &details).await;
                    return Ok(details);
                }
            }
        }

        let query = AddressQuery::from(address);
        let (txids, settled) = self.collect_address_txids(&query, page).await?;
        let snapshot = self.balance_snapshot(&query).await?;
        let asset_balances = self.get_assets_for_address(address).await;
        let balance = format_satoshis(snapshot.balance.balance);

        let details = AddressDetails {
            balance: balance.clone(),
            asset_balances: asset_balances.clone(),
            page_txids: txids.page_txids,
            current_page: page,
            has_more: txids.has_more,
        };
        if settled {
            self.client.save(Partition::Results, &details_key, &details).await;
        }

        let now = self.client.now();
        self.update_aggregate(address, move |record| {
            record.balance = Some(balance);
            record.raw_balance = Some(snapshot.balance);
            record.balance_at = Some(now);
            record.utxos = Some(snapshot.utxos);
            record.utxos_at = Some(now);
            record.asset_balances = Some(asset_balances);
            record.assets_at = Some(now);
        })
        .await;

        Ok(details)
    }

    async fn balance_snapshot(&self, query: &AddressQuery) -> Result<BalanceSnapshot, RpcError> {
        let address = query.single().unwrap_or_default().to_string();
        let ttl = self.client.durations().address_data();

        if let Some(snapshot) = self.client.load_fresh(Partition::AddressBalances, &address, ttl).await {
            return Ok(snapshot);
        }

        let (balance, utxos) = tokio::try_join!(
            self.client.call_as::<AddressBalance>("getaddressbalance", vec![query.to_param()]),
            self.client.call_as::<Vec<AddressUtxo>>("getaddressutxos", vec![query.to_param()]),
        )?;

        let snapshot = BalanceSnapshot { balance, utxos };
        self.client.save(Partition::AddressBalances, &address, &snapshot).await;

        Ok(snapshot)
    }

    /// Non-base asset balances held by `address`, formatted with each asset's
    /// units. Falls back to summing UTXOs when the asset index call fails.
    pub async fn get_assets_for_address(&self, address: &str) -> Vec<AssetBalance> {
        let ttl = self.client.durations().asset_data();
        let key = CacheKey::AssetsForAddress(address.to_string()).to_string();

        if let Some(assets) = self.client.load_fresh(Partition::Results, &key, ttl).await {
            return assets;
        }

        if let Some(full) = self
            .client
            .load::<AggregateAddressRecord>(Partition::AddressFull, address)
            .await
        {
            let full = full.value;
            if let (Some(assets), Some(at)) = (full.asset_balances, full.assets_at) {
                if self.client.is_fresh(at, ttl) {
                    return assets;
                }
            }
        }

        let balances = match self.list_asset_balances_by_address(address, false, 100, 0).await {
            Ok(Value::Object(balances)) => balances,
            Ok(other) => {
                warn!("Unexpected asset balance listing for {}: {}", address, other);
                return self.get_assets_from_utxos(address).await;
            }
            Err(e) => {
                warn!("Asset balance listing failed for {}: {}", address, e);
                return self.get_assets_from_utxos(address).await;
            }
        };

        let amounts = balances
            .into_iter()
            .filter(|(name, _)| !name.is_empty())
            .map(|(name, amount)| (name, amount.as_f64().unwrap_or_default()))
            .collect();
        let assets = self.format_asset_balances(amounts).await;

        self.client.save(Partition::Results, &key, &assets).await;
        assets
    }

    /// Asset totals derived from the address's unspent outputs
    pub async fn get_assets_from_utxos(&self, address: &str) -> Vec<AssetBalance> {
        let ttl = self.client.durations().utxo();
        let key = CacheKey::AssetsFromUtxos(address.to_string()).to_string();

        if let Some(assets) = self.client.load_fresh(Partition::Results, &key, ttl).await {
            return assets;
        }

        let utxos = match self.get_address_utxos(&AddressQuery::from(address)).await {
            Ok(utxos) => utxos,
            Err(e) => {
                error!("Error reading UTXOs of {} for assets: {}", address, e);
                return Vec::new();
            }
        };

        let mut totals: BTreeMap<String, f64> = BTreeMap::new();
        let mut skipped = 0;
        for utxo in utxos {
            let held = match utxo.asset_name.as_deref() {
                Some(name) => Some((name.to_string(), utxo.satoshis as f64 / SATOSHIS_PER_COIN)),
                None => match self.get_transaction(&utxo.txid).await {
                    Ok(tx) => tx
                        .vout
                        .get(utxo.output_index as usize)
                        .and_then(|out| out.script_pub_key.asset.clone())
                        .map(|asset| (asset.name, asset.amount)),
                    Err(e) => {
                        debug!("Skipping UTXO {}:{}: {}", utxo.txid, utxo.output_index, e);
                        skipped += 1;
                        None
                    }
                },
            };

            if let Some((name, amount)) = held {
                if !name.is_empty() && name != BASE_ASSET {
                    *totals.entry(name).or_default() += amount;
                }
            }
        }

        let assets = self.format_asset_balances(totals.into_iter().collect()).await;
        if skipped == 0 {
            self.client.save(Partition::Results, &key, &assets).await;
        }
        assets
    }

    async fn format_asset_balances(&self, amounts: Vec<(String, f64)>) -> Vec<AssetBalance> {
        let formatted = amounts.into_iter().map(|(name, amount)| async move {
            let amount = match self.get_asset_data(&name).await {
                Ok(data) => format_asset_amount(amount, data.units),
                Err(e) => {
                    debug!("No asset data for {}: {}", name, e);
                    amount.to_string()
                }
            };
            AssetBalance { name, amount }
        });

        join_all(formatted).await
    }
}
