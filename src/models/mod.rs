// View models assembled by the explorer service and served over the API

use serde::{Deserialize, Serialize};

use crate::blockchain::models::{AddressBalance, AddressUtxo, Block, Transaction};

/// Base-coin balance rendered when nothing could be fetched
pub const ZERO_BALANCE: &str = "0.00000000";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetBalance {
    pub name: String,
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressDetails {
    pub balance: String,
    pub asset_balances: Vec<AssetBalance>,
    pub page_txids: Vec<String>,
    pub current_page: u32,
    pub has_more: bool,
}

impl AddressDetails {
    /// Degraded result used when the underlying calls fail
    pub fn empty(page: u32) -> Self {
        Self {
            balance: ZERO_BALANCE.to_string(),
            asset_balances: Vec::new(),
            page_txids: Vec::new(),
            current_page: page,
            has_more: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxidPage {
    pub page_txids: Vec<String>,
    pub has_more: bool,
}

/// Cached page of an address's txid list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRecord {
    pub txids: Vec<String>,
    pub has_more: bool,
}

/// Everything known about one address. `all_txids` is most-recent-first,
/// free of duplicates, and only ever grows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AggregateAddressRecord {
    pub address: String,
    pub all_txids: Vec<String>,
    /// Formatted base-coin balance
    pub balance: Option<String>,
    pub raw_balance: Option<AddressBalance>,
    pub asset_balances: Option<Vec<AssetBalance>>,
    pub utxos: Option<Vec<AddressUtxo>>,
    /// Set once the full lookback window has been scanned
    pub complete: bool,
    pub txids_at: Option<i64>,
    pub balance_at: Option<i64>,
    pub utxos_at: Option<i64>,
    pub assets_at: Option<i64>,
}

impl AggregateAddressRecord {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            ..Default::default()
        }
    }

    /// Page `page` (1-based) of `page_size` txids and whether more follow
    pub fn page(&self, page: u32, page_size: usize) -> (Vec<String>, bool) {
        let start = (page.max(1) as usize - 1) * page_size;
        let end = start + page_size;
        let txids = self
            .all_txids
            .iter()
            .skip(start)
            .take(page_size)
            .cloned()
            .collect();
        (txids, self.all_txids.len() > end)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockMetadata {
    pub height: u64,
    pub hash: String,
    pub time: i64,
    pub size: u64,
    pub tx_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestBlocks {
    pub metadatas: Vec<BlockMetadata>,
    pub current_height: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDetails {
    pub tx: Transaction,
    pub blockheight: Option<u64>,
    pub confirmations: u64,
    pub current_height: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockDetails {
    pub block: Block,
    pub confirmations: u64,
    pub current_height: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxKind {
    Sent,
    Received,
    #[serde(rename = "self")]
    SelfTransfer,
    Unknown,
}

/// How one transaction moved funds for one address
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxAnalysis {
    #[serde(rename = "type")]
    pub kind: TxKind,
    pub balance_change: f64,
}

/// Contribution of one input to an address
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputAnalysis {
    pub is_input: bool,
    pub input_amount: f64,
}
