//! Cache key generation and management

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Methods whose single object parameter carries an order-independent
/// `addresses` list
const ADDRESS_LIST_METHODS: [&str; 3] = ["getaddressutxos", "getaddressbalance", "getaddressdeltas"];

/// Stable key for a read-through call: the method name joined to a
/// deterministic JSON rendering of the params.
pub fn cache_key(method: &str, params: &[Value]) -> String {
    let address_list = match params {
        [param] if ADDRESS_LIST_METHODS.contains(&method) => sort_address_list(param),
        _ => None,
    };

    // serde_json maps are ordered, so object keys always serialize sorted
    let rendered = match address_list {
        Some(param) => serde_json::to_string(&[param]),
        None => serde_json::to_string(params),
    }
    .unwrap_or_default();

    format!("{}_{}", method, rendered)
}

fn sort_address_list(param: &Value) -> Option<Value> {
    let object = param.as_object()?;
    let addresses = object.get("addresses")?.as_array()?;

    let mut sorted = addresses.clone();
    sorted.sort_by(|a, b| a.to_string().cmp(&b.to_string()));

    let mut object = object.clone();
    object.insert("addresses".to_string(), Value::Array(sorted));
    Some(Value::Object(object))
}

/// Address parameter normalized once at the API boundary
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AddressQuery {
    Single(String),
    List(Vec<String>),
}

impl AddressQuery {
    /// Addresses in canonical (sorted, deduplicated) order
    pub fn addresses(&self) -> Vec<String> {
        match self {
            AddressQuery::Single(address) => vec![address.clone()],
            AddressQuery::List(addresses) => {
                let mut sorted = addresses.clone();
                sorted.sort();
                sorted.dedup();
                sorted
            }
        }
    }

    /// The `{"addresses": [...]}` object the address index methods take
    pub fn to_param(&self) -> Value {
        json!({ "addresses": self.addresses() })
    }

    /// Same object with a block height window attached
    pub fn to_range_param(&self, start: u64, end: u64) -> Value {
        json!({ "addresses": self.addresses(), "start": start, "end": end })
    }

    /// The address when exactly one is queried
    pub fn single(&self) -> Option<&str> {
        match self {
            AddressQuery::Single(address) => Some(address),
            AddressQuery::List(addresses) if addresses.len() == 1 => Some(&addresses[0]),
            AddressQuery::List(_) => None,
        }
    }
}

impl From<&str> for AddressQuery {
    fn from(address: &str) -> Self {
        AddressQuery::Single(address.to_string())
    }
}

/// Keys of the derived records written by the view builders
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// One page of an address's txid list
    AddressPage { address: String, page: u32 },
    /// Txids found for a query in one block window
    AddressRange { query: AddressQuery, start: u64, end: u64 },
    AddressDetails { address: String, page: u32 },
    OutputStatus { txid: String, vout: u32 },
    SpentInfo { txid: String, vout: u32 },
    FindSpendingTx { txid: String, vout: u32 },
    AssetHolders { name: String, only_total: bool, count: u32, start: u32 },
    BlockRange { start: u64, count: u32 },
    AssetsForAddress(String),
    AssetsFromUtxos(String),
    TxAnalysis { txid: String, address: String },
    InputAnalysis { txid: String, vout: u32, address: String },
    Mempool,
}

impl CacheKey {
    pub fn address_page(address: &str, page: u32) -> Self {
        Self::AddressPage {
            address: address.to_string(),
            page,
        }
    }

    pub fn output_status(txid: &str, vout: u32) -> Self {
        Self::OutputStatus {
            txid: txid.to_string(),
            vout,
        }
    }

    /// The address a key belongs to, if any
    pub fn address(&self) -> Option<&str> {
        match self {
            Self::AddressPage { address, .. }
            | Self::AddressDetails { address, .. }
            | Self::AssetsForAddress(address)
            | Self::AssetsFromUtxos(address)
            | Self::TxAnalysis { address, .. }
            | Self::InputAnalysis { address, .. } => Some(address),
            Self::AddressRange { query, .. } => query.single(),
            _ => None,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddressPage { address, page } => write!(f, "{}_page_{}", address, page),
            Self::AddressRange { query, start, end } => {
                write!(f, "{}_{}_{}", query.to_param(), start, end)
            }
            Self::AddressDetails { address, page } => write!(f, "details_{}_{}", address, page),
            Self::OutputStatus { txid, vout } => write!(f, "{}_{}", txid, vout),
            Self::SpentInfo { txid, vout } => write!(f, "spentinfo_{}_{}", txid, vout),
            Self::FindSpendingTx { txid, vout } => write!(f, "find_spending_{}_{}", txid, vout),
            Self::AssetHolders { name, only_total, count, start } => {
                write!(f, "{}_holders_{}_{}_{}", name, only_total, count, start)
            }
            Self::BlockRange { start, count } => write!(f, "blocks_{}_{}", start, count),
            Self::AssetsForAddress(address) => write!(f, "assets_{}", address),
            Self::AssetsFromUtxos(address) => write!(f, "assets_utxos_{}", address),
            Self::TxAnalysis { txid, address } => write!(f, "analysis_{}_{}", txid, address),
            Self::InputAnalysis { txid, vout, address } => {
                write!(f, "input_{}_{}_{}", txid, vout, address)
            }
            Self::Mempool => write!(f, "mempool_txs"),
        }
    }
}
