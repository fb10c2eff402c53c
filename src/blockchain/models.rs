//! Typed node responses. Fields the explorer does not read are kept in
//! `extra` so cached values round-trip unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub hash: String,
    pub height: u64,
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub confirmations: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previousblockhash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nextblockhash: Option<String>,
    #[serde(default)]
    pub tx: Vec<BlockTx>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `getblock` lists txids at verbosity 1 and full transactions at 2
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BlockTx {
    Id(String),
    Full(Box<Transaction>),
}

impl BlockTx {
    pub fn txid(&self) -> &str {
        match self {
            BlockTx::Id(txid) => txid,
            BlockTx::Full(tx) => &tx.txid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub txid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocktime: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blockhash: Option<String>,
    #[serde(default, alias = "height", skip_serializing_if = "Option::is_none")]
    pub blockheight: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmations: Option<i64>,
    #[serde(default)]
    pub vin: Vec<TxInput>,
    #[serde(default)]
    pub vout: Vec<TxOutput>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Transaction {
    pub fn is_confirmed(&self) -> bool {
        self.blockhash.is_some() || self.blockheight.is_some()
    }

    /// Index of the input spending `txid:vout`
    pub fn input_spending(&self, txid: &str, vout: u32) -> Option<usize> {
        self.vin
            .iter()
            .position(|input| input.txid.as_deref() == Some(txid) && input.vout == Some(vout))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vout: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coinbase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TxInput {
    pub fn is_coinbase(&self) -> bool {
        self.coinbase.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxOutput {
    #[serde(default)]
    pub value: f64,
    pub n: u32,
    #[serde(rename = "scriptPubKey", default)]
    pub script_pub_key: ScriptPubKey,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TxOutput {
    pub fn addresses(&self) -> Vec<String> {
        self.script_pub_key.all_addresses()
    }

    pub fn pays_to(&self, address: &str) -> bool {
        self.script_pub_key.addresses.iter().any(|a| a == address)
            || self.script_pub_key.address.as_deref() == Some(address)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptPubKey {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<OutputAsset>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ScriptPubKey {
    pub fn all_addresses(&self) -> Vec<String> {
        let mut addresses = self.addresses.clone();
        if let Some(address) = &self.address {
            if !addresses.contains(address) {
                addresses.push(address.clone());
            }
        }
        addresses
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputAsset {
    pub name: String,
    #[serde(default)]
    pub amount: f64,
}

/// `gettxout` result; `null` from the node means spent or unknown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxOut {
    #[serde(default)]
    pub bestblock: String,
    #[serde(default)]
    pub confirmations: i64,
    #[serde(default)]
    pub value: f64,
    #[serde(rename = "scriptPubKey", default)]
    pub script_pub_key: ScriptPubKey,
    #[serde(default)]
    pub coinbase: bool,
}

/// Satoshi totals from `getaddressbalance`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddressBalance {
    #[serde(default)]
    pub balance: i64,
    #[serde(default)]
    pub received: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressUtxo {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_name: Option<String>,
    pub txid: String,
    pub output_index: u32,
    #[serde(default)]
    pub script: String,
    pub satoshis: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpentInfo {
    pub txid: String,
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetData {
    pub name: String,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub units: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
