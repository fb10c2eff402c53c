use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::ExplorerService;
use crate::validation::{validate_address, validate_hash};

/// What a free-text search resolved to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SearchTarget {
    /// Hash of the block at the searched height
    BlockHeight(String),
    BlockHash(String),
    Transaction(String),
    Address(String),
    Asset(String),
    Unknown(String),
}

impl ExplorerService {
    pub async fn identify_search_term(&self, query: &str) -> SearchTarget {
        let query = query.trim();

        if !query.is_empty() && query.len() < 64 && query.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(height) = query.parse::<u64>() {
                match self.get_block_hash(height).await {
                    Ok(hash) => return SearchTarget::BlockHeight(hash),
                    Err(e) => debug!("{} is not a block height: {}", query, e),
                }
            }
        }

        if validate_hash(query).is_ok() {
            if self.get_block(query, 1).await.is_ok() {
                return SearchTarget::BlockHash(query.to_string());
            }
            match self.get_transaction_details(query).await {
                Ok(_) => return SearchTarget::Transaction(query.to_string()),
                Err(e) => debug!("{} is neither a block nor a transaction: {}", query, e),
            }
        }

        if validate_address(query).is_ok() {
            return SearchTarget::Address(query.to_string());
        }

        if let Some(asset) = self.resolve_asset(query).await {
            return SearchTarget::Asset(asset);
        }

        SearchTarget::Unknown(query.to_string())
    }

    /// Exact asset name first, then the first wildcard match
    async fn resolve_asset(&self, query: &str) -> Option<String> {
        if query.is_empty() {
            return None;
        }

        let name = query.to_uppercase();
        if self.get_asset_data(&name).await.is_ok() {
            return Some(name);
        }

        match self.list_assets(&name, true, 1, 0).await {
            Ok(Value::Object(assets)) => assets.keys().find(|key| !key.is_empty()).cloned(),
            Ok(_) => None,
            Err(e) => {
                debug!("No asset matches {}: {}", name, e);
                None
            }
        }
    }
}
