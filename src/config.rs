use dotenv::dotenv;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

use crate::cache::CacheDurations;

pub const DEFAULT_RPC_URL: &str = "https://evr-rpc-mainnet.ting.finance/rpc/";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,
    pub rpc_url: String,
    pub rpc_timeout_secs: u64,
    pub max_concurrent_requests: usize,
    pub rpc_rate_limit: Option<u32>,
    pub inflight_sweep_secs: u64,
    pub memory_store_capacity: u64,
    pub cache_durations: CacheDurations,
}

/// `host:port` of `url`, safe to log when the URL carries credentials
pub fn endpoint_host(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(parsed) => match (parsed.host_str(), parsed.port_or_known_default()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            _ => "unknown host".to_string(),
        },
        Err(_) => "invalid URL".to_string(),
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:explorer-cache.db".to_string());
        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let server_port = env_or("SERVER_PORT", 8080);
        let rpc_url = env::var("RPC_URL").unwrap_or_else(|_| DEFAULT_RPC_URL.to_string());
        let rpc_timeout_secs = env_or("RPC_TIMEOUT_SECS", 30);
        let max_concurrent_requests = env_or("MAX_CONCURRENT_REQUESTS", 50);
        let rpc_rate_limit = env::var("RPC_RATE_LIMIT")
            .map(|v| v.parse().ok())
            .unwrap_or(None);
        let inflight_sweep_secs = env_or("INFLIGHT_SWEEP_SECS", 30);
        let memory_store_capacity = env_or("MEMORY_STORE_CAPACITY", 10_000);

        let defaults = CacheDurations::default();
        let cache_durations = CacheDurations {
            address_data: env_or("CACHE_ADDRESS_DATA_MS", defaults.address_data),
            block_count: env_or("CACHE_BLOCK_COUNT_MS", defaults.block_count),
            mempool: env_or("CACHE_MEMPOOL_MS", defaults.mempool),
            utxo: env_or("CACHE_UTXO_MS", defaults.utxo),
            tx_history: env_or("CACHE_TX_HISTORY_MS", defaults.tx_history),
            asset_data: env_or("CACHE_ASSET_DATA_MS", defaults.asset_data),
        };

        Self {
            database_url,
            server_host,
            server_port,
            rpc_url,
            rpc_timeout_secs,
            max_concurrent_requests,
            rpc_rate_limit,
            inflight_sweep_secs,
            memory_store_capacity,
            cache_durations,
        }
    }

    /// Runtime settings seeded from this configuration
    pub fn settings(&self) -> Settings {
        Settings {
            rpc_url: self.rpc_url.clone(),
            max_concurrent_requests: self.max_concurrent_requests,
            cache_durations: self.cache_durations,
            theme: Theme::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

/// User-adjustable settings. Missing fields fall back to their defaults, so a
/// partial document merges over the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub rpc_url: String,
    pub max_concurrent_requests: usize,
    pub cache_durations: CacheDurations,
    pub theme: Theme,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            max_concurrent_requests: 50,
            cache_durations: CacheDurations::default(),
            theme: Theme::default(),
        }
    }
}
