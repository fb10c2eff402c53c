pub mod api;
pub mod blockchain;
pub mod cache;
pub mod config;
pub mod db;
pub mod models;
pub mod service;
pub mod state;
pub mod validation;

#[cfg(test)]
pub mod tests;

// Re-export specific items for convenience
pub use api::error::ApiError;
pub use api::response::ApiResponse;
pub use api::route::create_router;
pub use blockchain::{Dispatcher, HttpTransport, RpcError, RpcTransport};
pub use cache::{CacheClient, CacheDurations, CacheStats};
pub use config::{Config, Settings};
pub use db::{KvStore, MemoryStore, Partition, SqliteStore};
pub use service::ExplorerService;
pub use validation::{validate_address, validate_depth, validate_hash, validate_page};
