use explorer_cache::{
    blockchain::{Dispatcher, HttpTransport},
    cache::{CacheClient, SystemClock},
    config::{endpoint_host, Config},
    db::MemoryStore,
    service::ExplorerService,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, Level};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Setup tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    info!("Probing configured RPC node...");

    // 1. Setup
    let config = Config::from_env();
    info!("Using endpoint {}", endpoint_host(&config.rpc_url));

    let transport = Arc::new(HttpTransport::new(&config)?);
    let dispatcher = Dispatcher::with_rate_limit(transport, config.max_concurrent_requests, config.rpc_rate_limit);
    let client = Arc::new(CacheClient::new(
        Arc::new(MemoryStore::new(config.memory_store_capacity)),
        dispatcher,
        config.cache_durations,
        Arc::new(SystemClock),
    ));
    let service = ExplorerService::new(client.clone());

    // 2. Chain tip
    let height = match service.get_block_count().await {
        Ok(height) => {
            info!("✅ Current block height: {}", height);
            height
        }
        Err(e) => {
            error!("❌ getblockcount failed: {}", e);
            return Err(e.into());
        }
    };

    // 3. Same block hash twice; the second lookup is served from cache
    for attempt in 1..=2 {
        match client.call_as::<String>("getblockhash", vec![json!(height)]).await {
            Ok(hash) => info!("✅ Block {} hash (lookup {}): {}", height, attempt, hash),
            Err(e) => error!("❌ getblockhash failed: {}", e),
        }
    }

    // 4. Cache stats
    let stats = client.stats();
    info!(
        "Cache stats: {} hits, {} misses, ratio {:.2}",
        stats.hits, stats.misses, stats.ratio
    );

    info!("Probe complete");
    Ok(())
}
