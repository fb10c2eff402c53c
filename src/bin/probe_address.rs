use explorer_cache::{
    blockchain::{Dispatcher, HttpTransport},
    cache::{CacheClient, SystemClock},
    config::Config,
    db::MemoryStore,
    service::ExplorerService,
    validation::validate_address,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, Level};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Setup tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let address = match std::env::args().nth(1).or_else(|| std::env::var("PROBE_ADDRESS").ok()) {
        Some(address) => address,
        None => {
            error!("Usage: probe_address <address> (or set PROBE_ADDRESS)");
            return Ok(());
        }
    };
    validate_address(&address)?;

    // 1. Setup
    let config = Config::from_env();
    let transport = Arc::new(HttpTransport::new(&config)?);
    let dispatcher = Dispatcher::with_rate_limit(transport, config.max_concurrent_requests, config.rpc_rate_limit);
    let client = Arc::new(CacheClient::new(
        Arc::new(MemoryStore::new(config.memory_store_capacity)),
        dispatcher,
        config.cache_durations,
        Arc::new(SystemClock),
    ));
    let service = ExplorerService::new(client.clone());

    // 2. Cold view, then the same view again from cache
    for attempt in 1..=2 {
        let started = Instant::now();
        let details = service.get_address_details(&address, 1).await;
        info!(
            "✅ Lookup {}: balance {}, {} assets, {} txids on page 1 (more: {}) in {:?}",
            attempt,
            details.balance,
            details.asset_balances.len(),
            details.page_txids.len(),
            details.has_more,
            started.elapsed()
        );
    }

    // 3. Status of the first output of the most recent transaction
    let details = service.get_address_details(&address, 1).await;
    if let Some(txid) = details.page_txids.first() {
        let status = service.get_output_status(txid, 0).await;
        info!("✅ Output {}:0 is {:?}", txid, status);
    } else {
        info!("No transactions to inspect");
    }

    // 4. Full warm-up
    if service.optimize_address_cache(&address).await {
        info!("✅ Address cache warmed");
    } else {
        error!("❌ Address cache warm-up failed");
    }

    let stats = client.stats();
    info!(
        "Cache stats: {} hits, {} misses, ratio {:.2}",
        stats.hits, stats.misses, stats.ratio
    );
    Ok(())
}
