// Initialize configuration
// Set up logging
// Open the cache store
// Build the read-through client and apply saved settings
// Start background tasks
// Start HTTP server

use explorer_cache::{
    api, blockchain, cache, config, db, service, state,
};

use std::sync::Arc;
use std::time::Duration;
use blockchain::{Dispatcher, HttpTransport, STALE_REQUEST_AGE};
use cache::{CacheClient, SystemClock};
use config::{endpoint_host, Config};
use db::{KvStore, MemoryStore, SqliteStore};
use service::ExplorerService;
use state::AppState;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting explorer-cache");

    // Load configuration
    let config = Config::from_env();
    tracing::info!(
        "Configuration loaded: serving on {}:{}, RPC node {}",
        config.server_host,
        config.server_port,
        endpoint_host(&config.rpc_url)
    );

    // Open the cache store, falling back to memory when SQLite is unusable
    let store: Arc<dyn KvStore> = match db::connection::establish_connection(&config.database_url).await {
        Ok(pool) => {
            tracing::info!("Database connection established");
            Arc::new(SqliteStore::new(pool))
        }
        Err(e) => {
            tracing::warn!("Database unavailable ({}), caching in memory only", e);
            Arc::new(MemoryStore::new(config.memory_store_capacity))
        }
    };

    // Build the read-through client
    let transport = Arc::new(HttpTransport::new(&config)?);
    let dispatcher = Dispatcher::with_rate_limit(
        transport,
        config.max_concurrent_requests,
        config.rpc_rate_limit,
    );
    let client = Arc::new(CacheClient::new(
        store,
        dispatcher,
        config.cache_durations,
        Arc::new(SystemClock),
    ));

    if let Some(settings) = client.load_settings().await {
        tracing::info!("Applying saved settings");
        client.update_settings(&settings);
    }

    let service = Arc::new(ExplorerService::new(client.clone()));

    // Warm the chain-level views in the background
    let preload = service.clone();
    tokio::spawn(async move {
        preload.preload_common_data().await;
    });

    // Keep the in-flight request list tidy
    let shutdown = CancellationToken::new();
    let sweeper = client.in_flight().clone().spawn_sweeper(
        Duration::from_secs(config.inflight_sweep_secs.max(1)),
        shutdown.clone(),
    );
    tracing::info!("In-flight sweeper started (stale after {:?})", STALE_REQUEST_AGE);

    // Create shared state
    let app_state = Arc::new(AppState::new(config.clone(), service));

    // Start HTTP server
    let app = api::create_router(app_state.clone()).layer(CorsLayer::permissive());
    let addr = format!("{}:{}", config.server_host, config.server_port);
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("Shutdown signal received"),
                _ = server_shutdown.cancelled() => {}
            }
        })
        .await?;

    shutdown.cancel();
    app_state.traces.close_all().await;
    sweeper.await?;
    tracing::info!("Server stopped");

    Ok(())
}
