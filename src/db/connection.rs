// SQLite connection pool for the persistent cache store

use backon::{ExponentialBuilder, Retryable};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{migrate::MigrateDatabase, Pool, Sqlite};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::db::migration::run_migrations;

fn is_in_memory(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

pub async fn establish_connection(database_url: &str) -> Result<Pool<Sqlite>, sqlx::Error> {
    let in_memory = is_in_memory(database_url);

    // Create database if it doesn't exist
    if !in_memory && !Sqlite::database_exists(database_url).await.unwrap_or(false) {
        info!("Creating cache database at {}", database_url);
        Sqlite::create_database(database_url).await?;
    }

    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

    // Every in-memory connection is its own database, so keep exactly one alive
    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(num_cpus::get().max(2) as u32)
    };

    let pool = (|| {
        let options = options.clone();
        let pool_options = pool_options.clone();
        async move { pool_options.connect_with(options).await }
    })
    .retry(
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(100))
            .with_max_times(3),
    )
    .notify(|err: &sqlx::Error, dur: Duration| {
        warn!("Cache database connect failed: {}, retrying in {:?}", err, dur);
    })
    .await?;

    // Enable WAL mode for better concurrency
    if !in_memory {
        sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;
    }

    run_migrations(&pool).await?;

    Ok(pool)
}
