use sqlx::SqlitePool;
use tracing::info;

use crate::db::INIT_SCHEMA;

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    info!("Running cache store migrations...");

    // sqlx executes one statement per query
    for statement in INIT_SCHEMA
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.lines().all(|l| l.trim_start().starts_with("--")))
    {
        sqlx::query(statement).execute(pool).await?;
    }

    info!("Cache store migrations completed successfully");
    Ok(())
}
