use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;

use crate::config::DatabaseConfig;

/// Open the shared connection pool and bring the schema up to date.
///
/// Migrations run before the pool is handed to anyone else, so every caller
/// can assume the `records` table exists. Pool limits and the acquire timeout
/// come from configuration; waiting forever on a saturated pool would stall
/// every in-flight request.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    let options =
        PgConnectOptions::from_str(&config.url).context("invalid database connection url")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_millis(config.acquire_timeout_ms))
        .connect_with(options)
        .await
        .context("failed to connect to the database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run database migrations")?;

    Ok(pool)
}
