//! SQLite connection pool shared by the gateway, the worker and the analytics API
//!
//! Every cross-process structure (queue, rate windows, log store) lives in the
//! same database, so the pool is configured for concurrent writers:
//! - WAL journal mode
//! - busy timeout so competing writers wait instead of failing
//! - migrations applied on connect

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::str::FromStr;
use std::time::Duration;

use crate::config::DatabaseConfig;

/// Open the pool described by `cfg` and apply pending migrations.
pub async fn connect(cfg: &DatabaseConfig) -> Result<SqlitePool> {
    let in_memory = cfg.url.contains(":memory:");

    if !in_memory {
        ensure_parent_dir(&cfg.url)?;
    }

    let options = SqliteConnectOptions::from_str(&cfg.url)
        .with_context(|| format!("Invalid database url: {}", cfg.url))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_millis(cfg.busy_timeout_ms))
        .foreign_keys(true)
        .pragma("temp_store", "memory");

    // Each connection to `:memory:` is its own database, so pin a single
    // connection that never gets recycled.
    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(cfg.max_connections)
    };

    let pool = pool_options
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(options)
        .await
        .context("Failed to connect to database")?;

    run_migrations(&pool).await?;

    Ok(pool)
}

/// SQLite creates the file but not its directory
fn ensure_parent_dir(url: &str) -> Result<()> {
    let path = url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:");
    let path = path.split('?').next().unwrap_or(path);

    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
        }
    }
    Ok(())
}

/// Run database migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("Failed to run database migrations")?;

    tracing::info!("Database migrations completed");
    Ok(())
}

/// In-memory pool with the full schema, for tests.
#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    connect(&DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
        busy_timeout_ms: 5000,
    })
    .await
    .unwrap()
}
