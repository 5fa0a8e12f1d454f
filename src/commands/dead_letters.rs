use anyhow::Result;
use chrono::{TimeZone, Utc};
use colored::Colorize;
use logr::{config, db, models::DeadLetterEntry, store::SqliteLogStore};
use std::path::Path;

/// Execute the dead-letters command
///
/// Lists the jobs of one service that exhausted their retries, newest first.
pub async fn execute(config_path: &Path, service_id: &str, limit: i64, payload: bool) -> Result<()> {
    let cfg = config::load_config_from(config_path)?;
    let pool = db::connect(&cfg.database).await?;
    let store = SqliteLogStore::new(pool.clone());

    let entries = store.list_dead_letters(service_id, limit).await?;
    pool.close().await;

    if entries.is_empty() {
        println!("{} {}", "No dead letters for service".green(), service_id);
        return Ok(());
    }

    println!("{}", format!("Dead letters for {} ({}):", service_id, entries.len()).bold());
    for entry in &entries {
        println!("  {}", summary_line(entry));
        if payload {
            println!("    {}", serde_json::to_string(&entry.payload)?.dimmed());
        }
    }

    Ok(())
}

fn summary_line(entry: &DeadLetterEntry) -> String {
    let failed_at = Utc
        .timestamp_millis_opt(entry.failed_at)
        .single()
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| entry.failed_at.to_string());

    format!("{} {} {}", failed_at, entry.id, entry.reason)
}
