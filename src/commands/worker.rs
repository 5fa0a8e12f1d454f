use anyhow::Result;
use colored::Colorize;
use logr::{
    config, db, init_tracing,
    queue::{JobQueue, SqliteJobQueue},
    signals::setup_signal_handlers,
    store::SqliteLogStore,
    worker::Worker,
};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Execute the worker command
///
/// Consumes the shared queue until SIGTERM/SIGINT, then lets in-flight jobs
/// finish before exiting.
pub async fn execute(config_path: &Path) -> Result<()> {
    let cfg = config::load_config_from(config_path)?;
    let _log_guard = init_tracing(&cfg.server);

    println!("{}", "Starting logr worker...".green());

    let pool = db::connect(&cfg.database).await?;
    let queue: Arc<dyn JobQueue> = Arc::new(SqliteJobQueue::new(pool.clone(), &cfg.queue));
    let store = Arc::new(SqliteLogStore::new(pool.clone()));

    let config_swap = Arc::new(arc_swap::ArcSwap::from_pointee(cfg.clone()));
    let (shutdown_tx, signal_handle) = setup_signal_handlers(config_swap, config_path.to_path_buf())?;

    info!(
        queue = %cfg.queue.name,
        concurrency = cfg.worker.concurrency,
        "Worker consuming queue"
    );

    Worker::new(queue, store, &cfg.worker).run(shutdown_tx).await;

    signal_handle.await?;
    pool.close().await;
    info!("Worker stopped gracefully");

    Ok(())
}
