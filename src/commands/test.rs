use anyhow::Result;
use colored::Colorize;
use logr::config;
use std::path::Path;

/// Execute the test command
///
/// This validates the configuration file without starting anything
pub fn execute(config_path: &Path) -> Result<()> {
    println!("{}", "Testing configuration...".cyan());

    let cfg = match config::load_config_from(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            println!("{} {:#}", "✗ Configuration invalid:".red(), e);
            return Err(e);
        }
    };

    println!("{}", "✓ Configuration test successful".green());
    println!();

    println!("{}", "Configuration Summary:".bold());
    println!("  {}: {}:{}", "Server".cyan(), cfg.server.host, cfg.server.port);
    println!("  {}: {}", "Log Level".cyan(), cfg.server.log_level);
    println!("  {}: {}", "Log Format".cyan(), cfg.server.log_format);
    println!("  {}: {}", "Database".cyan(), cfg.database.url);
    println!();

    println!("{}", "Ingestion:".bold());
    println!(
        "  Requests: {} per {} ms",
        cfg.rate_limit.request_limit, cfg.rate_limit.request_window_ms
    );
    println!(
        "  Events: {} per {} ms",
        cfg.rate_limit.event_limit, cfg.rate_limit.event_window_ms
    );
    println!("  Counter backend: {:?}", cfg.rate_limit.backend);
    println!(
        "  Max body: {} bytes, max batch: {} records",
        cfg.ingest.max_body_bytes, cfg.ingest.max_batch_size
    );
    println!();

    println!("{}", "Queue:".bold());
    println!("  Name: {}", cfg.queue.name);
    println!(
        "  Attempts: {}, backoff: {} ms (exponential)",
        cfg.queue.attempts, cfg.queue.backoff_ms
    );
    println!(
        "  Worker concurrency: {}, poll interval: {} ms",
        cfg.worker.concurrency, cfg.worker.poll_interval_ms
    );
    println!();

    if cfg.metrics.enabled {
        println!("  {}: {}", "Metrics".cyan(), cfg.metrics.endpoint);
    } else {
        println!("  {}: {}", "Metrics".cyan(), "disabled".yellow());
    }

    Ok(())
}
