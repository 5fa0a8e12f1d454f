use anyhow::Context;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the global Prometheus recorder. Fails if one is already installed.
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;

    init_metric_descriptions();

    Ok(handle)
}

/// Initialize metric descriptions (can be called multiple times safely)
fn init_metric_descriptions() {
    describe_counter!(
        "logr_ingest_requests_total",
        "Ingestion requests by response status"
    );
    describe_counter!(
        "logr_events_accepted_total",
        "Events accepted and enqueued by the gateway"
    );
    describe_counter!(
        "logr_events_rejected_total",
        "Records rejected by per-record validation"
    );
    describe_counter!(
        "logr_rate_limited_total",
        "Ingestion requests refused by a rate-limit policy"
    );
    describe_counter!(
        "logr_jobs_total",
        "Processed jobs by outcome (completed, retrying, discarded, dead_lettered)"
    );
    describe_counter!(
        "logr_jobs_stalled_total",
        "Jobs whose worker lock expired, by what recovery did with them"
    );
    describe_histogram!(
        "logr_job_duration_seconds",
        "Time spent processing one job"
    );
    describe_gauge!("logr_info", "Build information");

    gauge!("logr_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);
}

pub fn record_ingest_request(status: u16) {
    counter!("logr_ingest_requests_total", "status" => status.to_string()).increment(1);
}

pub fn record_batch(accepted: usize, rejected: usize) {
    counter!("logr_events_accepted_total").increment(accepted as u64);
    counter!("logr_events_rejected_total").increment(rejected as u64);
}

/// `policy` is `requests` or `events`
pub fn record_rate_limited(policy: &'static str) {
    counter!("logr_rate_limited_total", "policy" => policy).increment(1);
}

pub fn record_job(outcome: &'static str, duration: Duration) {
    counter!("logr_jobs_total", "outcome" => outcome).increment(1);
    histogram!("logr_job_duration_seconds", "outcome" => outcome).record(duration.as_secs_f64());
}

/// `outcome` is `retried` or `dead_lettered`
pub fn record_stalled(outcome: &'static str, jobs: u64) {
    counter!("logr_jobs_stalled_total", "outcome" => outcome).increment(jobs);
}
