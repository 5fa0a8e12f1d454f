//! Periodic housekeeping over the shared database
//!
//! Each tick:
//! - deletes rate-window members whose window has passed
//! - counts stalled `active` jobs as failed attempts, dead-lettering the
//!   ones that ran out
//! - trims completed/failed queue history to the retention counts

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};

use crate::ingest::CounterStore;
use crate::queue::{JobQueue, STALLED_REASON};
use crate::signals::ShutdownSignal;
use crate::store::LogStore;
use crate::worker::write_dead_letter;

/// What one maintenance pass removed or recovered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub expired_members: u64,
    pub recovered_jobs: u64,
    pub dead_lettered_jobs: u64,
    pub trimmed_jobs: u64,
}

pub struct Maintenance {
    counters: Arc<dyn CounterStore>,
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn LogStore>,
    stalled_after: Duration,
}

impl Maintenance {
    pub fn new(
        counters: Arc<dyn CounterStore>,
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn LogStore>,
        stalled_after: Duration,
    ) -> Self {
        Self {
            counters,
            queue,
            store,
            stalled_after,
        }
    }

    /// One pass. A failing step is logged and the others still run.
    pub async fn run_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match self.counters.purge_expired(chrono::Utc::now().timestamp_millis()).await {
            Ok(n) => report.expired_members = n,
            Err(e) => tracing::error!(error = %e, "Failed to purge expired rate-limit members"),
        }

        match self.queue.recover_stalled(self.stalled_after).await {
            Ok(stalled) => {
                if stalled.retried > 0 {
                    tracing::warn!(recovered = stalled.retried, "Recovered stalled jobs");
                }
                report.recovered_jobs = stalled.retried;

                for job in &stalled.exhausted {
                    tracing::error!(
                        job_id = %job.id,
                        attempts_made = job.attempts_made,
                        "Stalled job exhausted its attempts, moving to dead letters"
                    );
                    if write_dead_letter(self.store.as_ref(), job, STALLED_REASON).await {
                        report.dead_lettered_jobs += 1;
                    }
                }
                crate::metrics::record_stalled("retried", stalled.retried);
                crate::metrics::record_stalled("dead_lettered", stalled.exhausted.len() as u64);
            }
            Err(e) => tracing::error!(error = %e, "Failed to recover stalled jobs"),
        }

        match self.queue.trim_history().await {
            Ok(n) => report.trimmed_jobs = n,
            Err(e) => tracing::error!(error = %e, "Failed to trim queue history"),
        }

        tracing::debug!(
            expired_members = report.expired_members,
            recovered_jobs = report.recovered_jobs,
            dead_lettered_jobs = report.dead_lettered_jobs,
            trimmed_jobs = report.trimmed_jobs,
            "Maintenance pass finished"
        );

        report
    }
}

/// Run [`Maintenance::run_once`] every `every` until shutdown.
pub fn spawn_maintenance_task(
    maintenance: Maintenance,
    every: Duration,
    mut shutdown: broadcast::Receiver<ShutdownSignal>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    maintenance.run_once().await;
                }
                _ = shutdown.recv() => {
                    tracing::debug!("Maintenance task stopped");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::create_test_config;
    use crate::db::test_pool;
    use crate::ingest::{SqliteCounterStore, WindowKind};
    use crate::ingest::rate_limiter::window_key;
    use crate::queue::{JobOptions, NewJob, SqliteJobQueue, LOG_EVENT_JOB};
    use crate::store::SqliteLogStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_run_once_purges_and_recovers() {
        let pool = test_pool().await;
        let counters = Arc::new(SqliteCounterStore::new(pool.clone()));
        let queue = Arc::new(SqliteJobQueue::new(pool.clone(), &create_test_config().queue));

        // Member whose one-second window ended long ago
        let key = window_key("abc", WindowKind::Requests);
        counters
            .check_and_consume(&key, 10, Duration::from_secs(1), 1, 1_000)
            .await
            .unwrap();

        queue
            .add_bulk(vec![NewJob {
                name: LOG_EVENT_JOB.to_string(),
                payload: json!({"n": 1}),
                options: JobOptions::default(),
            }])
            .await
            .unwrap();
        queue.reserve().await.unwrap().unwrap();

        let store = Arc::new(SqliteLogStore::new(pool.clone()));
        let maintenance = Maintenance::new(counters, queue.clone(), store, Duration::ZERO);
        let report = maintenance.run_once().await;

        assert_eq!(report.expired_members, 1);
        assert_eq!(report.recovered_jobs, 1);
        assert_eq!(report.dead_lettered_jobs, 0);
        assert_eq!(queue.counts().await.unwrap().waiting, 1);
    }

    #[tokio::test]
    async fn test_stalled_job_on_last_attempt_is_dead_lettered() {
        let pool = test_pool().await;
        let queue = Arc::new(SqliteJobQueue::new(pool.clone(), &create_test_config().queue));
        queue
            .add_bulk(vec![NewJob {
                name: LOG_EVENT_JOB.to_string(),
                payload: json!({"serviceId": "svc-1", "n": 1}),
                options: JobOptions {
                    attempts: 1,
                    backoff: Duration::from_millis(500),
                },
            }])
            .await
            .unwrap();
        queue.reserve().await.unwrap().unwrap();

        let maintenance = Maintenance::new(
            Arc::new(SqliteCounterStore::new(pool.clone())),
            queue.clone(),
            Arc::new(SqliteLogStore::new(pool.clone())),
            Duration::ZERO,
        );
        let report = maintenance.run_once().await;

        assert_eq!(report.recovered_jobs, 0);
        assert_eq!(report.dead_lettered_jobs, 1);
        assert_eq!(queue.counts().await.unwrap().failed, 1);

        let (service_id, reason): (String, String) =
            sqlx::query_as("SELECT service_id, reason FROM dead_letters")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(service_id, "svc-1");
        assert_eq!(reason, STALLED_REASON);
    }

    #[tokio::test]
    async fn test_task_stops_on_shutdown() {
        let pool = test_pool().await;
        let maintenance = Maintenance::new(
            Arc::new(SqliteCounterStore::new(pool.clone())),
            Arc::new(SqliteJobQueue::new(pool.clone(), &create_test_config().queue)),
            Arc::new(SqliteLogStore::new(pool)),
            Duration::from_secs(60),
        );

        let (tx, rx) = broadcast::channel(1);
        let handle = spawn_maintenance_task(maintenance, Duration::from_secs(3600), rx);
        tx.send(ShutdownSignal::Graceful).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
