//! Processing worker: a fixed pool of slots draining the work queue
//!
//! Each slot handles one job end to end (validate, scrub, persist) before
//! reserving the next one. Retry scheduling belongs to the queue; a slot only
//! classifies failures.

pub mod processor;

use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::queue::{FailOutcome, Job, JobQueue};
use crate::signals::ShutdownSignal;
use crate::store::LogStore;

pub use processor::{EventProcessor, ProcessError};

/// What happened to one reserved job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobResult {
    Completed,
    Retrying,
    Discarded,
    DeadLettered,
    /// The queue could not record the outcome; the job stays claimed until stalled recovery
    Unrecorded,
    /// The claim expired and the job was handed to another slot
    LeaseLost,
}

impl JobResult {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Retrying => "retrying",
            Self::Discarded => "discarded",
            Self::DeadLettered => "dead_lettered",
            Self::Unrecorded => "unrecorded",
            Self::LeaseLost => "lease_lost",
        }
    }
}

#[derive(Clone)]
pub struct Worker {
    queue: Arc<dyn JobQueue>,
    processor: EventProcessor,
    concurrency: usize,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(queue: Arc<dyn JobQueue>, store: Arc<dyn LogStore>, cfg: &WorkerConfig) -> Self {
        Self {
            queue,
            processor: EventProcessor::new(store),
            concurrency: cfg.concurrency.max(1),
            poll_interval: Duration::from_millis(cfg.poll_interval_ms),
        }
    }

    /// Run every slot until shutdown is signalled, then wait for in-flight
    /// jobs to finish.
    pub async fn run(self, shutdown: broadcast::Sender<ShutdownSignal>) {
        info!(concurrency = self.concurrency, "Worker started");

        let mut slots = JoinSet::new();
        for slot in 0..self.concurrency {
            let worker = self.clone();
            let rx = shutdown.subscribe();
            slots.spawn(async move { worker.slot_loop(slot, rx).await });
        }

        while let Some(result) = slots.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Worker slot terminated abnormally");
            }
        }

        info!("Worker drained, all slots stopped");
    }

    async fn slot_loop(&self, slot: usize, mut shutdown: broadcast::Receiver<ShutdownSignal>) {
        loop {
            if !matches!(shutdown.try_recv(), Err(broadcast::error::TryRecvError::Empty)) {
                break;
            }

            match self.queue.reserve().await {
                Ok(Some(job)) => {
                    self.handle_job(job).await;
                    continue;
                }
                Ok(None) => {}
                Err(e) => error!(slot, error = %e, "Failed to reserve job"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.recv() => break,
            }
        }

        debug!(slot, "Worker slot stopped");
    }

    /// Process one reserved job and report its outcome to the queue.
    pub async fn handle_job(&self, job: Job) -> JobResult {
        let started = Instant::now();

        let result = AssertUnwindSafe(self.processor.process(&job.payload))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(ProcessError::Transient(panic_message(panic.as_ref()))));

        let outcome = match result {
            Ok(inserted) => match self.queue.complete(&job).await {
                Ok(true) => {
                    debug!(job_id = %job.id, inserted, "Job completed");
                    JobResult::Completed
                }
                Ok(false) => JobResult::LeaseLost,
                Err(e) => {
                    error!(job_id = %job.id, error = %e, "Failed to mark job completed");
                    JobResult::Unrecorded
                }
            },
            Err(err) => self.handle_failure(&job, err).await,
        };

        crate::metrics::record_job(outcome.as_str(), started.elapsed());
        outcome
    }

    async fn handle_failure(&self, job: &Job, err: ProcessError) -> JobResult {
        let reason = err.to_string();

        match self.queue.fail(job, &reason, err.kind()).await {
            Ok(FailOutcome::Retrying { attempts_made, delay }) => {
                warn!(
                    job_id = %job.id,
                    attempts_made,
                    max_attempts = job.max_attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %reason,
                    "Job failed, retry scheduled"
                );
                JobResult::Retrying
            }
            Ok(FailOutcome::Discarded { attempts_made }) => {
                error!(
                    job_id = %job.id,
                    attempts_made,
                    error = %reason,
                    "Job failed with unrecoverable error, not retrying"
                );
                JobResult::Discarded
            }
            Ok(FailOutcome::Exhausted { attempts_made }) => {
                error!(
                    job_id = %job.id,
                    attempts_made,
                    error = %reason,
                    "Job exhausted its attempts, moving to dead letters"
                );
                write_dead_letter(self.processor.store().as_ref(), job, &reason).await;
                JobResult::DeadLettered
            }
            Ok(FailOutcome::LeaseLost) => JobResult::LeaseLost,
            Err(e) => {
                error!(job_id = %job.id, error = %e, job_error = %reason, "Failed to record job failure");
                JobResult::Unrecorded
            }
        }
    }

}

/// Move an exhausted job's payload to the dead-letter store.
///
/// Write failures are logged and swallowed; returns whether the write landed.
pub async fn write_dead_letter(store: &dyn LogStore, job: &Job, reason: &str) -> bool {
    let service_id = job
        .payload
        .get("serviceId")
        .and_then(Value::as_str)
        .unwrap_or("unknown");

    match store.insert_dead_letter(service_id, reason, &job.payload).await {
        Ok(_) => true,
        Err(e) => {
            error!(
                job_id = %job.id,
                service_id,
                error = %e,
                "CRITICAL: failed to write dead letter, job payload lost"
            );
            false
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("Job processing panicked: {}", detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{QueueConfig, WorkerConfig};
    use crate::db::test_pool;
    use crate::models::event::sample_event;
    use crate::queue::{JobOptions, NewJob, SqliteJobQueue, LOG_EVENT_JOB};
    use crate::models::LogEvent;
    use crate::store::{SqliteLogStore, StoreError};
    use async_trait::async_trait;
    use serde_json::json;
    use uuid::Uuid;

    /// Event writes misbehave; dead letters go to the real store
    struct BrokenEventWrites {
        dead_letters: SqliteLogStore,
        panic: bool,
    }

    #[async_trait]
    impl LogStore for BrokenEventWrites {
        async fn insert_event(&self, _event: &LogEvent) -> Result<bool, StoreError> {
            if self.panic {
                panic!("index page corrupted");
            }
            Err(StoreError::CorruptRow("database is locked".to_string()))
        }

        async fn insert_dead_letter(
            &self,
            service_id: &str,
            reason: &str,
            payload: &Value,
        ) -> Result<Uuid, StoreError> {
            self.dead_letters.insert_dead_letter(service_id, reason, payload).await
        }
    }

    async fn broken_setup(panic: bool) -> (Worker, SqliteJobQueue, SqliteLogStore) {
        let pool = test_pool().await;
        let queue = SqliteJobQueue::new(pool.clone(), &QueueConfig::default());
        let store = SqliteLogStore::new(pool);
        let broken = BrokenEventWrites {
            dead_letters: store.clone(),
            panic,
        };
        let worker = Worker::new(Arc::new(queue.clone()), Arc::new(broken), &WorkerConfig::default());
        (worker, queue, store)
    }

    async fn dead_letter_reasons(store: &SqliteLogStore, service_id: Uuid) -> Vec<String> {
        sqlx::query_scalar("SELECT reason FROM dead_letters WHERE service_id = ?")
            .bind(service_id.to_string())
            .fetch_all(store.pool())
            .await
            .unwrap()
    }

    async fn setup() -> (Worker, SqliteJobQueue, SqliteLogStore) {
        let pool = test_pool().await;
        let queue = SqliteJobQueue::new(pool.clone(), &QueueConfig::default());
        let store = SqliteLogStore::new(pool);
        let cfg = WorkerConfig {
            concurrency: 2,
            poll_interval_ms: 10,
        };
        let worker = Worker::new(Arc::new(queue.clone()), Arc::new(store.clone()), &cfg);
        (worker, queue, store)
    }

    fn job(payload: Value) -> NewJob {
        NewJob {
            name: LOG_EVENT_JOB.to_string(),
            payload,
            options: JobOptions {
                attempts: 2,
                backoff: Duration::from_millis(0),
            },
        }
    }

    #[tokio::test]
    async fn test_valid_job_completes() {
        let (worker, queue, store) = setup().await;
        let payload = serde_json::to_value(sample_event(Uuid::new_v4())).unwrap();
        queue.add_bulk(vec![job(payload)]).await.unwrap();

        let reserved = queue.reserve().await.unwrap().unwrap();
        assert_eq!(worker.handle_job(reserved).await, JobResult::Completed);
        assert_eq!(queue.counts().await.unwrap().completed, 1);

        let stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM log_events")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(stored, 1);
    }

    #[tokio::test]
    async fn test_invalid_payload_is_discarded_without_dead_letter() {
        let (worker, queue, store) = setup().await;
        let service_id = Uuid::new_v4();
        let mut payload = serde_json::to_value(sample_event(service_id)).unwrap();
        payload["status"] = json!("abc");
        queue.add_bulk(vec![job(payload)]).await.unwrap();

        let reserved = queue.reserve().await.unwrap().unwrap();
        assert_eq!(worker.handle_job(reserved).await, JobResult::Discarded);
        assert!(queue.reserve().await.unwrap().is_none());

        assert!(dead_letter_reasons(&store, service_id).await.is_empty());
    }

    #[tokio::test]
    async fn test_last_unrecoverable_attempt_is_dead_lettered() {
        let (worker, queue, store) = setup().await;
        let service_id = Uuid::new_v4();
        let mut payload = serde_json::to_value(sample_event(service_id)).unwrap();
        payload["status"] = json!("abc");
        let mut new_job = job(payload.clone());
        new_job.options.attempts = 1;
        queue.add_bulk(vec![new_job]).await.unwrap();

        let reserved = queue.reserve().await.unwrap().unwrap();
        assert_eq!(worker.handle_job(reserved).await, JobResult::DeadLettered);

        let reasons = dead_letter_reasons(&store, service_id).await;
        assert_eq!(reasons.len(), 1);
        assert!(reasons[0].starts_with("Validation of event"));

        let stored: String = sqlx::query_scalar("SELECT payload FROM dead_letters")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(serde_json::from_str::<Value>(&stored).unwrap(), payload);
    }

    #[tokio::test]
    async fn test_transient_failures_retry_then_dead_letter() {
        let (worker, queue, store) = broken_setup(false).await;
        let service_id = Uuid::new_v4();
        let payload = serde_json::to_value(sample_event(service_id)).unwrap();
        queue
            .add_bulk(vec![NewJob {
                name: LOG_EVENT_JOB.to_string(),
                payload,
                options: JobOptions {
                    attempts: 5,
                    backoff: Duration::from_millis(0),
                },
            }])
            .await
            .unwrap();

        let mut results = Vec::new();
        while let Some(job) = queue.reserve().await.unwrap() {
            results.push(worker.handle_job(job).await);
            if results.len() < 5 {
                assert!(dead_letter_reasons(&store, service_id).await.is_empty());
            }
        }

        assert_eq!(
            results,
            vec![
                JobResult::Retrying,
                JobResult::Retrying,
                JobResult::Retrying,
                JobResult::Retrying,
                JobResult::DeadLettered,
            ]
        );
        let reasons = dead_letter_reasons(&store, service_id).await;
        assert_eq!(reasons.len(), 1);
        assert!(reasons[0].contains("database is locked"));
        assert_eq!(queue.counts().await.unwrap().failed, 1);
    }

    #[tokio::test]
    async fn test_panicking_job_counts_as_an_attempt() {
        let (worker, queue, store) = broken_setup(true).await;
        let service_id = Uuid::new_v4();
        let payload = serde_json::to_value(sample_event(service_id)).unwrap();
        queue.add_bulk(vec![job(payload)]).await.unwrap();

        let first = queue.reserve().await.unwrap().unwrap();
        let job_id = first.id.clone();
        assert_eq!(worker.handle_job(first).await, JobResult::Retrying);
        let last_error = queue.last_error(&job_id).await.unwrap().unwrap();
        assert!(last_error.contains("index page corrupted"));

        let second = queue.reserve().await.unwrap().unwrap();
        assert_eq!(second.attempts_made, 1);
        assert_eq!(worker.handle_job(second).await, JobResult::DeadLettered);

        let reasons = dead_letter_reasons(&store, service_id).await;
        assert_eq!(reasons, vec!["Job processing panicked: index page corrupted".to_string()]);
    }

    #[tokio::test]
    async fn test_expired_claim_is_not_completed_twice() {
        let (worker, queue, _store) = setup().await;
        let payload = serde_json::to_value(sample_event(Uuid::new_v4())).unwrap();
        queue.add_bulk(vec![job(payload)]).await.unwrap();

        let stale = queue.reserve().await.unwrap().unwrap();
        queue.recover_stalled(Duration::ZERO).await.unwrap();
        let fresh = queue.reserve().await.unwrap().unwrap();

        assert_eq!(worker.handle_job(stale).await, JobResult::LeaseLost);
        assert_eq!(queue.counts().await.unwrap().active, 1);
        assert_eq!(worker.handle_job(fresh).await, JobResult::Completed);
    }

    #[tokio::test]
    async fn test_run_drains_queue_and_stops_on_shutdown() {
        let (worker, queue, store) = setup().await;
        let service_id = Uuid::new_v4();
        let jobs = (0..5)
            .map(|_| job(serde_json::to_value(sample_event(service_id)).unwrap()))
            .collect();
        queue.add_bulk(jobs).await.unwrap();

        let (tx, _) = broadcast::channel(4);
        let handle = tokio::spawn(worker.run(tx.clone()));

        let mut stored = 0i64;
        for _ in 0..200 {
            stored = sqlx::query_scalar("SELECT COUNT(*) FROM log_events")
                .fetch_one(store.pool())
                .await
                .unwrap();
            if stored == 5 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(stored, 5);

        tx.send(ShutdownSignal::Graceful).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "Job processing panicked: boom");
    }
}
