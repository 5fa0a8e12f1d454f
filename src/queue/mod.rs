//! Durable work queue between the ingestion gateway and the processing worker
//!
//! Delivery is at-least-once: a job is claimed by one worker slot at a time,
//! and goes back to `waiting` if it fails with retries left or if its worker
//! disappears while holding it. A stall counts as a failed attempt, so a job
//! that keeps killing its worker still ends up dead-lettered.
//!
//! Every claim carries a lease token. Completing or failing a job requires the
//! token of the current claim, so a slot whose job was recovered and handed to
//! another slot cannot overwrite the newer claim.

pub mod sqlite;

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::config::QueueConfig;

pub use sqlite::SqliteJobQueue;

/// Fixed tag of ingestion jobs
pub const LOG_EVENT_JOB: &str = "log-event";

/// Failure reason recorded for jobs whose claim expired
pub const STALLED_REASON: &str = "Job stalled: worker lock expired before completion";

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue storage error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("job payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Retry policy attached to every job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOptions {
    pub attempts: u32,
    /// Base delay of the exponential backoff
    pub backoff: Duration,
}

impl JobOptions {
    /// Delay before the next attempt once `attempts_made` attempts failed:
    /// `backoff * 2^(attempts_made - 1)`.
    pub fn backoff_delay(&self, attempts_made: u32) -> Duration {
        let exponent = attempts_made.saturating_sub(1).min(30);
        self.backoff.saturating_mul(1u32 << exponent)
    }
}

impl From<&QueueConfig> for JobOptions {
    fn from(cfg: &QueueConfig) -> Self {
        Self {
            attempts: cfg.attempts,
            backoff: Duration::from_millis(cfg.backoff_ms),
        }
    }
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub name: String,
    pub payload: Value,
    pub options: JobOptions,
}

/// A claimed job
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub payload: Value,
    /// Failed attempts before this one
    pub attempts_made: u32,
    pub max_attempts: u32,
    /// Lease of the claim that returned this job
    pub lock_token: String,
}

/// What the queue did with a failed job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Rescheduled after `delay`
    Retrying { attempts_made: u32, delay: Duration },
    /// Out of attempts; terminal
    Exhausted { attempts_made: u32 },
    /// Unrecoverable failure with attempts left; terminal, remaining retries skipped
    Discarded { attempts_made: u32 },
    /// The claim expired and the job now belongs to someone else; nothing was recorded
    LeaseLost,
}

/// How a processing failure should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Retryable,
    Unrecoverable,
}

/// Result of a stalled-job sweep
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StalledJobs {
    /// Back in `waiting`, with the stall counted as an attempt
    pub retried: u64,
    /// Out of attempts and moved to `failed`; the caller dead-letters them
    pub exhausted: Vec<Job>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub waiting: i64,
    pub active: i64,
    pub completed: i64,
    pub failed: i64,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue every job or none of them.
    async fn add_bulk(&self, jobs: Vec<NewJob>) -> Result<Vec<String>, QueueError>;

    /// Claim the oldest job that is ready to run.
    async fn reserve(&self) -> Result<Option<Job>, QueueError>;

    /// Returns `false` when the caller's lease on the job was lost.
    async fn complete(&self, job: &Job) -> Result<bool, QueueError>;

    async fn fail(&self, job: &Job, reason: &str, kind: FailureKind) -> Result<FailOutcome, QueueError>;

    /// Release jobs claimed longer than `lock_timeout` ago, counting the
    /// stall as a failed attempt: back to `waiting` with backoff, or to
    /// `failed` once attempts run out.
    async fn recover_stalled(&self, lock_timeout: Duration) -> Result<StalledJobs, QueueError>;

    /// Drop the oldest completed/failed jobs beyond the retention counts.
    async fn trim_history(&self) -> Result<u64, QueueError>;

    async fn counts(&self) -> Result<QueueCounts, QueueError>;
}
