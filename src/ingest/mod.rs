//! Ingestion path: credential rate limiting, record validation, enrichment.

pub mod enrich;
pub mod rate_limiter;
pub mod validator;

pub use enrich::{EnrichmentContext, IpHasher};
pub use rate_limiter::{
    CounterStore, MemoryCounterStore, RateDecision, RateLimitError, RateLimiter, RatePolicy,
    SqliteCounterStore, WindowKind,
};
pub use validator::{BatchOutcome, IngestValidator, RejectReason};
