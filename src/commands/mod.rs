//! Command implementations for the CLI
//!
//! - start: Start the HTTP API, optionally with an embedded worker
//! - worker: Run a standalone processing worker
//! - dead-letters: List jobs that exhausted their retries
//! - test: Test configuration validity

pub mod dead_letters;
pub mod start;
pub mod test;
pub mod worker;
