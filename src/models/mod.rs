pub mod event;
pub mod service;

pub use event::{DeadLetterEntry, HttpMethod, IngestRecord, LogEvent, LogLevel};
pub use service::{Service, ServiceRef};
