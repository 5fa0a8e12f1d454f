//! PII redaction applied by the worker before an event is persisted

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

use crate::models::LogEvent;

pub const EMAIL_MARKER: &str = "[EMAIL REDACTED]";
pub const CARD_MARKER: &str = "[CARD REDACTED]";
pub const SECRET_MARKER: &str = "[REDACTED]";

/// Matched case-insensitively against object keys
const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "secret",
    "token",
    "api_key",
    "apikey",
    "authorization",
    "cookie",
    "set-cookie",
    "credit_card",
    "cc",
    "cvv",
];

/// Server-assigned identity fields of an event; never rewritten
const IDENTITY_FIELDS: &[&str] = &["id", "serviceId", "ipHash"];

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9-]+(?:\.[a-zA-Z0-9-]+)*")
        .expect("email pattern is valid")
});

static CARD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:\d[ -]*?){13,16}\b").expect("card pattern is valid"));

#[derive(Debug, thiserror::Error)]
pub enum ScrubError {
    #[error("event could not be rebuilt after scrubbing: {0}")]
    Rebuild(#[from] serde_json::Error),
}

fn is_sensitive_key(key: &str) -> bool {
    SENSITIVE_KEYS.iter().any(|k| k.eq_ignore_ascii_case(key))
}

/// Redact email addresses, then card-shaped digit runs.
pub fn scrub_string(input: &str) -> String {
    let without_emails = EMAIL_RE.replace_all(input, EMAIL_MARKER);
    CARD_RE.replace_all(&without_emails, CARD_MARKER).into_owned()
}

/// Recursively redact a JSON tree. Total and idempotent.
pub fn scrub(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(scrub_string(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(scrub).collect()),
        Value::Object(map) => Value::Object(scrub_object(map)),
        other => other,
    }
}

fn scrub_object(map: Map<String, Value>) -> Map<String, Value> {
    map.into_iter()
        .map(|(key, value)| {
            let value = if is_sensitive_key(&key) {
                Value::String(SECRET_MARKER.to_string())
            } else {
                scrub(value)
            };
            (key, value)
        })
        .collect()
}

/// Scrub every client-supplied field of an event.
pub fn scrub_event(event: &LogEvent) -> Result<LogEvent, ScrubError> {
    let Value::Object(fields) = serde_json::to_value(event)? else {
        return Ok(event.clone());
    };

    let scrubbed: Map<String, Value> = fields
        .into_iter()
        .map(|(key, value)| {
            if IDENTITY_FIELDS.contains(&key.as_str()) {
                (key, value)
            } else {
                (key, scrub(value))
            }
        })
        .collect();

    Ok(serde_json::from_value(Value::Object(scrubbed))?)
}
