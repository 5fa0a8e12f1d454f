use serde::Serialize;
use uuid::Uuid;

/// A tenant-like owner of log traffic
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub created_at: i64,
}

/// Result of resolving an inbound credential
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceRef {
    pub service_id: Uuid,
    pub token_id: String,
    /// Lowercase hex SHA-256 of the presented secret
    pub token_hash: String,
}
