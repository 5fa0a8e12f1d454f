//! Read access to services and their ingestion tokens.
//!
//! Services and tokens are managed elsewhere; the core resolves a presented
//! secret to its service and refreshes `last_used_at`. `create_service` and
//! `register_token` exist for provisioning scripts and tests.

use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{Service, ServiceRef};

/// Lowercase hex SHA-256 of a raw service token
pub fn hash_token(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

/// Lowercase, ASCII alphanumerics separated by single dashes.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;

    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    if slug.is_empty() {
        "service".to_string()
    } else {
        slug
    }
}

/// First of `base`, `base-1`, `base-2`, ... not contained in `taken`.
pub fn unique_slug(base: &str, taken: &[String]) -> String {
    let mut counter = 0;
    loop {
        let candidate = if counter == 0 {
            base.to_string()
        } else {
            format!("{}-{}", base, counter)
        };
        if !taken.iter().any(|s| s == &candidate) {
            return candidate;
        }
        counter += 1;
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TokenRow {
    id: String,
    service_id: String,
}

#[derive(Debug, sqlx::FromRow)]
struct ServiceRow {
    name: String,
    slug: String,
    created_at: i64,
}

#[derive(Clone)]
pub struct ServiceDirectory {
    pool: SqlitePool,
}

impl ServiceDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Resolve a raw token to the service it authenticates.
    pub async fn resolve_token(&self, token: &str) -> Result<Option<ServiceRef>, sqlx::Error> {
        let token_hash = hash_token(token);

        let row = sqlx::query_as::<_, TokenRow>(
            "SELECT id, service_id FROM service_tokens WHERE token_hash = ?",
        )
        .bind(&token_hash)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        match Uuid::parse_str(&row.service_id) {
            Ok(service_id) => Ok(Some(ServiceRef {
                service_id,
                token_id: row.id,
                token_hash,
            })),
            Err(e) => {
                tracing::error!(token_id = %row.id, error = %e, "Token references a malformed service id");
                Ok(None)
            }
        }
    }

    /// Update `last_used_at` without blocking the caller.
    pub fn touch_last_used(&self, token_id: String) {
        let pool = self.pool.clone();
        tokio::spawn(async move {
            let result = sqlx::query("UPDATE service_tokens SET last_used_at = ? WHERE id = ?")
                .bind(chrono::Utc::now().timestamp_millis())
                .bind(&token_id)
                .execute(&pool)
                .await;

            if let Err(e) = result {
                tracing::warn!(token_id = %token_id, error = %e, "Failed to update token last_used_at");
            }
        });
    }

    pub async fn get_service(&self, id: Uuid) -> Result<Option<Service>, sqlx::Error> {
        let row = sqlx::query_as::<_, ServiceRow>(
            "SELECT name, slug, created_at FROM services WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Service {
            id,
            name: r.name,
            slug: r.slug,
            created_at: r.created_at,
        }))
    }

    pub async fn service_exists(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        Ok(self.get_service(id).await?.is_some())
    }

    /// Create a service with a slug derived from its name.
    pub async fn create_service(&self, name: &str) -> Result<Service, sqlx::Error> {
        let base = slugify(name);
        let taken: Vec<String> = sqlx::query_scalar(
            "SELECT slug FROM services WHERE slug = ? OR slug LIKE ? || '-%'",
        )
        .bind(&base)
        .bind(&base)
        .fetch_all(&self.pool)
        .await?;

        let service = Service {
            id: Uuid::new_v4(),
            name: name.to_string(),
            slug: unique_slug(&base, &taken),
            created_at: chrono::Utc::now().timestamp_millis(),
        };

        sqlx::query("INSERT INTO services (id, name, slug, created_at) VALUES (?, ?, ?, ?)")
            .bind(service.id.to_string())
            .bind(&service.name)
            .bind(&service.slug)
            .bind(service.created_at)
            .execute(&self.pool)
            .await?;

        Ok(service)
    }

    /// Store a token for `service_id`; only the hash of `raw_token` is kept.
    pub async fn register_token(
        &self,
        service_id: Uuid,
        name: &str,
        raw_token: &str,
    ) -> Result<String, sqlx::Error> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO service_tokens (id, service_id, name, token_hash, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(service_id.to_string())
        .bind(name)
        .bind(hash_token(raw_token))
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(id)
    }
}
