//! API key persistence.
//!
//! The raw key is shown exactly once at creation; storage holds only the
//! SHA-256 hash, and lookups go through the hash.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use lattice_error::Result;

use super::db_error;

/// A stored API key (hash never leaves this module).
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ApiKey {
    /// Key id.
    pub id:                Uuid,
    /// Owning tenant.
    pub tenant_id:         Uuid,
    /// Display name.
    pub name:              String,
    /// Widgets this key may read; `None` means all of the tenant's.
    pub scoped_widget_ids: Option<Vec<Uuid>>,
    /// Per-key rate limit override (requests per window).
    pub rate_limit:        Option<i64>,
    /// Revocation timestamp; a revoked key never authenticates.
    pub revoked_at:        Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at:        DateTime<Utc>,
}

impl ApiKey {
    /// Whether this key has been revoked.
    #[must_use]
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}

/// Create payload.
#[derive(Debug, Clone)]
pub struct NewApiKey {
    /// Display name.
    pub name:              String,
    /// Optional widget scope.
    pub scoped_widget_ids: Option<Vec<Uuid>>,
    /// Optional per-key rate limit.
    pub rate_limit:        Option<i64>,
}

/// API key repository.
#[derive(Clone)]
pub struct ApiKeyRepo {
    pool: PgPool,
}

const COLUMNS: &str =
    "id, tenant_id, name, scoped_widget_ids, rate_limit, revoked_at, created_at";

impl ApiKeyRepo {
    /// Create a repository over the shared pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// List a tenant's keys.
    pub async fn list(&self, tenant_id: Uuid) -> Result<Vec<ApiKey>> {
        sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM api_keys WHERE tenant_id = $1 ORDER BY created_at DESC"
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)
    }

    /// Insert a key with its hash; the caller keeps (and returns once) the
    /// raw value.
    pub async fn create(&self, tenant_id: Uuid, key_hash: &str, new: &NewApiKey) -> Result<ApiKey> {
        sqlx::query_as(&format!(
            "INSERT INTO api_keys \
             (id, tenant_id, name, key_hash, scoped_widget_ids, rate_limit, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, now()) \
             RETURNING {COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(&new.name)
        .bind(key_hash)
        .bind(&new.scoped_widget_ids)
        .bind(new.rate_limit)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)
    }

    /// Resolve a presented key by hash. Returns the key row regardless of
    /// revocation; the auth layer decides how revoked keys fail.
    pub async fn find_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>> {
        sqlx::query_as(&format!("SELECT {COLUMNS} FROM api_keys WHERE key_hash = $1"))
            .bind(key_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)
    }

    /// Revoke a key. Returns whether a live key existed.
    pub async fn revoke(&self, tenant_id: Uuid, id: Uuid) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE api_keys SET revoked_at = now() \
             WHERE tenant_id = $1 AND id = $2 AND revoked_at IS NULL",
        )
        .bind(tenant_id)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(updated.rows_affected() > 0)
    }
}
