//! Audit sink backed by the `audit_log` table
//!
//! Recording is fire-and-forget: a failed insert is logged and dropped, the
//! business change it describes has already been committed.

use async_trait::async_trait;
use sarpras_core::{models::AuditEntry, traits::AuditSink, AppError, AppResult};
use sqlx::PgPool;
use tracing::{debug, error, instrument, warn};

/// PostgreSQL implementation of AuditSink
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    /// Create a new audit sink
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert one audit entry
    #[instrument(skip(self, entry), fields(action = %entry.action))]
    pub async fn insert(&self, entry: &AuditEntry) -> AppResult<()> {
        debug!("Recording {} on {} {}", entry.action, entry.entity_type, entry.entity_id);

        sqlx::query(
            r#"
            INSERT INTO audit_log (
                action, entity_type, entity_id, before_state, after_state,
                actor_id, recorded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&entry.action)
        .bind(&entry.entity_type)
        .bind(entry.entity_id)
        .bind(&entry.before)
        .bind(&entry.after)
        .bind(entry.actor_id)
        .bind(entry.recorded_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error creating audit entry: {}", e);
            AppError::Database(format!("Failed to create audit entry: {}", e))
        })?;

        Ok(())
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn record(&self, entry: AuditEntry) {
        if let Err(e) = self.insert(&entry).await {
            warn!(
                "Failed to record audit entry {} for {} {}: {}",
                entry.action, entry.entity_type, entry.entity_id, e
            );
        }
    }
}
