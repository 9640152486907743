//! Capability lookups against the `actor_capabilities` table

use async_trait::async_trait;
use sarpras_core::{
    traits::{AuthorizationOracle, Capability},
    ActorId, AppError, AppResult,
};
use sqlx::PgPool;
use tracing::{error, instrument};

/// PostgreSQL implementation of AuthorizationOracle
pub struct PgAuthorizationOracle {
    pool: PgPool,
}

impl PgAuthorizationOracle {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuthorizationOracle for PgAuthorizationOracle {
    #[instrument(skip(self))]
    async fn has_capability(&self, actor_id: ActorId, capability: Capability) -> AppResult<bool> {
        let (granted,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM actor_capabilities
                WHERE actor_id = $1 AND capability = $2
            )
            "#,
        )
        .bind(actor_id)
        .bind(capability.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error checking capability {}: {}", capability, e);
            AppError::Database(format!("Failed to check capability: {}", e))
        })?;

        Ok(granted)
    }
}
