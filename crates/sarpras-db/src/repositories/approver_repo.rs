//! Approver directory backed by the `approver_assignments` table

use async_trait::async_trait;
use sarpras_core::{
    traits::{ApproverAssignment, ApproverDirectory},
    AppError, AppResult,
};
use sqlx::PgPool;
use tracing::{debug, error, instrument};
use uuid::Uuid;

/// PostgreSQL implementation of ApproverDirectory
pub struct PgApproverDirectory {
    pool: PgPool,
}

impl PgApproverDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn approvers(
        &self,
        scope: &str,
        resource_id: Option<Uuid>,
    ) -> AppResult<Vec<ApproverAssignment>> {
        let rows: Vec<(Uuid, i32)> = sqlx::query_as(
            r#"
            SELECT approver_id, level
            FROM approver_assignments
            WHERE scope = $1 AND resource_id IS NOT DISTINCT FROM $2
            ORDER BY level, approver_id
            "#,
        )
        .bind(scope)
        .bind(resource_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error loading {} approvers: {}", scope, e);
            AppError::Database(format!("Failed to load approvers: {}", e))
        })?;

        debug!("Found {} {} approvers", rows.len(), scope);

        Ok(rows
            .into_iter()
            .map(|(approver_id, level)| ApproverAssignment { approver_id, level })
            .collect())
    }
}

#[async_trait]
impl ApproverDirectory for PgApproverDirectory {
    #[instrument(skip(self))]
    async fn global_approvers(&self) -> AppResult<Vec<ApproverAssignment>> {
        self.approvers("global", None).await
    }

    #[instrument(skip(self))]
    async fn equipment_approvers(&self, equipment_id: Uuid) -> AppResult<Vec<ApproverAssignment>> {
        self.approvers("equipment", Some(equipment_id)).await
    }

    #[instrument(skip(self))]
    async fn venue_approvers(&self, venue_id: Uuid) -> AppResult<Vec<ApproverAssignment>> {
        self.approvers("venue", Some(venue_id)).await
    }
}
