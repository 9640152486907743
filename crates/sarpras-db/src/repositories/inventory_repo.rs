//! Inventory ledger backed by the equipment and venue tables

use async_trait::async_trait;
use sarpras_core::{
    models::{Equipment, Tracking, Venue, VenueStatus},
    traits::InventoryLedger,
    AppError, AppResult,
};
use sqlx::PgPool;
use tracing::{debug, error, instrument};
use uuid::Uuid;

/// PostgreSQL implementation of InventoryLedger
pub struct PgInventoryLedger {
    pool: PgPool,
}

impl PgInventoryLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InventoryLedger for PgInventoryLedger {
    #[instrument(skip(self))]
    async fn equipment(&self, equipment_id: Uuid) -> AppResult<Option<Equipment>> {
        let row: Option<(Uuid, String, String)> =
            sqlx::query_as("SELECT id, name, tracking FROM equipment WHERE id = $1")
                .bind(equipment_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    error!("Database error finding equipment {}: {}", equipment_id, e);
                    AppError::Database(format!("Failed to find equipment: {}", e))
                })?;

        Ok(row.map(|(id, name, tracking)| Equipment {
            id,
            name,
            tracking: Tracking::from_str(&tracking).unwrap_or_default(),
        }))
    }

    /// Pooled stock count, or the number of serialized units in lendable condition
    #[instrument(skip(self))]
    async fn available_quantity(&self, equipment_id: Uuid) -> AppResult<i64> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            SELECT
                CASE WHEN e.tracking = 'serialized' THEN (
                    SELECT COUNT(*) FROM equipment_units u
                    WHERE u.equipment_id = e.id AND u.status = 'tersedia'
                )
                ELSE e.stock_quantity
                END::BIGINT
            FROM equipment e
            WHERE e.id = $1
            "#,
        )
        .bind(equipment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error counting stock of {}: {}", equipment_id, e);
            AppError::Database(format!("Failed to count available quantity: {}", e))
        })?;

        let (quantity,) = row.ok_or(AppError::EquipmentNotFound(equipment_id))?;
        debug!("Equipment {} has {} available", equipment_id, quantity);
        Ok(quantity)
    }

    #[instrument(skip(self))]
    async fn venue(&self, venue_id: Uuid) -> AppResult<Option<Venue>> {
        let row: Option<(Uuid, String, String)> =
            sqlx::query_as("SELECT id, name, status FROM venues WHERE id = $1")
                .bind(venue_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    error!("Database error finding venue {}: {}", venue_id, e);
                    AppError::Database(format!("Failed to find venue: {}", e))
                })?;

        Ok(row.map(|(id, name, status)| Venue {
            id,
            name,
            status: VenueStatus::from_str(&status).unwrap_or(VenueStatus::Unavailable),
        }))
    }
}
