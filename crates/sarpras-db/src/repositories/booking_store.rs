//! PostgreSQL booking store
//!
//! Every operation of the booking engine runs inside one `PgBookingTx`.
//! Rows read to take a decision are selected `FOR UPDATE`, and unit
//! exclusivity is backed by the unique indexes on `unit_assignments`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sarpras_core::{
    models::{
        ApprovalAggregate, ApprovalScope, ApprovalStatus, ApprovalTask, AssignmentStatus,
        Booking, BookingLine, BookingStatus, Decision, EquipmentUnit, LoanType, Quota,
        ResourceApproval, ScopeStatus, TaskStatus, TimeWindow, UnitAssignment, UnitStatus,
    },
    traits::{BookingStore, BookingTx, EquipmentClaim},
    AppError, AppResult,
};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

const BOOKING_COLUMNS: &str = r#"
    id, requester_id, loan_type, venue_id, custom_location, participant_count,
    group_id, title, start_at, end_at, status, conflict_group, document_ref,
    rejection_reason, cancellation_reason, cancelled_by, cancelled_at,
    pickup_validated_by, pickup_validated_at, pickup_photo,
    return_validated_by, return_validated_at, return_photo,
    pickup_reminder_sent_at, overdue_notified_at, quota_released,
    created_at, updated_at
"#;

const LINE_COLUMNS: &str = r#"
    id, booking_id, equipment_id, quantity_requested, quantity_approved,
    notes, picked_up_at, returned_at
"#;

const TASK_COLUMNS: &str = r#"
    id, booking_id, approver_id, scope, resource_id, level, status,
    decided_at, notes, overridden_by, overridden_at, override_decision, created_at
"#;

const ASSIGNMENT_COLUMNS: &str = r#"
    id, booking_id, line_id, unit_id, status, assigned_by, assigned_at,
    released_by, released_at
"#;

/// Log a storage failure and turn it into an `AppError::Database`
fn db_error(action: &str, e: sqlx::Error) -> AppError {
    error!("Database error trying to {}: {}", action, e);
    AppError::Database(format!("Failed to {}: {}", action, e))
}

/// Unique violations on `unit_assignments` mean the unit is held elsewhere
fn assignment_error(action: &str, unit_id: Uuid, e: sqlx::Error) -> AppError {
    let unique_violation = e
        .as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false);

    if unique_violation {
        warn!("Unit {} is already actively assigned", unit_id);
        AppError::AllocationExclusivity {
            unit_id,
            holder: None,
        }
    } else {
        db_error(action, e)
    }
}

/// PostgreSQL implementation of BookingStore
pub struct PgBookingStore {
    pool: PgPool,
}

impl PgBookingStore {
    /// Create a new booking store
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BookingStore for PgBookingStore {
    type Tx = PgBookingTx;

    #[instrument(skip(self))]
    async fn begin(&self) -> AppResult<PgBookingTx> {
        let tx = self.pool.begin().await.map_err(|e| {
            error!("Failed to begin transaction: {}", e);
            AppError::Transaction(format!("Failed to begin transaction: {}", e))
        })?;

        Ok(PgBookingTx { tx })
    }
}

/// One open PostgreSQL transaction; rolled back when dropped uncommitted
pub struct PgBookingTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl BookingTx for PgBookingTx {
    // ==================== Bookings ====================

    #[instrument(skip(self))]
    async fn find_booking(&mut self, id: Uuid) -> AppResult<Option<Booking>> {
        debug!("Locking booking {}", id);

        let sql = format!("SELECT {} FROM bookings WHERE id = $1 FOR UPDATE", BOOKING_COLUMNS);
        let row = sqlx::query_as::<Postgres, BookingRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_error("find booking", e))?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self, booking), fields(booking_id = %booking.id))]
    async fn insert_booking(&mut self, booking: &Booking) -> AppResult<()> {
        debug!("Inserting booking for requester {}", booking.requester_id);

        sqlx::query(
            r#"
            INSERT INTO bookings (
                id, requester_id, loan_type, venue_id, custom_location, participant_count,
                group_id, title, start_at, end_at, status, conflict_group, document_ref,
                rejection_reason, cancellation_reason, cancelled_by, cancelled_at,
                pickup_validated_by, pickup_validated_at, pickup_photo,
                return_validated_by, return_validated_at, return_photo,
                pickup_reminder_sent_at, overdue_notified_at, quota_released,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                    $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28)
            "#,
        )
        .bind(booking.id)
        .bind(booking.requester_id)
        .bind(booking.loan_type.to_string())
        .bind(booking.venue_id)
        .bind(&booking.custom_location)
        .bind(booking.participant_count)
        .bind(booking.group_id)
        .bind(&booking.title)
        .bind(booking.start_at)
        .bind(booking.end_at)
        .bind(booking.status.to_string())
        .bind(booking.conflict_group)
        .bind(&booking.document_ref)
        .bind(&booking.rejection_reason)
        .bind(&booking.cancellation_reason)
        .bind(booking.cancelled_by)
        .bind(booking.cancelled_at)
        .bind(booking.pickup_validated_by)
        .bind(booking.pickup_validated_at)
        .bind(&booking.pickup_photo)
        .bind(booking.return_validated_by)
        .bind(booking.return_validated_at)
        .bind(&booking.return_photo)
        .bind(booking.pickup_reminder_sent_at)
        .bind(booking.overdue_notified_at)
        .bind(booking.quota_released)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("insert booking", e))?;

        Ok(())
    }

    #[instrument(skip(self, booking), fields(booking_id = %booking.id))]
    async fn update_booking(&mut self, booking: &Booking) -> AppResult<()> {
        debug!("Updating booking, status {}", booking.status);

        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET loan_type = $2,
                venue_id = $3,
                custom_location = $4,
                participant_count = $5,
                group_id = $6,
                title = $7,
                start_at = $8,
                end_at = $9,
                status = $10,
                conflict_group = $11,
                document_ref = $12,
                rejection_reason = $13,
                cancellation_reason = $14,
                cancelled_by = $15,
                cancelled_at = $16,
                pickup_validated_by = $17,
                pickup_validated_at = $18,
                pickup_photo = $19,
                return_validated_by = $20,
                return_validated_at = $21,
                return_photo = $22,
                pickup_reminder_sent_at = $23,
                overdue_notified_at = $24,
                quota_released = $25,
                updated_at = $26
            WHERE id = $1
            "#,
        )
        .bind(booking.id)
        .bind(booking.loan_type.to_string())
        .bind(booking.venue_id)
        .bind(&booking.custom_location)
        .bind(booking.participant_count)
        .bind(booking.group_id)
        .bind(&booking.title)
        .bind(booking.start_at)
        .bind(booking.end_at)
        .bind(booking.status.to_string())
        .bind(booking.conflict_group)
        .bind(&booking.document_ref)
        .bind(&booking.rejection_reason)
        .bind(&booking.cancellation_reason)
        .bind(booking.cancelled_by)
        .bind(booking.cancelled_at)
        .bind(booking.pickup_validated_by)
        .bind(booking.pickup_validated_at)
        .bind(&booking.pickup_photo)
        .bind(booking.return_validated_by)
        .bind(booking.return_validated_at)
        .bind(&booking.return_photo)
        .bind(booking.pickup_reminder_sent_at)
        .bind(booking.overdue_notified_at)
        .bind(booking.quota_released)
        .bind(booking.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("update booking", e))?;

        if result.rows_affected() == 0 {
            return Err(AppError::BookingNotFound(booking.id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_booking(&mut self, id: Uuid) -> AppResult<bool> {
        debug!("Deleting booking {}", id);

        // Lines, approvals and assignments cascade
        let result = sqlx::query("DELETE FROM bookings WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("delete booking", e))?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn find_ended_bookings(
        &mut self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<Vec<Booking>> {
        let sql = format!(
            r#"
            SELECT {} FROM bookings
            WHERE end_at < $1
              AND (status IN ('pending', 'approved')
                   OR (status = 'picked_up' AND overdue_notified_at IS NULL))
            ORDER BY end_at
            LIMIT $2
            "#,
            BOOKING_COLUMNS
        );
        let rows = sqlx::query_as::<Postgres, BookingRow>(&sql)
            .bind(now)
            .bind(limit)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| db_error("find ended bookings", e))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    async fn find_approved_starting(
        &mut self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<Vec<Booking>> {
        let sql = format!(
            r#"
            SELECT {} FROM bookings
            WHERE status = 'approved'
              AND pickup_reminder_sent_at IS NULL
              AND start_at >= $1 AND start_at < $2
            ORDER BY start_at
            LIMIT $3
            "#,
            BOOKING_COLUMNS
        );
        let rows = sqlx::query_as::<Postgres, BookingRow>(&sql)
            .bind(from)
            .bind(to)
            .bind(limit)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| db_error("find bookings due for pickup", e))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self, booking_ids))]
    async fn set_conflict_group(&mut self, booking_ids: &[Uuid], token: Uuid) -> AppResult<()> {
        debug!("Linking {} bookings into conflict group {}", booking_ids.len(), token);

        sqlx::query("UPDATE bookings SET conflict_group = $2 WHERE id = ANY($1)")
            .bind(booking_ids.to_vec())
            .bind(token)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("set conflict group", e))?;

        Ok(())
    }

    // ==================== Lines ====================

    #[instrument(skip(self))]
    async fn find_lines(&mut self, booking_id: Uuid) -> AppResult<Vec<BookingLine>> {
        let sql = format!(
            "SELECT {} FROM booking_lines WHERE booking_id = $1 ORDER BY equipment_id FOR UPDATE",
            LINE_COLUMNS
        );
        let rows = sqlx::query_as::<Postgres, LineRow>(&sql)
            .bind(booking_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| db_error("find booking lines", e))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    async fn find_line(&mut self, line_id: Uuid) -> AppResult<Option<BookingLine>> {
        let sql = format!(
            "SELECT {} FROM booking_lines WHERE id = $1 FOR UPDATE",
            LINE_COLUMNS
        );
        let row = sqlx::query_as::<Postgres, LineRow>(&sql)
            .bind(line_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_error("find booking line", e))?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self, lines))]
    async fn replace_lines(&mut self, booking_id: Uuid, lines: &[BookingLine]) -> AppResult<()> {
        debug!("Replacing lines of booking {} with {} lines", booking_id, lines.len());

        sqlx::query("DELETE FROM booking_lines WHERE booking_id = $1")
            .bind(booking_id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("delete booking lines", e))?;

        for line in lines {
            sqlx::query(
                r#"
                INSERT INTO booking_lines (
                    id, booking_id, equipment_id, quantity_requested, quantity_approved,
                    notes, picked_up_at, returned_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(line.id)
            .bind(booking_id)
            .bind(line.equipment_id)
            .bind(line.quantity_requested)
            .bind(line.quantity_approved)
            .bind(&line.notes)
            .bind(line.picked_up_at)
            .bind(line.returned_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("insert booking line", e))?;
        }

        Ok(())
    }

    #[instrument(skip(self, line), fields(line_id = %line.id))]
    async fn update_line(&mut self, line: &BookingLine) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE booking_lines
            SET quantity_requested = $2,
                quantity_approved = $3,
                notes = $4,
                picked_up_at = $5,
                returned_at = $6
            WHERE id = $1
            "#,
        )
        .bind(line.id)
        .bind(line.quantity_requested)
        .bind(line.quantity_approved)
        .bind(&line.notes)
        .bind(line.picked_up_at)
        .bind(line.returned_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("update booking line", e))?;

        if result.rows_affected() == 0 {
            return Err(AppError::LineNotFound(line.id));
        }
        Ok(())
    }

    // ==================== Overlap scans ====================

    #[instrument(skip(self))]
    async fn find_venue_overlaps(
        &mut self,
        venue_id: Uuid,
        window: TimeWindow,
        exclude: Option<Uuid>,
    ) -> AppResult<Vec<Booking>> {
        let sql = format!(
            r#"
            SELECT {} FROM bookings
            WHERE venue_id = $1
              AND status IN ('pending', 'approved', 'picked_up')
              AND start_at < $3 AND $2 < end_at
              AND ($4::UUID IS NULL OR id <> $4)
            ORDER BY start_at
            "#,
            BOOKING_COLUMNS
        );
        let rows = sqlx::query_as::<Postgres, BookingRow>(&sql)
            .bind(venue_id)
            .bind(window.start)
            .bind(window.end)
            .bind(exclude)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| db_error("scan venue overlaps", e))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    async fn find_location_overlaps(
        &mut self,
        location: &str,
        window: TimeWindow,
        exclude: Option<Uuid>,
    ) -> AppResult<Vec<Booking>> {
        let sql = format!(
            r#"
            SELECT {} FROM bookings
            WHERE custom_location = $1
              AND status IN ('pending', 'approved', 'picked_up')
              AND start_at < $3 AND $2 < end_at
              AND ($4::UUID IS NULL OR id <> $4)
            ORDER BY start_at
            "#,
            BOOKING_COLUMNS
        );
        let rows = sqlx::query_as::<Postgres, BookingRow>(&sql)
            .bind(location)
            .bind(window.start)
            .bind(window.end)
            .bind(exclude)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| db_error("scan location overlaps", e))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    async fn find_equipment_claims(
        &mut self,
        equipment_id: Uuid,
        window: TimeWindow,
        exclude: Option<Uuid>,
    ) -> AppResult<Vec<EquipmentClaim>> {
        let rows = sqlx::query_as::<Postgres, ClaimRow>(
            r#"
            SELECT
                b.id AS booking_id, b.requester_id, b.status, b.conflict_group,
                SUM(COALESCE(l.quantity_approved, l.quantity_requested))::INTEGER AS quantity
            FROM booking_lines l
            JOIN bookings b ON b.id = l.booking_id
            WHERE l.equipment_id = $1
              AND b.status IN ('pending', 'approved', 'picked_up')
              AND b.start_at < $3 AND $2 < b.end_at
              AND ($4::UUID IS NULL OR b.id <> $4)
            GROUP BY b.id, b.requester_id, b.status, b.conflict_group
            ORDER BY b.id
            "#,
        )
        .bind(equipment_id)
        .bind(window.start)
        .bind(window.end)
        .bind(exclude)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| db_error("scan equipment claims", e))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    // ==================== Approvals ====================

    #[instrument(skip(self))]
    async fn find_approval(&mut self, booking_id: Uuid) -> AppResult<Option<ApprovalAggregate>> {
        let row = sqlx::query_as::<Postgres, ApprovalRow>(
            r#"
            SELECT
                booking_id, status, global_status, global_decided_by,
                global_decided_at, global_reason, resources, updated_at
            FROM approval_aggregates
            WHERE booking_id = $1
            FOR UPDATE
            "#,
        )
        .bind(booking_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_error("find approval", e))?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self, approval), fields(booking_id = %approval.booking_id))]
    async fn save_approval(&mut self, approval: &ApprovalAggregate) -> AppResult<()> {
        debug!("Saving approval aggregate, status {}", approval.status);

        sqlx::query(
            r#"
            INSERT INTO approval_aggregates (
                booking_id, status, global_status, global_decided_by,
                global_decided_at, global_reason, resources, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (booking_id) DO UPDATE
            SET status = EXCLUDED.status,
                global_status = EXCLUDED.global_status,
                global_decided_by = EXCLUDED.global_decided_by,
                global_decided_at = EXCLUDED.global_decided_at,
                global_reason = EXCLUDED.global_reason,
                resources = EXCLUDED.resources,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(approval.booking_id)
        .bind(approval.status.to_string())
        .bind(approval.global_status.to_string())
        .bind(approval.global_decided_by)
        .bind(approval.global_decided_at)
        .bind(&approval.global_reason)
        .bind(Json(&approval.resources))
        .bind(approval.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("save approval", e))?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_tasks(&mut self, booking_id: Uuid) -> AppResult<Vec<ApprovalTask>> {
        let sql = format!(
            r#"
            SELECT {} FROM approval_tasks
            WHERE booking_id = $1
            ORDER BY scope, resource_id, level, created_at
            FOR UPDATE
            "#,
            TASK_COLUMNS
        );
        let rows = sqlx::query_as::<Postgres, TaskRow>(&sql)
            .bind(booking_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| db_error("find approval tasks", e))?;

        rows.into_iter().map(ApprovalTask::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn find_task(&mut self, task_id: Uuid) -> AppResult<Option<ApprovalTask>> {
        let sql = format!("SELECT {} FROM approval_tasks WHERE id = $1 FOR UPDATE", TASK_COLUMNS);
        let row = sqlx::query_as::<Postgres, TaskRow>(&sql)
            .bind(task_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_error("find approval task", e))?;

        row.map(ApprovalTask::try_from).transpose()
    }

    #[instrument(skip(self, tasks))]
    async fn insert_tasks(&mut self, tasks: &[ApprovalTask]) -> AppResult<()> {
        debug!("Inserting {} approval tasks", tasks.len());

        for task in tasks {
            sqlx::query(
                r#"
                INSERT INTO approval_tasks (
                    id, booking_id, approver_id, scope, resource_id, level, status,
                    decided_at, notes, overridden_by, overridden_at, override_decision, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                "#,
            )
            .bind(task.id)
            .bind(task.booking_id)
            .bind(task.approver_id)
            .bind(task.scope.kind())
            .bind(task.scope.resource_id())
            .bind(task.level)
            .bind(task.status.to_string())
            .bind(task.decided_at)
            .bind(&task.notes)
            .bind(task.overridden_by)
            .bind(task.overridden_at)
            .bind(task.override_decision.map(|d| d.to_string()))
            .bind(task.created_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("insert approval task", e))?;
        }

        Ok(())
    }

    #[instrument(skip(self, task), fields(task_id = %task.id))]
    async fn update_task(&mut self, task: &ApprovalTask) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE approval_tasks
            SET status = $2,
                decided_at = $3,
                notes = $4,
                overridden_by = $5,
                overridden_at = $6,
                override_decision = $7
            WHERE id = $1
            "#,
        )
        .bind(task.id)
        .bind(task.status.to_string())
        .bind(task.decided_at)
        .bind(&task.notes)
        .bind(task.overridden_by)
        .bind(task.overridden_at)
        .bind(task.override_decision.map(|d| d.to_string()))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("update approval task", e))?;

        if result.rows_affected() == 0 {
            return Err(AppError::TaskNotFound(task.id));
        }
        Ok(())
    }

    #[instrument(skip(self, task_ids))]
    async fn delete_tasks(&mut self, task_ids: &[Uuid]) -> AppResult<()> {
        if task_ids.is_empty() {
            return Ok(());
        }

        sqlx::query("DELETE FROM approval_tasks WHERE id = ANY($1)")
            .bind(task_ids.to_vec())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("delete approval tasks", e))?;

        Ok(())
    }

    // ==================== Quota ====================

    #[instrument(skip(self))]
    async fn find_quota(&mut self, requester_id: Uuid) -> AppResult<Option<Quota>> {
        let row = sqlx::query_as::<Postgres, QuotaRow>(
            r#"
            SELECT requester_id, active_count, max_active, updated_at
            FROM booking_quotas
            WHERE requester_id = $1
            FOR UPDATE
            "#,
        )
        .bind(requester_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_error("find quota", e))?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self, quota), fields(requester_id = %quota.requester_id))]
    async fn save_quota(&mut self, quota: &Quota) -> AppResult<()> {
        debug!("Saving quota {}/{}", quota.active_count, quota.max_active);

        sqlx::query(
            r#"
            INSERT INTO booking_quotas (requester_id, active_count, max_active, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (requester_id) DO UPDATE
            SET active_count = EXCLUDED.active_count,
                max_active = EXCLUDED.max_active,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(quota.requester_id)
        .bind(quota.active_count)
        .bind(quota.max_active)
        .bind(quota.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("save quota", e))?;

        Ok(())
    }

    // ==================== Units and assignments ====================

    #[instrument(skip(self))]
    async fn find_unit(&mut self, unit_id: Uuid) -> AppResult<Option<EquipmentUnit>> {
        let row = sqlx::query_as::<Postgres, UnitRow>(
            r#"
            SELECT id, equipment_id, serial_number, status
            FROM equipment_units
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(unit_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_error("find equipment unit", e))?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn update_unit_status(&mut self, unit_id: Uuid, status: UnitStatus) -> AppResult<()> {
        debug!("Setting unit {} status to {}", unit_id, status);

        let result = sqlx::query("UPDATE equipment_units SET status = $2 WHERE id = $1")
            .bind(unit_id)
            .bind(status.to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("update unit status", e))?;

        if result.rows_affected() == 0 {
            return Err(AppError::UnitNotFound(unit_id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_assignments(&mut self, booking_id: Uuid) -> AppResult<Vec<UnitAssignment>> {
        let sql = format!(
            r#"
            SELECT {} FROM unit_assignments
            WHERE booking_id = $1
            ORDER BY assigned_at
            FOR UPDATE
            "#,
            ASSIGNMENT_COLUMNS
        );
        let rows = sqlx::query_as::<Postgres, AssignmentRow>(&sql)
            .bind(booking_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| db_error("find unit assignments", e))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    async fn find_active_assignment(&mut self, unit_id: Uuid) -> AppResult<Option<UnitAssignment>> {
        let sql = format!(
            "SELECT {} FROM unit_assignments WHERE unit_id = $1 AND status = 'active'",
            ASSIGNMENT_COLUMNS
        );
        let row = sqlx::query_as::<Postgres, AssignmentRow>(&sql)
            .bind(unit_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_error("find active assignment", e))?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self, assignment), fields(unit_id = %assignment.unit_id))]
    async fn insert_assignment(&mut self, assignment: &UnitAssignment) -> AppResult<()> {
        debug!("Binding unit to booking {}", assignment.booking_id);

        sqlx::query(
            r#"
            INSERT INTO unit_assignments (
                id, booking_id, line_id, unit_id, status, assigned_by, assigned_at,
                released_by, released_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(assignment.id)
        .bind(assignment.booking_id)
        .bind(assignment.line_id)
        .bind(assignment.unit_id)
        .bind(assignment.status.to_string())
        .bind(assignment.assigned_by)
        .bind(assignment.assigned_at)
        .bind(assignment.released_by)
        .bind(assignment.released_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| assignment_error("insert unit assignment", assignment.unit_id, e))?;

        Ok(())
    }

    #[instrument(skip(self, assignment), fields(unit_id = %assignment.unit_id))]
    async fn update_assignment(&mut self, assignment: &UnitAssignment) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE unit_assignments
            SET line_id = $2,
                status = $3,
                assigned_by = $4,
                assigned_at = $5,
                released_by = $6,
                released_at = $7
            WHERE id = $1
            "#,
        )
        .bind(assignment.id)
        .bind(assignment.line_id)
        .bind(assignment.status.to_string())
        .bind(assignment.assigned_by)
        .bind(assignment.assigned_at)
        .bind(assignment.released_by)
        .bind(assignment.released_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| assignment_error("update unit assignment", assignment.unit_id, e))?;

        if result.rows_affected() == 0 {
            return Err(AppError::AssignmentNotFound(assignment.id));
        }
        Ok(())
    }

    // ==================== Lifecycle ====================

    async fn commit(self) -> AppResult<()> {
        self.tx.commit().await.map_err(|e| {
            error!("Failed to commit transaction: {}", e);
            AppError::Transaction(format!("Failed to commit transaction: {}", e))
        })
    }
}

// ==================== Row types ====================

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    requester_id: Uuid,
    loan_type: String,
    venue_id: Option<Uuid>,
    custom_location: Option<String>,
    participant_count: Option<i32>,
    group_id: Option<Uuid>,
    title: String,
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
    status: String,
    conflict_group: Option<Uuid>,
    document_ref: Option<String>,
    rejection_reason: Option<String>,
    cancellation_reason: Option<String>,
    cancelled_by: Option<Uuid>,
    cancelled_at: Option<DateTime<Utc>>,
    pickup_validated_by: Option<Uuid>,
    pickup_validated_at: Option<DateTime<Utc>>,
    pickup_photo: Option<String>,
    return_validated_by: Option<Uuid>,
    return_validated_at: Option<DateTime<Utc>>,
    return_photo: Option<String>,
    pickup_reminder_sent_at: Option<DateTime<Utc>>,
    overdue_notified_at: Option<DateTime<Utc>>,
    quota_released: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<BookingRow> for Booking {
    fn from(row: BookingRow) -> Self {
        Booking {
            id: row.id,
            requester_id: row.requester_id,
            loan_type: LoanType::from_str(&row.loan_type).unwrap_or_default(),
            venue_id: row.venue_id,
            custom_location: row.custom_location,
            participant_count: row.participant_count,
            group_id: row.group_id,
            title: row.title,
            start_at: row.start_at,
            end_at: row.end_at,
            status: BookingStatus::from_str(&row.status).unwrap_or_default(),
            conflict_group: row.conflict_group,
            document_ref: row.document_ref,
            rejection_reason: row.rejection_reason,
            cancellation_reason: row.cancellation_reason,
            cancelled_by: row.cancelled_by,
            cancelled_at: row.cancelled_at,
            pickup_validated_by: row.pickup_validated_by,
            pickup_validated_at: row.pickup_validated_at,
            pickup_photo: row.pickup_photo,
            return_validated_by: row.return_validated_by,
            return_validated_at: row.return_validated_at,
            return_photo: row.return_photo,
            pickup_reminder_sent_at: row.pickup_reminder_sent_at,
            overdue_notified_at: row.overdue_notified_at,
            quota_released: row.quota_released,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct LineRow {
    id: Uuid,
    booking_id: Uuid,
    equipment_id: Uuid,
    quantity_requested: i32,
    quantity_approved: Option<i32>,
    notes: Option<String>,
    picked_up_at: Option<DateTime<Utc>>,
    returned_at: Option<DateTime<Utc>>,
}

impl From<LineRow> for BookingLine {
    fn from(row: LineRow) -> Self {
        BookingLine {
            id: row.id,
            booking_id: row.booking_id,
            equipment_id: row.equipment_id,
            quantity_requested: row.quantity_requested,
            quantity_approved: row.quantity_approved,
            notes: row.notes,
            picked_up_at: row.picked_up_at,
            returned_at: row.returned_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ClaimRow {
    booking_id: Uuid,
    requester_id: Uuid,
    status: String,
    conflict_group: Option<Uuid>,
    quantity: i32,
}

impl From<ClaimRow> for EquipmentClaim {
    fn from(row: ClaimRow) -> Self {
        EquipmentClaim {
            booking_id: row.booking_id,
            requester_id: row.requester_id,
            status: BookingStatus::from_str(&row.status).unwrap_or_default(),
            quantity: row.quantity,
            conflict_group: row.conflict_group,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ApprovalRow {
    booking_id: Uuid,
    status: String,
    global_status: String,
    global_decided_by: Option<Uuid>,
    global_decided_at: Option<DateTime<Utc>>,
    global_reason: Option<String>,
    resources: Json<Vec<ResourceApproval>>,
    updated_at: DateTime<Utc>,
}

impl From<ApprovalRow> for ApprovalAggregate {
    fn from(row: ApprovalRow) -> Self {
        ApprovalAggregate {
            booking_id: row.booking_id,
            status: ApprovalStatus::from_str(&row.status).unwrap_or_default(),
            global_status: ScopeStatus::from_str(&row.global_status).unwrap_or_default(),
            global_decided_by: row.global_decided_by,
            global_decided_at: row.global_decided_at,
            global_reason: row.global_reason,
            resources: row.resources.0,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: Uuid,
    booking_id: Uuid,
    approver_id: Uuid,
    scope: String,
    resource_id: Option<Uuid>,
    level: i32,
    status: String,
    decided_at: Option<DateTime<Utc>>,
    notes: Option<String>,
    overridden_by: Option<Uuid>,
    overridden_at: Option<DateTime<Utc>>,
    override_decision: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for ApprovalTask {
    type Error = AppError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let scope = ApprovalScope::from_parts(&row.scope, row.resource_id).ok_or_else(|| {
            error!("Approval task {} has malformed scope {}", row.id, row.scope);
            AppError::Database(format!("Malformed scope on approval task {}", row.id))
        })?;

        Ok(ApprovalTask {
            id: row.id,
            booking_id: row.booking_id,
            approver_id: row.approver_id,
            scope,
            level: row.level,
            status: TaskStatus::from_str(&row.status).unwrap_or_default(),
            decided_at: row.decided_at,
            notes: row.notes,
            overridden_by: row.overridden_by,
            overridden_at: row.overridden_at,
            override_decision: row.override_decision.as_deref().and_then(Decision::from_str),
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct QuotaRow {
    requester_id: Uuid,
    active_count: i32,
    max_active: i32,
    updated_at: DateTime<Utc>,
}

impl From<QuotaRow> for Quota {
    fn from(row: QuotaRow) -> Self {
        Quota {
            requester_id: row.requester_id,
            active_count: row.active_count,
            max_active: row.max_active,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct UnitRow {
    id: Uuid,
    equipment_id: Uuid,
    serial_number: String,
    status: String,
}

impl From<UnitRow> for EquipmentUnit {
    fn from(row: UnitRow) -> Self {
        EquipmentUnit {
            id: row.id,
            equipment_id: row.equipment_id,
            serial_number: row.serial_number,
            status: UnitStatus::from_str(&row.status).unwrap_or_default(),
        }
    }
}

#[derive(sqlx::FromRow)]
struct AssignmentRow {
    id: Uuid,
    booking_id: Uuid,
    line_id: Uuid,
    unit_id: Uuid,
    status: String,
    assigned_by: Uuid,
    assigned_at: DateTime<Utc>,
    released_by: Option<Uuid>,
    released_at: Option<DateTime<Utc>>,
}

impl From<AssignmentRow> for UnitAssignment {
    fn from(row: AssignmentRow) -> Self {
        UnitAssignment {
            id: row.id,
            booking_id: row.booking_id,
            line_id: row.line_id,
            unit_id: row.unit_id,
            status: AssignmentStatus::from_str(&row.status).unwrap_or_default(),
            assigned_by: row.assigned_by,
            assigned_at: row.assigned_at,
            released_by: row.released_by,
            released_at: row.released_at,
        }
    }
}
