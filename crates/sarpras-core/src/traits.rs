//! Common traits for storage and collaborators
//!
//! Defines the transactional storage the booking engine runs on and the
//! external collaborators it consults: the inventory ledger, the approver
//! directory, the authorization oracle, and the audit and notification sinks.

use crate::error::AppError;
use crate::models::{
    ApprovalAggregate, ApprovalTask, AuditEntry, Booking, BookingLine, BookingStatus, Equipment,
    EquipmentUnit, Notification, Quota, TimeWindow, UnitAssignment, UnitStatus, Venue,
    VenueStatus,
};
use crate::ActorId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;

/// Source of storage transactions
#[async_trait]
pub trait BookingStore: Send + Sync {
    type Tx: BookingTx;

    /// Open a transaction. Dropping it without `commit` rolls everything back.
    async fn begin(&self) -> Result<Self::Tx, AppError>;
}

/// Quantity of an equipment claimed by another booking in an overlapping window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EquipmentClaim {
    pub booking_id: Uuid,
    pub requester_id: Uuid,
    pub status: BookingStatus,
    /// Approved quantity when decided, requested quantity otherwise
    pub quantity: i32,
    pub conflict_group: Option<Uuid>,
}

/// One storage transaction.
///
/// Reads used for a decision lock the rows they return, so a decision and the
/// writes depending on it commit together. Overlap scans only ever return
/// bookings in an active status (pending, approved, picked up).
#[async_trait]
pub trait BookingTx: Send + Sized {
    // ==================== Bookings ====================

    /// Find and lock a booking
    async fn find_booking(&mut self, id: Uuid) -> Result<Option<Booking>, AppError>;

    async fn insert_booking(&mut self, booking: &Booking) -> Result<(), AppError>;

    async fn update_booking(&mut self, booking: &Booking) -> Result<(), AppError>;

    /// Hard delete a booking together with its lines, approvals and assignments
    async fn delete_booking(&mut self, id: Uuid) -> Result<bool, AppError>;

    /// Bookings whose window ended before `now` and still need the sweep:
    /// pending or approved ones, and picked up ones not yet flagged overdue
    async fn find_ended_bookings(
        &mut self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Booking>, AppError>;

    /// Approved bookings starting within `[from, to)` without a pickup reminder
    async fn find_approved_starting(
        &mut self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Booking>, AppError>;

    async fn set_conflict_group(&mut self, booking_ids: &[Uuid], token: Uuid)
        -> Result<(), AppError>;

    // ==================== Lines ====================

    async fn find_lines(&mut self, booking_id: Uuid) -> Result<Vec<BookingLine>, AppError>;

    async fn find_line(&mut self, line_id: Uuid) -> Result<Option<BookingLine>, AppError>;

    /// Replace the whole line set of a booking
    async fn replace_lines(
        &mut self,
        booking_id: Uuid,
        lines: &[BookingLine],
    ) -> Result<(), AppError>;

    async fn update_line(&mut self, line: &BookingLine) -> Result<(), AppError>;

    // ==================== Overlap scans ====================

    /// Active bookings of the venue overlapping `window`
    async fn find_venue_overlaps(
        &mut self,
        venue_id: Uuid,
        window: TimeWindow,
        exclude: Option<Uuid>,
    ) -> Result<Vec<Booking>, AppError>;

    /// Active bookings at the identical custom location overlapping `window`
    async fn find_location_overlaps(
        &mut self,
        location: &str,
        window: TimeWindow,
        exclude: Option<Uuid>,
    ) -> Result<Vec<Booking>, AppError>;

    /// Claims of active bookings on the equipment overlapping `window`
    async fn find_equipment_claims(
        &mut self,
        equipment_id: Uuid,
        window: TimeWindow,
        exclude: Option<Uuid>,
    ) -> Result<Vec<EquipmentClaim>, AppError>;

    // ==================== Approvals ====================

    async fn find_approval(
        &mut self,
        booking_id: Uuid,
    ) -> Result<Option<ApprovalAggregate>, AppError>;

    /// Insert or update the aggregate
    async fn save_approval(&mut self, approval: &ApprovalAggregate) -> Result<(), AppError>;

    async fn find_tasks(&mut self, booking_id: Uuid) -> Result<Vec<ApprovalTask>, AppError>;

    /// Find and lock a task
    async fn find_task(&mut self, task_id: Uuid) -> Result<Option<ApprovalTask>, AppError>;

    async fn insert_tasks(&mut self, tasks: &[ApprovalTask]) -> Result<(), AppError>;

    async fn update_task(&mut self, task: &ApprovalTask) -> Result<(), AppError>;

    async fn delete_tasks(&mut self, task_ids: &[Uuid]) -> Result<(), AppError>;

    // ==================== Quota ====================

    /// Find and lock a requester's quota row
    async fn find_quota(&mut self, requester_id: Uuid) -> Result<Option<Quota>, AppError>;

    /// Insert or update the quota row
    async fn save_quota(&mut self, quota: &Quota) -> Result<(), AppError>;

    // ==================== Units and assignments ====================

    /// Find and lock a serialized unit
    async fn find_unit(&mut self, unit_id: Uuid) -> Result<Option<EquipmentUnit>, AppError>;

    async fn update_unit_status(&mut self, unit_id: Uuid, status: UnitStatus)
        -> Result<(), AppError>;

    async fn find_assignments(&mut self, booking_id: Uuid)
        -> Result<Vec<UnitAssignment>, AppError>;

    async fn find_active_assignment(
        &mut self,
        unit_id: Uuid,
    ) -> Result<Option<UnitAssignment>, AppError>;

    /// Fails with `AllocationExclusivity` when the unit is already active elsewhere
    async fn insert_assignment(&mut self, assignment: &UnitAssignment) -> Result<(), AppError>;

    async fn update_assignment(&mut self, assignment: &UnitAssignment) -> Result<(), AppError>;

    // ==================== Lifecycle ====================

    async fn commit(self) -> Result<(), AppError>;
}

/// Read-only view of equipment and venue availability
#[async_trait]
pub trait InventoryLedger: Send + Sync {
    async fn equipment(&self, equipment_id: Uuid) -> Result<Option<Equipment>, AppError>;

    /// Units or pooled stock that can be lent out at all
    async fn available_quantity(&self, equipment_id: Uuid) -> Result<i64, AppError>;

    async fn venue(&self, venue_id: Uuid) -> Result<Option<Venue>, AppError>;

    async fn venue_status(&self, venue_id: Uuid) -> Result<VenueStatus, AppError> {
        self.venue(venue_id)
            .await?
            .map(|v| v.status)
            .ok_or(AppError::VenueNotFound(venue_id))
    }
}

/// Approver configured for a scope at a hierarchy level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApproverAssignment {
    pub approver_id: Uuid,
    /// Lower is more senior
    pub level: i32,
}

/// Who must approve what
#[async_trait]
pub trait ApproverDirectory: Send + Sync {
    async fn global_approvers(&self) -> Result<Vec<ApproverAssignment>, AppError>;

    async fn equipment_approvers(
        &self,
        equipment_id: Uuid,
    ) -> Result<Vec<ApproverAssignment>, AppError>;

    async fn venue_approvers(&self, venue_id: Uuid)
        -> Result<Vec<ApproverAssignment>, AppError>;
}

/// Capabilities gating privileged booking operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Decide any approval task regardless of hierarchy
    OverrideApproval,
    ValidatePickup,
    ValidateReturn,
    /// Re-bind serialized units of an ongoing booking
    ManageAllocations,
    /// Edit, cancel or delete bookings of other requesters
    ManageBookings,
}

impl Capability {
    /// Permission name as stored by the authorization system
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::OverrideApproval => "peminjaman.override",
            Capability::ValidatePickup => "peminjaman.validate_pickup",
            Capability::ValidateReturn => "peminjaman.validate_return",
            Capability::ManageAllocations => "peminjaman.manage_units",
            Capability::ManageBookings => "peminjaman.manage",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque authorization oracle
#[async_trait]
pub trait AuthorizationOracle: Send + Sync {
    async fn has_capability(
        &self,
        actor_id: ActorId,
        capability: Capability,
    ) -> Result<bool, AppError>;

    /// Fail with `Forbidden` unless the actor holds the capability
    async fn require(&self, actor_id: ActorId, capability: Capability) -> Result<(), AppError> {
        if self.has_capability(actor_id, capability).await? {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "actor {} lacks capability {}",
                actor_id, capability
            )))
        }
    }
}

/// Fire-and-forget audit sink; failures never roll back the business change
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry);
}

/// Fire-and-forget notification sink
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn dispatch(&self, notification: Notification);
}
