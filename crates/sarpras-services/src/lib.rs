//! Business logic services for Sarpras
//!
//! This crate contains the services that drive a booking from submission to
//! return: conflict detection, quota enforcement, the booking lifecycle, the
//! approval workflow, unit allocation at pickup and return, and the expiry
//! sweep.
//!
//! # Architecture
//!
//! - Services are generic over a [`BookingStore`](sarpras_core::traits::BookingStore)
//!   and hold their collaborators behind `Arc`
//! - Every mutating operation runs in exactly one store transaction; audit
//!   entries and notifications are emitted only after it commits
//! - All operations are instrumented with tracing
//! - Failures are typed `AppError`s
//!
//! # Services
//!
//! - `ConflictDetector` - Venue, location and equipment quantity overlap checks
//! - `QuotaGuard` - Per-requester cap on active bookings
//! - `BookingLifecycle` - Create, update, cancel and delete bookings
//! - `ApprovalWorkflow` - Approval tasks, decisions and overrides
//! - `AllocationManager` - Pickup, return and unit re-binding
//! - `ExpirySweeper` - Expiry, overdue and pickup reminder sweep
//! - `BookingEngine` - All of the above wired together

mod audit;
pub mod allocation_manager;
pub mod approval_workflow;
pub mod booking_lifecycle;
pub mod conflict_detector;
pub mod engine;
pub mod notifications;
pub mod quota_guard;
pub mod sweep;

pub use allocation_manager::{
    AllocationManager, HandoverSummary, PickupRequest, ReturnRequest, UnitBinding, UnitReturn,
};
pub use approval_workflow::{ApprovalOutcome, ApprovalWorkflow};
pub use booking_lifecycle::{BookingDetails, BookingLifecycle, BookingRequest, LineRequest};
pub use conflict_detector::{ConflictCandidate, ConflictDescriptor, ConflictDetector, ConflictScan};
pub use engine::{BookingEngine, Collaborators};
pub use notifications::TracingNotificationSink;
pub use quota_guard::QuotaGuard;
pub use sweep::{ExpirySweeper, SweepReport};

/// Audit vocabulary
pub mod constants {
    /// Entity type of bookings in audit entries
    pub const ENTITY_BOOKING: &str = "booking";

    /// Entity type of approval tasks in audit entries
    pub const ENTITY_APPROVAL_TASK: &str = "approval_task";

    /// Entity type of booking lines in audit entries
    pub const ENTITY_BOOKING_LINE: &str = "booking_line";

    pub const ACTION_CREATE: &str = "booking.create";
    pub const ACTION_UPDATE: &str = "booking.update";
    pub const ACTION_CANCEL: &str = "booking.cancel";
    pub const ACTION_DELETE: &str = "booking.delete";
    pub const ACTION_EXPIRE: &str = "booking.expire";
    pub const ACTION_APPROVE: &str = "booking.approve";
    pub const ACTION_REJECT: &str = "booking.reject";
    pub const ACTION_DECIDE: &str = "approval.decide";
    pub const ACTION_OVERRIDE: &str = "approval.override";
    pub const ACTION_PICKUP: &str = "booking.pickup";
    pub const ACTION_RETURN: &str = "booking.return";
    pub const ACTION_PARTIAL_RETURN: &str = "booking.partial_return";
    pub const ACTION_REBIND: &str = "allocation.update";
}
