//! Domain models for the Sarpras booking engine
//!
//! This module contains all the core domain models used throughout the application.

pub mod allocation;
pub mod approval;
pub mod audit;
pub mod booking;
pub mod inventory;
pub mod notification;
pub mod quota;

pub use allocation::{AssignmentStatus, UnitAssignment};
pub use approval::{
    ApprovalAggregate, ApprovalScope, ApprovalStatus, ApprovalTask, Decision, ResourceApproval,
    ScopeStatus, TaskStatus,
};
pub use audit::{AuditEntry, AuditEntryBuilder};
pub use booking::{Booking, BookingLine, BookingStatus, LoanType, TimeWindow};
pub use inventory::{Equipment, EquipmentUnit, Tracking, UnitStatus, Venue, VenueStatus};
pub use notification::{Notification, NotificationEvent};
pub use quota::Quota;
