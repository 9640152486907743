//! Repository implementations
//!
//! This module contains the PostgreSQL implementations of the storage and
//! collaborator traits defined in sarpras-core, using sqlx.

pub mod approver_repo;
pub mod audit_repo;
pub mod authorization_repo;
pub mod booking_store;
pub mod inventory_repo;

pub use approver_repo::PgApproverDirectory;
pub use audit_repo::PgAuditSink;
pub use authorization_repo::PgAuthorizationOracle;
pub use booking_store::{PgBookingStore, PgBookingTx};
pub use inventory_repo::PgInventoryLedger;
