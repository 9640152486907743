//! Sarpras Database Layer
//!
//! This crate provides storage for the Sarpras booking engine. It includes:
//!
//! - Connection pool management and migrations with sqlx
//! - The PostgreSQL booking store (row locking, unit exclusivity constraints)
//! - PostgreSQL-backed inventory ledger, approver directory, authorization
//!   oracle and audit sink
//! - An in-memory store and collaborators with the same contracts

pub mod memory;
pub mod pool;
pub mod repositories;

pub use memory::{
    MemoryApproverDirectory, MemoryAuthorizationOracle, MemoryInventory, MemoryStore,
    RecordingAuditSink, RecordingNotificationSink,
};
pub use pool::{create_pool, run_migrations};
pub use repositories::*;

// Re-export commonly used types
pub use sarpras_core::{AppError, AppResult};
pub use sqlx::{PgPool, Postgres, Transaction};
