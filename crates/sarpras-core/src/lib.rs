//! Sarpras Core Library
//!
//! This crate provides the foundational types, traits, and error handling
//! for the Sarpras booking engine. It includes:
//!
//! - Domain models (Booking, BookingLine, UnitAssignment, approvals, quota)
//! - Storage and collaborator traits (inventory, approvers, authorization,
//!   audit and notification sinks)
//! - Unified error handling with HTTP response mapping
//! - Application configuration

pub mod config;
pub mod error;
pub mod models;
pub mod traits;

pub use config::{AppConfig, BookingConfig};
pub use error::AppError;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Identifier of whoever performs an operation (requester, approver, operator)
pub type ActorId = uuid::Uuid;
