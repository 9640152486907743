//! Unified error handling for Sarpras
//!
//! Every failure a booking operation can produce is one `AppError` variant.
//! Business failures (validation, conflicts, quota, state, authorization,
//! allocation) are recoverable and carry enough context to show the user an
//! actionable message. Infrastructure failures are surfaced as a generic
//! failure after the surrounding transaction has been rolled back.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    // ==================== Business Errors ====================
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Resource unavailable: {message}")]
    Conflict {
        /// Human-readable name of the blocking resource
        resource: String,
        /// Requester holding the colliding booking, when there is one
        claimant: Option<Uuid>,
        message: String,
    },

    #[error("Active booking quota exceeded: {active} of {max} bookings in use")]
    QuotaExceeded {
        requester_id: Uuid,
        active: i32,
        max: i32,
    },

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Unit {unit_id} is already assigned to an active booking")]
    AllocationExclusivity {
        unit_id: Uuid,
        /// Booking currently holding the unit, when known
        holder: Option<Uuid>,
    },

    // ==================== Lookup Errors ====================
    #[error("Booking not found: {0}")]
    BookingNotFound(Uuid),

    #[error("Booking line not found: {0}")]
    LineNotFound(Uuid),

    #[error("Approval task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Equipment unit not found: {0}")]
    UnitNotFound(Uuid),

    #[error("Unit assignment not found: {0}")]
    AssignmentNotFound(Uuid),

    #[error("Equipment not found: {0}")]
    EquipmentNotFound(Uuid),

    #[error("Venue not found: {0}")]
    VenueNotFound(Uuid),

    // ==================== Infrastructure Errors ====================
    #[error("Database error: {0}")]
    Database(String),

    #[error("Database pool error: {0}")]
    Pool(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Shortcut for a conflict on a named resource
    pub fn conflict(
        resource: impl Into<String>,
        claimant: Option<Uuid>,
        message: impl Into<String>,
    ) -> Self {
        AppError::Conflict {
            resource: resource.into(),
            claimant,
            message: message.into(),
        }
    }

    /// Whether this error is a business outcome the caller can act upon,
    /// as opposed to an infrastructure failure
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            AppError::Database(_)
                | AppError::Pool(_)
                | AppError::Transaction(_)
                | AppError::Config(_)
                | AppError::Serialization(_)
                | AppError::Internal(_)
        )
    }

    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation(_) => StatusCode::BAD_REQUEST,

            // 403 Forbidden
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,

            // 404 Not Found
            AppError::BookingNotFound(_)
            | AppError::LineNotFound(_)
            | AppError::TaskNotFound(_)
            | AppError::UnitNotFound(_)
            | AppError::AssignmentNotFound(_)
            | AppError::EquipmentNotFound(_)
            | AppError::VenueNotFound(_) => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::Conflict { .. }
            | AppError::InvalidStateTransition(_)
            | AppError::AllocationExclusivity { .. } => StatusCode::CONFLICT,

            // 429 Too Many Requests
            AppError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 500 Internal Server Error
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::Conflict { .. } => "conflict",
            AppError::QuotaExceeded { .. } => "quota_exceeded",
            AppError::InvalidStateTransition(_) => "invalid_state_transition",
            AppError::Forbidden(_) => "forbidden",
            AppError::AllocationExclusivity { .. } => "allocation_exclusivity",
            AppError::BookingNotFound(_) => "booking_not_found",
            AppError::LineNotFound(_) => "line_not_found",
            AppError::TaskNotFound(_) => "task_not_found",
            AppError::UnitNotFound(_) => "unit_not_found",
            AppError::AssignmentNotFound(_) => "assignment_not_found",
            AppError::EquipmentNotFound(_) => "equipment_not_found",
            AppError::VenueNotFound(_) => "venue_not_found",
            AppError::Database(_) => "database_error",
            AppError::Pool(_) => "pool_error",
            AppError::Transaction(_) => "transaction_error",
            AppError::Config(_) => "config_error",
            AppError::Serialization(_) => "serialization_error",
            AppError::Internal(_) => "internal_error",
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        AppError::status_code(self)
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        // Infrastructure details stay in the logs
        let message = if self.is_recoverable() {
            self.to_string()
        } else {
            "The request could not be completed".to_string()
        };
        let body = json!({
            "error": self.error_code(),
            "message": message,
            "status": status.as_u16(),
        });

        HttpResponse::build(status).json(body)
    }
}

// ==================== From implementations ====================

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}
