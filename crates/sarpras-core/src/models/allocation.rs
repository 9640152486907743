//! Unit assignment model
//!
//! Binds one serialized equipment unit to a booking line from pickup until
//! return. A unit may have at most one active assignment at any time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Assignment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    /// Unit is out with the requester
    #[default]
    Active,
    /// Unit has been handed back or unbound
    Released,
}

impl fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssignmentStatus::Active => write!(f, "active"),
            AssignmentStatus::Released => write!(f, "released"),
        }
    }
}

impl AssignmentStatus {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(AssignmentStatus::Active),
            "released" => Some(AssignmentStatus::Released),
            _ => None,
        }
    }
}

/// Serialized unit bound to a booking line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitAssignment {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub line_id: Uuid,
    pub unit_id: Uuid,
    pub status: AssignmentStatus,
    pub assigned_by: Uuid,
    pub assigned_at: DateTime<Utc>,
    pub released_by: Option<Uuid>,
    pub released_at: Option<DateTime<Utc>>,
}

impl UnitAssignment {
    /// Create a new active assignment
    pub fn new(booking_id: Uuid, line_id: Uuid, unit_id: Uuid, assigned_by: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            booking_id,
            line_id,
            unit_id,
            status: AssignmentStatus::Active,
            assigned_by,
            assigned_at: Utc::now(),
            released_by: None,
            released_at: None,
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.status == AssignmentStatus::Active
    }

    /// Give the unit back
    pub fn release(&mut self, actor: Uuid) {
        self.status = AssignmentStatus::Released;
        self.released_by = Some(actor);
        self.released_at = Some(Utc::now());
    }

    /// Bind a previously released unit to the same booking again
    pub fn reactivate(&mut self, line_id: Uuid, actor: Uuid) {
        self.line_id = line_id;
        self.status = AssignmentStatus::Active;
        self.assigned_by = actor;
        self.assigned_at = Utc::now();
        self.released_by = None;
        self.released_at = None;
    }
}
