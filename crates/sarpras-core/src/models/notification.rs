//! Notification model

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Booking events users are told about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    Submitted,
    Approved,
    Rejected,
    PickupDue,
    Overdue,
}

impl fmt::Display for NotificationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationEvent::Submitted => write!(f, "submitted"),
            NotificationEvent::Approved => write!(f, "approved"),
            NotificationEvent::Rejected => write!(f, "rejected"),
            NotificationEvent::PickupDue => write!(f, "pickup_due"),
            NotificationEvent::Overdue => write!(f, "overdue"),
        }
    }
}

/// Notification handed to the notification sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub event: NotificationEvent,
    pub booking_id: Uuid,
    pub recipient_id: Uuid,
    pub title: String,
}

impl Notification {
    pub fn new(
        event: NotificationEvent,
        booking_id: Uuid,
        recipient_id: Uuid,
        title: impl Into<String>,
    ) -> Self {
        Self {
            event,
            booking_id,
            recipient_id,
            title: title.into(),
        }
    }
}
