//! Booking and booking line models
//!
//! A booking is one borrowing request for a venue, a free-text location,
//! equipment lines, or a combination of those, over one time window.
//! Its lifecycle:
//! 1. Submitted (Pending) with approval tasks seeded
//! 2. Approved once every required approval is granted, or Rejected
//! 3. PickedUp when an operator hands over the equipment
//! 4. Returned once every line is reconciled
//!
//! Pending and approved bookings may also be Cancelled by the requester or
//! Expired by the sweep once their window has passed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{error::AppError, ActorId, AppResult};

/// Booking status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// Waiting for approval
    #[default]
    Pending,
    /// Every required approval granted, waiting for pickup
    Approved,
    /// Vetoed by an approver
    Rejected,
    /// Equipment handed over to the requester
    PickedUp,
    /// Everything handed back
    Returned,
    /// Withdrawn before pickup
    Cancelled,
    /// Window passed before pickup
    Expired,
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookingStatus::Pending => write!(f, "pending"),
            BookingStatus::Approved => write!(f, "approved"),
            BookingStatus::Rejected => write!(f, "rejected"),
            BookingStatus::PickedUp => write!(f, "picked_up"),
            BookingStatus::Returned => write!(f, "returned"),
            BookingStatus::Cancelled => write!(f, "cancelled"),
            BookingStatus::Expired => write!(f, "expired"),
        }
    }
}

impl BookingStatus {
    /// All statuses that still hold a claim on resources and on the quota
    pub const ACTIVE: [BookingStatus; 3] = [
        BookingStatus::Pending,
        BookingStatus::Approved,
        BookingStatus::PickedUp,
    ];

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(BookingStatus::Pending),
            "approved" => Some(BookingStatus::Approved),
            "rejected" => Some(BookingStatus::Rejected),
            "picked_up" => Some(BookingStatus::PickedUp),
            "returned" => Some(BookingStatus::Returned),
            "cancelled" => Some(BookingStatus::Cancelled),
            "expired" => Some(BookingStatus::Expired),
            _ => None,
        }
    }

    /// Check if no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Rejected
                | BookingStatus::Returned
                | BookingStatus::Cancelled
                | BookingStatus::Expired
        )
    }

    /// Check if the booking still claims its resources
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Check if the booking may still be edited or cancelled
    pub fn is_editable(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Approved)
    }

    /// Whether `self -> next` is an edge of the lifecycle state machine
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        use BookingStatus::*;

        matches!(
            (self, next),
            (Pending, Approved)
                | (Pending, Rejected)
                | (Pending, Cancelled)
                | (Pending, Expired)
                | (Approved, PickedUp)
                | (Approved, Cancelled)
                | (Approved, Expired)
                | (PickedUp, Returned)
        )
    }
}

/// What kind of loan the requester asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoanType {
    /// A venue or a custom location, optionally with equipment
    #[default]
    Venue,
    /// Equipment only
    Equipment,
    /// Both a place and at least one equipment line
    Combined,
}

impl fmt::Display for LoanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoanType::Venue => write!(f, "venue"),
            LoanType::Equipment => write!(f, "equipment"),
            LoanType::Combined => write!(f, "combined"),
        }
    }
}

impl LoanType {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "venue" => Some(LoanType::Venue),
            "equipment" => Some(LoanType::Equipment),
            "combined" => Some(LoanType::Combined),
            _ => None,
        }
    }

    /// Whether a venue or custom location is mandatory
    pub fn requires_place(&self) -> bool {
        matches!(self, LoanType::Venue | LoanType::Combined)
    }

    /// Whether at least one equipment line is mandatory
    pub fn requires_equipment(&self) -> bool {
        matches!(self, LoanType::Equipment | LoanType::Combined)
    }
}

/// Half-open time interval `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Create a window, rejecting an end before its start
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> AppResult<Self> {
        if end < start {
            return Err(AppError::Validation(format!(
                "end ({}) is before start ({})",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    /// Two windows overlap iff `start_a < end_b && start_b < end_a`.
    /// Touching boundaries do not overlap.
    #[inline]
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Whether the window is over at `now`
    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        self.end < now
    }
}

/// Booking entity, the aggregate root of one borrowing request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub loan_type: LoanType,
    pub venue_id: Option<Uuid>,
    pub custom_location: Option<String>,
    pub participant_count: Option<i32>,
    /// Sponsoring organisation or unit
    pub group_id: Option<Uuid>,
    pub title: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub status: BookingStatus,
    /// Shared by pending bookings competing for the same resources
    pub conflict_group: Option<Uuid>,
    pub document_ref: Option<String>,
    pub rejection_reason: Option<String>,
    pub cancellation_reason: Option<String>,
    pub cancelled_by: Option<Uuid>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub pickup_validated_by: Option<Uuid>,
    pub pickup_validated_at: Option<DateTime<Utc>>,
    pub pickup_photo: Option<String>,
    pub return_validated_by: Option<Uuid>,
    pub return_validated_at: Option<DateTime<Utc>>,
    pub return_photo: Option<String>,
    pub pickup_reminder_sent_at: Option<DateTime<Utc>>,
    pub overdue_notified_at: Option<DateTime<Utc>>,
    /// Set once the quota slot of this booking has been given back
    pub quota_released: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Create a new pending booking
    pub fn new(requester_id: Uuid, loan_type: LoanType, title: String, window: TimeWindow) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            requester_id,
            loan_type,
            venue_id: None,
            custom_location: None,
            participant_count: None,
            group_id: None,
            title,
            start_at: window.start,
            end_at: window.end,
            status: BookingStatus::Pending,
            conflict_group: None,
            document_ref: None,
            rejection_reason: None,
            cancellation_reason: None,
            cancelled_by: None,
            cancelled_at: None,
            pickup_validated_by: None,
            pickup_validated_at: None,
            pickup_photo: None,
            return_validated_by: None,
            return_validated_at: None,
            return_photo: None,
            pickup_reminder_sent_at: None,
            overdue_notified_at: None,
            quota_released: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Booked time window
    pub fn window(&self) -> TimeWindow {
        TimeWindow {
            start: self.start_at,
            end: self.end_at,
        }
    }

    /// Check if the given actor submitted this booking
    pub fn is_owned_by(&self, actor_id: ActorId) -> bool {
        self.requester_id == actor_id
    }

    /// Move to `next`, enforcing the lifecycle state machine
    pub fn transition_to(&mut self, next: BookingStatus) -> AppResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::InvalidStateTransition(format!(
                "booking {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Fail unless the booking is in one of `allowed`
    pub fn ensure_status(&self, allowed: &[BookingStatus], operation: &str) -> AppResult<()> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(AppError::InvalidStateTransition(format!(
                "cannot {} booking {} while it is {}",
                operation, self.id, self.status
            )))
        }
    }
}

/// One equipment line within a booking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingLine {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub equipment_id: Uuid,
    pub quantity_requested: i32,
    /// Unset until an approver decides
    pub quantity_approved: Option<i32>,
    pub notes: Option<String>,
    /// Pooled lines only: handed over without unit binding
    pub picked_up_at: Option<DateTime<Utc>>,
    /// Pooled lines only: handed back
    pub returned_at: Option<DateTime<Utc>>,
}

impl BookingLine {
    /// Create a new undecided line
    pub fn new(booking_id: Uuid, equipment_id: Uuid, quantity: i32, notes: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            booking_id,
            equipment_id,
            quantity_requested: quantity,
            quantity_approved: None,
            notes,
            picked_up_at: None,
            returned_at: None,
        }
    }

    /// Quantity this line claims: the approved quantity once decided
    #[inline]
    pub fn effective_quantity(&self) -> i32 {
        self.quantity_approved.unwrap_or(self.quantity_requested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_window_overlap() {
        let a = TimeWindow::new(at(10), at(12)).unwrap();
        let b = TimeWindow::new(at(11), at(13)).unwrap();
        let c = TimeWindow::new(at(12), at(14)).unwrap();

        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        // Touching boundaries
        assert!(!a.overlaps(&c));
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn test_window_rejects_inverted() {
        assert!(matches!(
            TimeWindow::new(at(12), at(10)),
            Err(AppError::Validation(_))
        ));
        assert!(TimeWindow::new(at(10), at(10)).is_ok());
    }

    #[test]
    fn test_status_terminal() {
        assert!(BookingStatus::Rejected.is_terminal());
        assert!(BookingStatus::Returned.is_terminal());
        assert!(BookingStatus::Cancelled.is_terminal());
        assert!(BookingStatus::Expired.is_terminal());
        assert!(!BookingStatus::PickedUp.is_terminal());
        assert_eq!(BookingStatus::from_str("picked_up"), Some(BookingStatus::PickedUp));
    }

    #[test]
    fn test_transitions() {
        let window = TimeWindow::new(at(8), at(9)).unwrap();
        let mut booking = Booking::new(Uuid::new_v4(), LoanType::Venue, "Rapat".into(), window);

        assert!(booking.transition_to(BookingStatus::PickedUp).is_err());
        booking.transition_to(BookingStatus::Approved).unwrap();
        booking.transition_to(BookingStatus::PickedUp).unwrap();
        assert!(booking.transition_to(BookingStatus::Cancelled).is_err());
        booking.transition_to(BookingStatus::Returned).unwrap();
        assert!(matches!(
            booking.transition_to(BookingStatus::Pending),
            Err(AppError::InvalidStateTransition(_))
        ));
    }

    #[test]
    fn test_line_effective_quantity() {
        let mut line = BookingLine::new(Uuid::new_v4(), Uuid::new_v4(), 5, None);
        assert_eq!(line.effective_quantity(), 5);
        line.quantity_approved = Some(3);
        assert_eq!(line.effective_quantity(), 3);
    }

    const ALL: [BookingStatus; 7] = [
        BookingStatus::Pending,
        BookingStatus::Approved,
        BookingStatus::Rejected,
        BookingStatus::PickedUp,
        BookingStatus::Returned,
        BookingStatus::Cancelled,
        BookingStatus::Expired,
    ];

    proptest! {
        #[test]
        fn prop_overlap_is_symmetric(a in 0i64..1000, la in 0i64..300, b in 0i64..1000, lb in 0i64..300) {
            let base = at(0);
            let x = TimeWindow::new(base + Duration::minutes(a), base + Duration::minutes(a + la)).unwrap();
            let y = TimeWindow::new(base + Duration::minutes(b), base + Duration::minutes(b + lb)).unwrap();
            prop_assert_eq!(x.overlaps(&y), y.overlaps(&x));
        }

        #[test]
        fn prop_terminal_states_have_no_exit(from in 0usize..7, to in 0usize..7) {
            let (from, to) = (ALL[from], ALL[to]);
            if from.is_terminal() {
                prop_assert!(!from.can_transition_to(to));
            }
        }
    }
}
