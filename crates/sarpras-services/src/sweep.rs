//! Expiry sweep
//!
//! One pass over the bookings whose window has moved on:
//! - Pending and approved bookings that ended are expired and free their quota
//! - Picked up bookings that ended are reported overdue, once
//! - Approved bookings starting soon get a pickup reminder, once
//!
//! Candidates are read first, then each one is handled in its own transaction
//! and re-checked under lock. Running the sweep twice, or from two processes
//! at once, does not act on a booking twice.

use chrono::{DateTime, Duration, Utc};
use sarpras_core::{
    models::{Booking, BookingStatus, Notification, NotificationEvent},
    traits::{AuditSink, BookingStore, BookingTx, NotificationSink},
    AppResult, BookingConfig,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::audit::AuditTrail;
use crate::constants::{ACTION_EXPIRE, ENTITY_BOOKING};
use crate::quota_guard::QuotaGuard;

/// Bookings touched by one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired: Vec<Uuid>,
    pub overdue: Vec<Uuid>,
    pub reminded: Vec<Uuid>,
    /// Bookings skipped after an error
    pub failed: Vec<Uuid>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.expired.is_empty()
            && self.overdue.is_empty()
            && self.reminded.is_empty()
            && self.failed.is_empty()
    }
}

enum Swept {
    Expired,
    Overdue,
}

/// Expiry sweeper
pub struct ExpirySweeper<S: BookingStore> {
    store: Arc<S>,
    audit: AuditTrail,
    notifier: Arc<dyn NotificationSink>,
    quota: QuotaGuard,
    reminder_lead: Duration,
    batch_size: i64,
}

impl<S: BookingStore> ExpirySweeper<S> {
    /// Create a new sweeper
    pub fn new(
        store: Arc<S>,
        audit: Arc<dyn AuditSink>,
        notifier: Arc<dyn NotificationSink>,
        config: &BookingConfig,
    ) -> Self {
        Self {
            store,
            audit: AuditTrail::new(audit),
            notifier,
            quota: QuotaGuard::new(config),
            reminder_lead: Duration::minutes(config.pickup_reminder_minutes),
            batch_size: config.sweep_batch_size,
        }
    }

    /// Run one sweep as of `now`
    #[instrument(skip(self))]
    pub async fn sweep(&self, now: DateTime<Utc>) -> AppResult<SweepReport> {
        let until = now + self.reminder_lead;
        let (ended, due) = {
            let mut tx = self.store.begin().await?;
            let ended = tx.find_ended_bookings(now, self.batch_size).await?;
            let due = tx.find_approved_starting(now, until, self.batch_size).await?;
            (ended, due)
        };
        debug!("Sweep candidates: {} ended, {} starting soon", ended.len(), due.len());

        let mut report = SweepReport::default();

        for booking in ended {
            match self.settle_ended(booking.id, now).await {
                Ok(Some(Swept::Expired)) => report.expired.push(booking.id),
                Ok(Some(Swept::Overdue)) => report.overdue.push(booking.id),
                Ok(None) => {}
                Err(e) => {
                    error!("Sweep failed for booking {}: {}", booking.id, e);
                    report.failed.push(booking.id);
                }
            }
        }

        for booking in due {
            match self.remind(booking.id, now, until).await {
                Ok(true) => report.reminded.push(booking.id),
                Ok(false) => {}
                Err(e) => {
                    error!("Pickup reminder failed for booking {}: {}", booking.id, e);
                    report.failed.push(booking.id);
                }
            }
        }

        info!(
            "Sweep done: {} expired, {} overdue, {} reminded, {} failed",
            report.expired.len(),
            report.overdue.len(),
            report.reminded.len(),
            report.failed.len()
        );
        Ok(report)
    }

    async fn settle_ended(&self, booking_id: Uuid, now: DateTime<Utc>) -> AppResult<Option<Swept>> {
        let mut tx = self.store.begin().await?;
        let Some(mut booking) = tx.find_booking(booking_id).await? else {
            return Ok(None);
        };
        if !booking.window().has_ended(now) {
            return Ok(None);
        }

        match booking.status {
            BookingStatus::Pending | BookingStatus::Approved => {
                let before = booking.clone();
                booking.transition_to(BookingStatus::Expired)?;
                self.quota.release(&mut tx, &mut booking).await?;
                tx.update_booking(&booking).await?;
                tx.commit().await?;

                info!("Booking {} expired from {}", booking_id, before.status);
                self.audit
                    .record(ACTION_EXPIRE, ENTITY_BOOKING, booking_id, Some(&before), Some(&booking), None)
                    .await;
                Ok(Some(Swept::Expired))
            }
            BookingStatus::PickedUp if booking.overdue_notified_at.is_none() => {
                booking.overdue_notified_at = Some(now);
                tx.update_booking(&booking).await?;
                tx.commit().await?;

                info!("Booking {} is overdue", booking_id);
                self.notify(NotificationEvent::Overdue, &booking).await;
                Ok(Some(Swept::Overdue))
            }
            _ => Ok(None),
        }
    }

    async fn remind(&self, booking_id: Uuid, now: DateTime<Utc>, until: DateTime<Utc>) -> AppResult<bool> {
        let mut tx = self.store.begin().await?;
        let Some(mut booking) = tx.find_booking(booking_id).await? else {
            return Ok(false);
        };
        if booking.status != BookingStatus::Approved
            || booking.pickup_reminder_sent_at.is_some()
            || booking.start_at < now
            || booking.start_at >= until
        {
            return Ok(false);
        }

        booking.pickup_reminder_sent_at = Some(now);
        tx.update_booking(&booking).await?;
        tx.commit().await?;

        debug!("Pickup reminder for booking {}", booking_id);
        self.notify(NotificationEvent::PickupDue, &booking).await;
        Ok(true)
    }

    async fn notify(&self, event: NotificationEvent, booking: &Booking) {
        self.notifier
            .dispatch(Notification::new(
                event,
                booking.id,
                booking.requester_id,
                booking.title.clone(),
            ))
            .await;
    }
}
