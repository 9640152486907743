//! Quota guard
//!
//! Caps the number of simultaneously active (pending, approved or picked up)
//! bookings per requester. The count is taken when a booking is created and
//! given back exactly once, when the booking reaches a terminal state.

use sarpras_core::{
    models::{Booking, Quota},
    traits::BookingTx,
    AppError, AppResult, BookingConfig,
};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Quota guard
#[derive(Debug, Clone, Copy)]
pub struct QuotaGuard {
    default_max: i32,
}

impl QuotaGuard {
    /// Create a new quota guard capping every requester at `max_active_bookings`
    pub fn new(config: &BookingConfig) -> Self {
        Self {
            default_max: config.max_active_bookings,
        }
    }

    /// Stored counter of the requester, capped at the configured maximum
    async fn load<T: BookingTx>(&self, tx: &mut T, requester_id: Uuid) -> AppResult<Quota> {
        let mut quota = tx
            .find_quota(requester_id)
            .await?
            .unwrap_or_else(|| Quota::new(requester_id, self.default_max));
        quota.max_active = self.default_max;
        Ok(quota)
    }

    /// Check if the requester may open one more booking
    pub async fn has_capacity<T: BookingTx>(&self, tx: &mut T, requester_id: Uuid) -> AppResult<bool> {
        Ok(self.load(tx, requester_id).await?.has_capacity())
    }

    /// Take one slot, failing with `QuotaExceeded` at the cap
    #[instrument(skip(self, tx))]
    pub async fn reserve<T: BookingTx>(&self, tx: &mut T, requester_id: Uuid) -> AppResult<Quota> {
        let mut quota = self.load(tx, requester_id).await?;

        if !quota.has_capacity() {
            warn!(
                "Requester {} at quota: {}/{}",
                requester_id, quota.active_count, quota.max_active
            );
            return Err(AppError::QuotaExceeded {
                requester_id,
                active: quota.active_count,
                max: quota.max_active,
            });
        }

        quota.increment();
        tx.save_quota(&quota).await?;
        debug!(
            "Requester {} now holds {}/{}",
            requester_id, quota.active_count, quota.max_active
        );
        Ok(quota)
    }

    /// Give back the slot held by `booking`.
    ///
    /// Marks the booking as released; the caller persists it in the same
    /// transaction. Returns `false` when the slot was already given back.
    #[instrument(skip(self, tx, booking), fields(booking_id = %booking.id))]
    pub async fn release<T: BookingTx>(&self, tx: &mut T, booking: &mut Booking) -> AppResult<bool> {
        if booking.quota_released {
            debug!("Quota of booking {} already released", booking.id);
            return Ok(false);
        }

        let mut quota = self.load(tx, booking.requester_id).await?;
        quota.decrement();
        tx.save_quota(&quota).await?;
        booking.quota_released = true;

        debug!(
            "Requester {} now holds {}/{}",
            booking.requester_id, quota.active_count, quota.max_active
        );
        Ok(true)
    }
}
