//! Conflict detector
//!
//! Decides whether a booking candidate is schedulable against the other
//! active bookings:
//! - A venue is exclusive over overlapping windows, and must be available
//! - A custom location is exclusive among bookings naming the same string
//! - Equipment is counted: claims of overlapping bookings plus the candidate's
//!   quantity must fit into the available quantity
//!
//! Serialized equipment is counted like pooled stock here. Which physical
//! unit goes out is only settled at pickup.

use sarpras_core::{
    models::{Booking, BookingLine, BookingStatus, TimeWindow, VenueStatus},
    traits::{BookingTx, EquipmentClaim, InventoryLedger},
    AppError, AppResult,
};
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// What a booking wants, for how long
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictCandidate {
    pub window: TimeWindow,
    pub venue_id: Option<Uuid>,
    pub custom_location: Option<String>,
    /// Equipment id and quantity per line
    pub equipment: Vec<(Uuid, i32)>,
    /// Booking being edited, left out of the overlap scans
    pub exclude: Option<Uuid>,
}

impl ConflictCandidate {
    /// Candidate describing an existing booking, excluding itself
    pub fn from_booking(booking: &Booking, lines: &[BookingLine]) -> Self {
        Self {
            window: booking.window(),
            venue_id: booking.venue_id,
            custom_location: booking.custom_location.clone(),
            equipment: lines
                .iter()
                .map(|l| (l.equipment_id, l.effective_quantity()))
                .collect(),
            exclude: Some(booking.id),
        }
    }
}

/// The first resource found blocking a candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictDescriptor {
    /// Display name of the blocking resource
    pub resource: String,
    /// Requester of the colliding booking
    pub claimant: Option<Uuid>,
    pub blocking_booking: Option<Uuid>,
    pub message: String,
}

impl From<ConflictDescriptor> for AppError {
    fn from(conflict: ConflictDescriptor) -> Self {
        AppError::Conflict {
            resource: conflict.resource,
            claimant: conflict.claimant,
            message: conflict.message,
        }
    }
}

/// Result of a full scan
#[derive(Debug, Clone, Default)]
pub struct ConflictScan {
    pub conflict: Option<ConflictDescriptor>,
    /// Pending bookings sharing equipment with the candidate that still fit
    pub rivals: Vec<EquipmentClaim>,
}

/// Conflict detector
///
/// Read-only: it never writes through the transaction it is given.
#[derive(Clone)]
pub struct ConflictDetector {
    inventory: Arc<dyn InventoryLedger>,
}

impl ConflictDetector {
    /// Create a new conflict detector
    pub fn new(inventory: Arc<dyn InventoryLedger>) -> Self {
        Self { inventory }
    }

    /// Check a candidate, returning the first blocking resource if any
    pub async fn check_conflicts<T: BookingTx>(
        &self,
        tx: &mut T,
        candidate: &ConflictCandidate,
    ) -> AppResult<Option<ConflictDescriptor>> {
        Ok(self.scan(tx, candidate).await?.conflict)
    }

    /// Check a candidate and collect the pending rivals on its equipment
    #[instrument(skip(self, tx, candidate), fields(exclude = ?candidate.exclude))]
    pub async fn scan<T: BookingTx>(
        &self,
        tx: &mut T,
        candidate: &ConflictCandidate,
    ) -> AppResult<ConflictScan> {
        if let Some(venue_id) = candidate.venue_id {
            if let Some(conflict) = self.check_venue(tx, venue_id, candidate).await? {
                return Ok(ConflictScan {
                    conflict: Some(conflict),
                    rivals: Vec::new(),
                });
            }
        }

        if let Some(location) = candidate.custom_location.as_deref() {
            let overlaps = tx
                .find_location_overlaps(location, candidate.window, candidate.exclude)
                .await?;
            if let Some(other) = overlaps.first() {
                warn!("Location {} taken by booking {}", location, other.id);
                return Ok(ConflictScan {
                    conflict: Some(ConflictDescriptor {
                        resource: location.to_string(),
                        claimant: Some(other.requester_id),
                        blocking_booking: Some(other.id),
                        message: format!(
                            "Location {} is already booked by requester {} from {} to {}",
                            location, other.requester_id, other.start_at, other.end_at
                        ),
                    }),
                    rivals: Vec::new(),
                });
            }
        }

        let mut rivals = Vec::new();
        for &(equipment_id, quantity) in &candidate.equipment {
            let equipment = self
                .inventory
                .equipment(equipment_id)
                .await?
                .ok_or(AppError::EquipmentNotFound(equipment_id))?;
            let available = self.inventory.available_quantity(equipment_id).await?;
            let claims = tx
                .find_equipment_claims(equipment_id, candidate.window, candidate.exclude)
                .await?;
            let claimed: i64 = claims.iter().map(|c| i64::from(c.quantity)).sum();

            debug!(
                "Equipment {}: {} claimed, {} requested, {} available",
                equipment.name, claimed, quantity, available
            );

            if claimed + i64::from(quantity) > available {
                let holder = claims.iter().max_by_key(|c| c.quantity);
                let message = match holder {
                    Some(h) => format!(
                        "Equipment {} has only {} of {} free in this window, {} requested; held by requester {}",
                        equipment.name,
                        (available - claimed).max(0),
                        available,
                        quantity,
                        h.requester_id
                    ),
                    None => format!(
                        "Equipment {} has only {} available, {} requested",
                        equipment.name, available, quantity
                    ),
                };
                warn!("{}", message);
                return Ok(ConflictScan {
                    conflict: Some(ConflictDescriptor {
                        resource: equipment.name,
                        claimant: holder.map(|h| h.requester_id),
                        blocking_booking: holder.map(|h| h.booking_id),
                        message,
                    }),
                    rivals: Vec::new(),
                });
            }

            rivals.extend(
                claims
                    .into_iter()
                    .filter(|c| c.status == BookingStatus::Pending),
            );
        }

        rivals.sort_by_key(|c| c.booking_id);
        rivals.dedup_by_key(|c| c.booking_id);

        Ok(ConflictScan {
            conflict: None,
            rivals,
        })
    }

    async fn check_venue<T: BookingTx>(
        &self,
        tx: &mut T,
        venue_id: Uuid,
        candidate: &ConflictCandidate,
    ) -> AppResult<Option<ConflictDescriptor>> {
        let venue = self
            .inventory
            .venue(venue_id)
            .await?
            .ok_or(AppError::VenueNotFound(venue_id))?;

        if venue.status == VenueStatus::Unavailable {
            warn!("Venue {} is unavailable", venue.name);
            return Ok(Some(ConflictDescriptor {
                message: format!("Venue {} is not available for booking", venue.name),
                resource: venue.name,
                claimant: None,
                blocking_booking: None,
            }));
        }

        let overlaps = tx
            .find_venue_overlaps(venue_id, candidate.window, candidate.exclude)
            .await?;

        Ok(overlaps.first().map(|other| {
            warn!("Venue {} taken by booking {}", venue.name, other.id);
            ConflictDescriptor {
                message: format!(
                    "Venue {} is already booked by requester {} from {} to {}",
                    venue.name, other.requester_id, other.start_at, other.end_at
                ),
                resource: venue.name.clone(),
                claimant: Some(other.requester_id),
                blocking_booking: Some(other.id),
            }
        }))
    }
}
