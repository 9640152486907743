//! Allocation and check-in/check-out manager
//!
//! Hands approved bookings over and takes them back. Serialized lines bind
//! named units at pickup; this is where a unit's exclusivity is enforced.
//! Pooled lines are only stamped as picked up and returned.

use chrono::Utc;
use sarpras_core::{
    models::{
        ApprovalStatus, Booking, BookingLine, BookingStatus, Equipment, Tracking,
        UnitAssignment, UnitStatus,
    },
    traits::{AuditSink, AuthorizationOracle, BookingStore, BookingTx, Capability, InventoryLedger},
    ActorId, AppError, AppResult, BookingConfig,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::audit::AuditTrail;
use crate::constants::{
    ACTION_PARTIAL_RETURN, ACTION_PICKUP, ACTION_REBIND, ACTION_RETURN, ENTITY_BOOKING,
    ENTITY_BOOKING_LINE,
};
use crate::quota_guard::QuotaGuard;

/// One unit handed over for a serialized line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitBinding {
    pub line_id: Uuid,
    pub unit_id: Uuid,
}

/// Pickup validation input
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PickupRequest {
    /// Exactly the effective quantity of units per serialized line
    pub units: Vec<UnitBinding>,
    /// Every pooled line of the booking
    pub pooled_line_ids: Vec<Uuid>,
    pub photo: Option<String>,
}

/// One unit handed back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitReturn {
    pub unit_id: Uuid,
    /// Condition reported at return; written to the unit unless available
    pub condition: Option<UnitStatus>,
}

/// Return validation input
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReturnRequest {
    pub units: Vec<UnitReturn>,
    pub pooled_line_ids: Vec<Uuid>,
    pub photo: Option<String>,
}

/// Booking state after a handover
#[derive(Debug, Clone, Serialize)]
pub struct HandoverSummary {
    pub booking: Booking,
    pub lines: Vec<BookingLine>,
    /// Every assignment of the booking, released ones included
    pub assignments: Vec<UnitAssignment>,
}

impl HandoverSummary {
    /// Units still out with the requester
    pub fn active_units(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.assignments
            .iter()
            .filter(|a| a.is_active())
            .map(|a| a.unit_id)
    }
}

/// Allocation manager
pub struct AllocationManager<S: BookingStore> {
    store: Arc<S>,
    inventory: Arc<dyn InventoryLedger>,
    authorization: Arc<dyn AuthorizationOracle>,
    audit: AuditTrail,
    quota: QuotaGuard,
}

impl<S: BookingStore> AllocationManager<S> {
    /// Create a new allocation manager
    pub fn new(
        store: Arc<S>,
        inventory: Arc<dyn InventoryLedger>,
        authorization: Arc<dyn AuthorizationOracle>,
        audit: Arc<dyn AuditSink>,
        config: &BookingConfig,
    ) -> Self {
        Self {
            store,
            inventory,
            authorization,
            audit: AuditTrail::new(audit),
            quota: QuotaGuard::new(config),
        }
    }

    /// Hand an approved booking over to its requester
    #[instrument(skip(self, request), fields(units = request.units.len()))]
    pub async fn validate_pickup(
        &self,
        actor_id: ActorId,
        booking_id: Uuid,
        request: PickupRequest,
    ) -> AppResult<HandoverSummary> {
        self.authorization
            .require(actor_id, Capability::ValidatePickup)
            .await?;

        let mut tx = self.store.begin().await?;

        let mut booking = tx
            .find_booking(booking_id)
            .await?
            .ok_or(AppError::BookingNotFound(booking_id))?;
        booking.ensure_status(&[BookingStatus::Approved], "hand over")?;
        Self::ensure_approved(&mut tx, &booking).await?;

        let before = booking.clone();
        let mut lines = tx.find_lines(booking_id).await?;

        ensure_distinct(request.units.iter().map(|b| b.unit_id))?;
        if let Some(stray) = request
            .units
            .iter()
            .find(|b| !lines.iter().any(|l| l.id == b.line_id))
        {
            return Err(AppError::LineNotFound(stray.line_id));
        }
        if let Some(stray) = request
            .pooled_line_ids
            .iter()
            .find(|id| !lines.iter().any(|l| l.id == **id))
        {
            return Err(AppError::LineNotFound(*stray));
        }

        let mut assignments = tx.find_assignments(booking_id).await?;
        let now = Utc::now();

        for line in lines.iter_mut() {
            let equipment = self.equipment(line.equipment_id).await?;
            match equipment.tracking {
                Tracking::Serialized => {
                    if request.pooled_line_ids.contains(&line.id) {
                        return Err(AppError::Validation(format!(
                            "{} is tracked by unit, name the units of line {}",
                            equipment.name, line.id
                        )));
                    }
                    let units: Vec<Uuid> = request
                        .units
                        .iter()
                        .filter(|b| b.line_id == line.id)
                        .map(|b| b.unit_id)
                        .collect();
                    if units.len() != line.effective_quantity() as usize {
                        return Err(AppError::Validation(format!(
                            "{} needs {} units, got {}",
                            equipment.name,
                            line.effective_quantity(),
                            units.len()
                        )));
                    }
                    for unit_id in units {
                        Self::bind(&mut tx, &mut assignments, line, unit_id, actor_id).await?;
                    }
                }
                Tracking::Pooled => {
                    if !request.pooled_line_ids.contains(&line.id) {
                        return Err(AppError::Validation(format!(
                            "pooled line {} ({}) was not handed over",
                            line.id, equipment.name
                        )));
                    }
                    line.picked_up_at = Some(now);
                    tx.update_line(line).await?;
                }
            }
        }

        booking.transition_to(BookingStatus::PickedUp)?;
        booking.pickup_validated_by = Some(actor_id);
        booking.pickup_validated_at = Some(now);
        booking.pickup_photo = request.photo;
        tx.update_booking(&booking).await?;

        tx.commit().await?;

        info!(
            "Booking {} picked up, {} units bound by {}",
            booking_id,
            assignments.iter().filter(|a| a.is_active()).count(),
            actor_id
        );

        self.audit
            .record(ACTION_PICKUP, ENTITY_BOOKING, booking_id, Some(&before), Some(&booking), Some(actor_id))
            .await;

        Ok(HandoverSummary {
            booking,
            lines,
            assignments,
        })
    }

    /// Take units and pooled lines back.
    ///
    /// The booking is returned, and its quota slot given back, once no unit
    /// is still bound and every pooled line has come back.
    #[instrument(skip(self, request), fields(units = request.units.len()))]
    pub async fn validate_return(
        &self,
        actor_id: ActorId,
        booking_id: Uuid,
        request: ReturnRequest,
    ) -> AppResult<HandoverSummary> {
        self.authorization
            .require(actor_id, Capability::ValidateReturn)
            .await?;

        let mut tx = self.store.begin().await?;

        let mut booking = tx
            .find_booking(booking_id)
            .await?
            .ok_or(AppError::BookingNotFound(booking_id))?;
        booking.ensure_status(&[BookingStatus::PickedUp], "take back")?;

        let before = booking.clone();
        let mut lines = tx.find_lines(booking_id).await?;
        let mut assignments = tx.find_assignments(booking_id).await?;
        let now = Utc::now();

        ensure_distinct(request.units.iter().map(|r| r.unit_id))?;

        for returned in &request.units {
            let assignment = assignments
                .iter_mut()
                .find(|a| a.unit_id == returned.unit_id && a.is_active())
                .ok_or_else(|| {
                    AppError::Validation(format!(
                        "unit {} is not out with booking {}",
                        returned.unit_id, booking_id
                    ))
                })?;
            assignment.release(actor_id);
            tx.update_assignment(assignment).await?;

            if let Some(condition) = returned.condition.filter(|c| *c != UnitStatus::Available) {
                warn!("Unit {} came back {}", returned.unit_id, condition);
                tx.update_unit_status(returned.unit_id, condition).await?;
            }
        }

        for line_id in &request.pooled_line_ids {
            let line = lines
                .iter_mut()
                .find(|l| l.id == *line_id)
                .ok_or(AppError::LineNotFound(*line_id))?;
            if line.picked_up_at.is_none() {
                return Err(AppError::Validation(format!(
                    "line {} was not handed over as pooled stock",
                    line_id
                )));
            }
            if line.returned_at.is_none() {
                line.returned_at = Some(now);
                tx.update_line(line).await?;
            }
        }

        let units_out = assignments.iter().filter(|a| a.is_active()).count();
        let lines_out = lines
            .iter()
            .filter(|l| l.picked_up_at.is_some() && l.returned_at.is_none())
            .count();
        let complete = units_out == 0 && lines_out == 0;

        if request.photo.is_some() {
            booking.return_photo = request.photo;
        }
        if complete {
            booking.transition_to(BookingStatus::Returned)?;
            booking.return_validated_by = Some(actor_id);
            booking.return_validated_at = Some(now);
            self.quota.release(&mut tx, &mut booking).await?;
        } else {
            booking.updated_at = now;
        }
        tx.update_booking(&booking).await?;

        tx.commit().await?;

        let action = if complete {
            info!("Booking {} returned", booking_id);
            ACTION_RETURN
        } else {
            debug!(
                "Booking {} partially returned: {} units and {} pooled lines still out",
                booking_id, units_out, lines_out
            );
            ACTION_PARTIAL_RETURN
        };
        self.audit
            .record(action, ENTITY_BOOKING, booking_id, Some(&before), Some(&booking), Some(actor_id))
            .await;

        Ok(HandoverSummary {
            booking,
            lines,
            assignments,
        })
    }

    /// Replace the units bound to a serialized line of an ongoing booking
    #[instrument(skip(self, unit_ids), fields(units = unit_ids.len()))]
    pub async fn update_unit_assignments(
        &self,
        actor_id: ActorId,
        line_id: Uuid,
        unit_ids: Vec<Uuid>,
    ) -> AppResult<Vec<UnitAssignment>> {
        self.authorization
            .require(actor_id, Capability::ManageAllocations)
            .await?;

        let mut tx = self.store.begin().await?;

        let line = tx
            .find_line(line_id)
            .await?
            .ok_or(AppError::LineNotFound(line_id))?;
        let booking = tx
            .find_booking(line.booking_id)
            .await?
            .ok_or(AppError::BookingNotFound(line.booking_id))?;
        booking.ensure_status(&[BookingStatus::PickedUp], "re-bind units of")?;
        Self::ensure_approved(&mut tx, &booking).await?;

        let equipment = self.equipment(line.equipment_id).await?;
        if equipment.tracking != Tracking::Serialized {
            return Err(AppError::Validation(format!(
                "{} is pooled stock without units",
                equipment.name
            )));
        }

        ensure_distinct(unit_ids.iter().copied())?;
        if unit_ids.len() > line.effective_quantity() as usize {
            return Err(AppError::Validation(format!(
                "line {} takes at most {} units",
                line_id,
                line.effective_quantity()
            )));
        }

        let mut assignments = tx.find_assignments(booking.id).await?;
        let before: Vec<UnitAssignment> = line_units(&assignments, line_id);

        for assignment in assignments
            .iter_mut()
            .filter(|a| a.line_id == line_id && a.is_active() && !unit_ids.contains(&a.unit_id))
        {
            debug!("Unbinding unit {}", assignment.unit_id);
            assignment.release(actor_id);
            tx.update_assignment(assignment).await?;
        }
        for unit_id in unit_ids {
            Self::bind(&mut tx, &mut assignments, &line, unit_id, actor_id).await?;
        }

        tx.commit().await?;

        let after = line_units(&assignments, line_id);
        info!("Line {} now holds {} units", line_id, after.len());

        self.audit
            .record(ACTION_REBIND, ENTITY_BOOKING_LINE, line_id, Some(&before), Some(&after), Some(actor_id))
            .await;

        Ok(after)
    }

    /// Bind `unit_id` to `line`, reusing the booking's released record for it
    async fn bind<T: BookingTx>(
        tx: &mut T,
        assignments: &mut Vec<UnitAssignment>,
        line: &BookingLine,
        unit_id: Uuid,
        actor_id: ActorId,
    ) -> AppResult<()> {
        let unit = tx
            .find_unit(unit_id)
            .await?
            .ok_or(AppError::UnitNotFound(unit_id))?;
        if unit.equipment_id != line.equipment_id {
            return Err(AppError::Validation(format!(
                "unit {} does not belong to the equipment of line {}",
                unit.serial_number, line.id
            )));
        }

        if let Some(active) = tx.find_active_assignment(unit_id).await? {
            if active.booking_id == line.booking_id && active.line_id == line.id {
                return Ok(());
            }
            warn!("Unit {} is held by booking {}", unit.serial_number, active.booking_id);
            return Err(AppError::AllocationExclusivity {
                unit_id,
                holder: Some(active.booking_id),
            });
        }

        if unit.status != UnitStatus::Available {
            return Err(AppError::Validation(format!(
                "unit {} is {}",
                unit.serial_number, unit.status
            )));
        }

        match assignments.iter_mut().find(|a| a.unit_id == unit_id) {
            Some(released) => {
                released.reactivate(line.id, actor_id);
                tx.update_assignment(released).await?;
            }
            None => {
                let assignment = UnitAssignment::new(line.booking_id, line.id, unit_id, actor_id);
                tx.insert_assignment(&assignment).await?;
                assignments.push(assignment);
            }
        }
        Ok(())
    }

    async fn ensure_approved<T: BookingTx>(tx: &mut T, booking: &Booking) -> AppResult<()> {
        let status = tx
            .find_approval(booking.id)
            .await?
            .map(|a| a.status)
            .unwrap_or_default();
        if status != ApprovalStatus::Approved {
            return Err(AppError::InvalidStateTransition(format!(
                "approval of booking {} is {}",
                booking.id, status
            )));
        }
        Ok(())
    }

    async fn equipment(&self, equipment_id: Uuid) -> AppResult<Equipment> {
        self.inventory
            .equipment(equipment_id)
            .await?
            .ok_or(AppError::EquipmentNotFound(equipment_id))
    }
}

fn ensure_distinct(unit_ids: impl Iterator<Item = Uuid>) -> AppResult<()> {
    let mut seen = HashSet::new();
    for unit_id in unit_ids {
        if !seen.insert(unit_id) {
            return Err(AppError::Validation(format!("unit {} is listed twice", unit_id)));
        }
    }
    Ok(())
}

fn line_units(assignments: &[UnitAssignment], line_id: Uuid) -> Vec<UnitAssignment> {
    assignments
        .iter()
        .filter(|a| a.line_id == line_id && a.is_active())
        .cloned()
        .collect()
}
