//! In-memory store and collaborators
//!
//! Same contracts as the PostgreSQL implementations. Transactions are
//! serialized by one `tokio::sync::Mutex`: `begin` takes the lock and clones
//! the state, `commit` writes the working copy back. Dropping a transaction
//! discards its working copy.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sarpras_core::{
    models::{
        ApprovalAggregate, ApprovalTask, AuditEntry, Booking, BookingLine, BookingStatus, Equipment,
        EquipmentUnit, Notification, Quota, TimeWindow, Tracking, UnitAssignment, UnitStatus,
        Venue, VenueStatus,
    },
    traits::{
        ApproverAssignment, ApproverDirectory, AuditSink, AuthorizationOracle, BookingStore,
        BookingTx, Capability, EquipmentClaim, InventoryLedger, NotificationSink,
    },
    ActorId, AppError, AppResult,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    bookings: HashMap<Uuid, Booking>,
    /// Lines per booking, in insertion order
    lines: HashMap<Uuid, Vec<BookingLine>>,
    approvals: HashMap<Uuid, ApprovalAggregate>,
    /// Tasks per booking, in insertion order
    tasks: HashMap<Uuid, Vec<ApprovalTask>>,
    quotas: HashMap<Uuid, Quota>,
    units: HashMap<Uuid, EquipmentUnit>,
    assignments: Vec<UnitAssignment>,
}

impl MemoryState {
    fn overlapping<'a>(
        &'a self,
        window: TimeWindow,
        exclude: Option<Uuid>,
    ) -> impl Iterator<Item = &'a Booking> + 'a {
        self.bookings.values().filter(move |b| {
            b.status.is_active() && Some(b.id) != exclude && b.window().overlaps(&window)
        })
    }

    fn sorted(mut bookings: Vec<Booking>) -> Vec<Booking> {
        bookings.sort_by_key(|b| (b.start_at, b.id));
        bookings
    }
}

/// In-memory implementation of BookingStore
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a serialized unit
    pub async fn insert_unit(&self, unit: EquipmentUnit) {
        self.state.lock().await.units.insert(unit.id, unit);
    }

    pub async fn booking(&self, id: Uuid) -> Option<Booking> {
        self.state.lock().await.bookings.get(&id).cloned()
    }

    /// All bookings of a requester
    pub async fn bookings_of(&self, requester_id: Uuid) -> Vec<Booking> {
        let state = self.state.lock().await;
        MemoryState::sorted(
            state
                .bookings
                .values()
                .filter(|b| b.requester_id == requester_id)
                .cloned()
                .collect(),
        )
    }

    pub async fn lines(&self, booking_id: Uuid) -> Vec<BookingLine> {
        let state = self.state.lock().await;
        state.lines.get(&booking_id).cloned().unwrap_or_default()
    }

    pub async fn approval(&self, booking_id: Uuid) -> Option<ApprovalAggregate> {
        self.state.lock().await.approvals.get(&booking_id).cloned()
    }

    pub async fn tasks(&self, booking_id: Uuid) -> Vec<ApprovalTask> {
        let state = self.state.lock().await;
        state.tasks.get(&booking_id).cloned().unwrap_or_default()
    }

    pub async fn quota(&self, requester_id: Uuid) -> Option<Quota> {
        self.state.lock().await.quotas.get(&requester_id).cloned()
    }

    pub async fn unit(&self, unit_id: Uuid) -> Option<EquipmentUnit> {
        self.state.lock().await.units.get(&unit_id).cloned()
    }

    /// Every assignment ever made, released ones included
    pub async fn assignments(&self) -> Vec<UnitAssignment> {
        self.state.lock().await.assignments.clone()
    }
}

#[async_trait]
impl BookingStore for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> AppResult<MemoryTx> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(MemoryTx { guard, working })
    }
}

/// Open in-memory transaction holding the store lock
pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl BookingTx for MemoryTx {
    async fn find_booking(&mut self, id: Uuid) -> AppResult<Option<Booking>> {
        Ok(self.working.bookings.get(&id).cloned())
    }

    async fn insert_booking(&mut self, booking: &Booking) -> AppResult<()> {
        if self.working.bookings.contains_key(&booking.id) {
            return Err(AppError::Database(format!(
                "duplicate booking id {}",
                booking.id
            )));
        }
        self.working.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn update_booking(&mut self, booking: &Booking) -> AppResult<()> {
        match self.working.bookings.get_mut(&booking.id) {
            Some(stored) => {
                *stored = booking.clone();
                Ok(())
            }
            None => Err(AppError::BookingNotFound(booking.id)),
        }
    }

    async fn delete_booking(&mut self, id: Uuid) -> AppResult<bool> {
        let state = &mut self.working;
        let removed = state.bookings.remove(&id).is_some();
        state.lines.remove(&id);
        state.approvals.remove(&id);
        state.tasks.remove(&id);
        state.assignments.retain(|a| a.booking_id != id);
        Ok(removed)
    }

    async fn find_ended_bookings(
        &mut self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<Vec<Booking>> {
        let mut ended: Vec<Booking> = self
            .working
            .bookings
            .values()
            .filter(|b| b.end_at < now)
            .filter(|b| match b.status {
                BookingStatus::Pending | BookingStatus::Approved => true,
                BookingStatus::PickedUp => b.overdue_notified_at.is_none(),
                _ => false,
            })
            .cloned()
            .collect();
        ended.sort_by_key(|b| (b.end_at, b.id));
        ended.truncate(limit.max(0) as usize);
        Ok(ended)
    }

    async fn find_approved_starting(
        &mut self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<Vec<Booking>> {
        let mut due = MemoryState::sorted(
            self.working
                .bookings
                .values()
                .filter(|b| b.status == BookingStatus::Approved)
                .filter(|b| b.pickup_reminder_sent_at.is_none())
                .filter(|b| b.start_at >= from && b.start_at < to)
                .cloned()
                .collect(),
        );
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn set_conflict_group(&mut self, booking_ids: &[Uuid], token: Uuid) -> AppResult<()> {
        for id in booking_ids {
            if let Some(booking) = self.working.bookings.get_mut(id) {
                booking.conflict_group = Some(token);
            }
        }
        Ok(())
    }

    async fn find_lines(&mut self, booking_id: Uuid) -> AppResult<Vec<BookingLine>> {
        Ok(self
            .working
            .lines
            .get(&booking_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn find_line(&mut self, line_id: Uuid) -> AppResult<Option<BookingLine>> {
        Ok(self
            .working
            .lines
            .values()
            .flatten()
            .find(|l| l.id == line_id)
            .cloned())
    }

    async fn replace_lines(&mut self, booking_id: Uuid, lines: &[BookingLine]) -> AppResult<()> {
        let kept: HashSet<Uuid> = lines.iter().map(|l| l.id).collect();
        // Assignments follow their line like the foreign key cascade does
        self.working
            .assignments
            .retain(|a| a.booking_id != booking_id || kept.contains(&a.line_id));
        self.working.lines.insert(booking_id, lines.to_vec());
        Ok(())
    }

    async fn update_line(&mut self, line: &BookingLine) -> AppResult<()> {
        let stored = self
            .working
            .lines
            .get_mut(&line.booking_id)
            .and_then(|lines| lines.iter_mut().find(|l| l.id == line.id))
            .ok_or(AppError::LineNotFound(line.id))?;
        *stored = line.clone();
        Ok(())
    }

    async fn find_venue_overlaps(
        &mut self,
        venue_id: Uuid,
        window: TimeWindow,
        exclude: Option<Uuid>,
    ) -> AppResult<Vec<Booking>> {
        Ok(MemoryState::sorted(
            self.working
                .overlapping(window, exclude)
                .filter(|b| b.venue_id == Some(venue_id))
                .cloned()
                .collect(),
        ))
    }

    async fn find_location_overlaps(
        &mut self,
        location: &str,
        window: TimeWindow,
        exclude: Option<Uuid>,
    ) -> AppResult<Vec<Booking>> {
        Ok(MemoryState::sorted(
            self.working
                .overlapping(window, exclude)
                .filter(|b| b.custom_location.as_deref() == Some(location))
                .cloned()
                .collect(),
        ))
    }

    async fn find_equipment_claims(
        &mut self,
        equipment_id: Uuid,
        window: TimeWindow,
        exclude: Option<Uuid>,
    ) -> AppResult<Vec<EquipmentClaim>> {
        let state = &self.working;
        let mut claims: Vec<EquipmentClaim> = state
            .overlapping(window, exclude)
            .filter_map(|b| {
                let quantity: i32 = state
                    .lines
                    .get(&b.id)?
                    .iter()
                    .filter(|l| l.equipment_id == equipment_id)
                    .map(|l| l.effective_quantity())
                    .sum();
                let claims_equipment = state
                    .lines
                    .get(&b.id)?
                    .iter()
                    .any(|l| l.equipment_id == equipment_id);
                claims_equipment.then(|| EquipmentClaim {
                    booking_id: b.id,
                    requester_id: b.requester_id,
                    status: b.status,
                    quantity,
                    conflict_group: b.conflict_group,
                })
            })
            .collect();
        claims.sort_by_key(|c| c.booking_id);
        Ok(claims)
    }

    async fn find_approval(&mut self, booking_id: Uuid) -> AppResult<Option<ApprovalAggregate>> {
        Ok(self.working.approvals.get(&booking_id).cloned())
    }

    async fn save_approval(&mut self, approval: &ApprovalAggregate) -> AppResult<()> {
        self.working
            .approvals
            .insert(approval.booking_id, approval.clone());
        Ok(())
    }

    async fn find_tasks(&mut self, booking_id: Uuid) -> AppResult<Vec<ApprovalTask>> {
        Ok(self
            .working
            .tasks
            .get(&booking_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn find_task(&mut self, task_id: Uuid) -> AppResult<Option<ApprovalTask>> {
        Ok(self
            .working
            .tasks
            .values()
            .flatten()
            .find(|t| t.id == task_id)
            .cloned())
    }

    async fn insert_tasks(&mut self, tasks: &[ApprovalTask]) -> AppResult<()> {
        for task in tasks {
            self.working
                .tasks
                .entry(task.booking_id)
                .or_default()
                .push(task.clone());
        }
        Ok(())
    }

    async fn update_task(&mut self, task: &ApprovalTask) -> AppResult<()> {
        let stored = self
            .working
            .tasks
            .get_mut(&task.booking_id)
            .and_then(|tasks| tasks.iter_mut().find(|t| t.id == task.id))
            .ok_or(AppError::TaskNotFound(task.id))?;
        *stored = task.clone();
        Ok(())
    }

    async fn delete_tasks(&mut self, task_ids: &[Uuid]) -> AppResult<()> {
        for tasks in self.working.tasks.values_mut() {
            tasks.retain(|t| !task_ids.contains(&t.id));
        }
        Ok(())
    }

    async fn find_quota(&mut self, requester_id: Uuid) -> AppResult<Option<Quota>> {
        Ok(self.working.quotas.get(&requester_id).cloned())
    }

    async fn save_quota(&mut self, quota: &Quota) -> AppResult<()> {
        self.working.quotas.insert(quota.requester_id, quota.clone());
        Ok(())
    }

    async fn find_unit(&mut self, unit_id: Uuid) -> AppResult<Option<EquipmentUnit>> {
        Ok(self.working.units.get(&unit_id).cloned())
    }

    async fn update_unit_status(&mut self, unit_id: Uuid, status: UnitStatus) -> AppResult<()> {
        let unit = self
            .working
            .units
            .get_mut(&unit_id)
            .ok_or(AppError::UnitNotFound(unit_id))?;
        unit.status = status;
        Ok(())
    }

    async fn find_assignments(&mut self, booking_id: Uuid) -> AppResult<Vec<UnitAssignment>> {
        Ok(self
            .working
            .assignments
            .iter()
            .filter(|a| a.booking_id == booking_id)
            .cloned()
            .collect())
    }

    async fn find_active_assignment(&mut self, unit_id: Uuid) -> AppResult<Option<UnitAssignment>> {
        Ok(self
            .working
            .assignments
            .iter()
            .find(|a| a.unit_id == unit_id && a.is_active())
            .cloned())
    }

    async fn insert_assignment(&mut self, assignment: &UnitAssignment) -> AppResult<()> {
        let clash = self.working.assignments.iter().find(|a| {
            (a.booking_id == assignment.booking_id && a.unit_id == assignment.unit_id)
                || (assignment.is_active() && a.is_active() && a.unit_id == assignment.unit_id)
        });
        if let Some(existing) = clash {
            debug!("Unit {} clashes with booking {}", assignment.unit_id, existing.booking_id);
            return Err(AppError::AllocationExclusivity {
                unit_id: assignment.unit_id,
                holder: Some(existing.booking_id),
            });
        }
        self.working.assignments.push(assignment.clone());
        Ok(())
    }

    async fn update_assignment(&mut self, assignment: &UnitAssignment) -> AppResult<()> {
        if assignment.is_active() {
            if let Some(existing) = self
                .working
                .assignments
                .iter()
                .find(|a| a.id != assignment.id && a.unit_id == assignment.unit_id && a.is_active())
            {
                return Err(AppError::AllocationExclusivity {
                    unit_id: assignment.unit_id,
                    holder: Some(existing.booking_id),
                });
            }
        }
        let stored = self
            .working
            .assignments
            .iter_mut()
            .find(|a| a.id == assignment.id)
            .ok_or(AppError::AssignmentNotFound(assignment.id))?;
        *stored = assignment.clone();
        Ok(())
    }

    async fn commit(self) -> AppResult<()> {
        let MemoryTx { mut guard, working } = self;
        *guard = working;
        Ok(())
    }
}

/// In-memory inventory ledger, configured up front
#[derive(Default)]
pub struct MemoryInventory {
    equipment: HashMap<Uuid, (Equipment, i64)>,
    venues: HashMap<Uuid, Venue>,
}

impl MemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equipment with its lendable quantity
    pub fn add_equipment(&mut self, name: &str, tracking: Tracking, quantity: i64) -> Uuid {
        let id = Uuid::new_v4();
        let equipment = Equipment {
            id,
            name: name.to_string(),
            tracking,
        };
        self.equipment.insert(id, (equipment, quantity));
        id
    }

    pub fn add_venue(&mut self, name: &str, status: VenueStatus) -> Uuid {
        let id = Uuid::new_v4();
        self.venues.insert(
            id,
            Venue {
                id,
                name: name.to_string(),
                status,
            },
        );
        id
    }
}

#[async_trait]
impl InventoryLedger for MemoryInventory {
    async fn equipment(&self, equipment_id: Uuid) -> AppResult<Option<Equipment>> {
        Ok(self.equipment.get(&equipment_id).map(|(e, _)| e.clone()))
    }

    async fn available_quantity(&self, equipment_id: Uuid) -> AppResult<i64> {
        self.equipment
            .get(&equipment_id)
            .map(|(_, quantity)| *quantity)
            .ok_or(AppError::EquipmentNotFound(equipment_id))
    }

    async fn venue(&self, venue_id: Uuid) -> AppResult<Option<Venue>> {
        Ok(self.venues.get(&venue_id).cloned())
    }
}

/// In-memory approver directory
#[derive(Default)]
pub struct MemoryApproverDirectory {
    global: Vec<ApproverAssignment>,
    equipment: HashMap<Uuid, Vec<ApproverAssignment>>,
    venues: HashMap<Uuid, Vec<ApproverAssignment>>,
}

impl MemoryApproverDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_global(mut self, approver_id: Uuid, level: i32) -> Self {
        self.global.push(ApproverAssignment { approver_id, level });
        self
    }

    pub fn with_equipment(mut self, equipment_id: Uuid, approver_id: Uuid, level: i32) -> Self {
        self.equipment
            .entry(equipment_id)
            .or_default()
            .push(ApproverAssignment { approver_id, level });
        self
    }

    pub fn with_venue(mut self, venue_id: Uuid, approver_id: Uuid, level: i32) -> Self {
        self.venues
            .entry(venue_id)
            .or_default()
            .push(ApproverAssignment { approver_id, level });
        self
    }
}

#[async_trait]
impl ApproverDirectory for MemoryApproverDirectory {
    async fn global_approvers(&self) -> AppResult<Vec<ApproverAssignment>> {
        Ok(self.global.clone())
    }

    async fn equipment_approvers(&self, equipment_id: Uuid) -> AppResult<Vec<ApproverAssignment>> {
        Ok(self.equipment.get(&equipment_id).cloned().unwrap_or_default())
    }

    async fn venue_approvers(&self, venue_id: Uuid) -> AppResult<Vec<ApproverAssignment>> {
        Ok(self.venues.get(&venue_id).cloned().unwrap_or_default())
    }
}

/// In-memory authorization oracle holding explicit grants
#[derive(Default)]
pub struct MemoryAuthorizationOracle {
    grants: HashSet<(ActorId, Capability)>,
}

impl MemoryAuthorizationOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, actor_id: ActorId, capability: Capability) -> Self {
        self.grants.insert((actor_id, capability));
        self
    }
}

#[async_trait]
impl AuthorizationOracle for MemoryAuthorizationOracle {
    async fn has_capability(&self, actor_id: ActorId, capability: Capability) -> AppResult<bool> {
        Ok(self.grants.contains(&(actor_id, capability)))
    }
}

/// Audit sink keeping every entry in memory
#[derive(Default)]
pub struct RecordingAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl RecordingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().await.clone()
    }

    /// Recorded actions, in order
    pub async fn actions(&self) -> Vec<String> {
        self.entries
            .lock()
            .await
            .iter()
            .map(|e| e.action.clone())
            .collect()
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn record(&self, entry: AuditEntry) {
        self.entries.lock().await.push(entry);
    }
}

/// Notification sink keeping every notification in memory
#[derive(Default)]
pub struct RecordingNotificationSink {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotificationSink {
    async fn dispatch(&self, notification: Notification) {
        self.sent.lock().await.push(notification);
    }
}
