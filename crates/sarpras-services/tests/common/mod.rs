//! Shared fixture for the service integration tests
//!
//! One venue, one serialized equipment with five units, one pooled
//! equipment, and a fixed cast of approvers and operators, all backed by the
//! in-memory store.

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use sarpras_core::{
    models::{
        ApprovalScope, BookingStatus, Decision, EquipmentUnit, LoanType, Tracking, UnitStatus,
        VenueStatus,
    },
    traits::Capability,
    BookingConfig,
};
use sarpras_db::{
    MemoryApproverDirectory, MemoryAuthorizationOracle, MemoryInventory, MemoryStore,
    RecordingAuditSink, RecordingNotificationSink,
};
use sarpras_services::{
    BookingDetails, BookingEngine, BookingRequest, Collaborators, LineRequest, PickupRequest,
    UnitBinding,
};
use std::sync::Arc;
use uuid::Uuid;

/// Hour `h` of the fixture day
pub fn at(h: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 5, 6, 0, 0, 0).unwrap() + Duration::hours(h)
}

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub engine: BookingEngine<MemoryStore>,
    pub audit: Arc<RecordingAuditSink>,
    pub notifications: Arc<RecordingNotificationSink>,
    pub collaborators: Collaborators,

    pub venue: Uuid,
    pub closed_venue: Uuid,
    /// Serialized, five units
    pub projector: Uuid,
    pub projector_units: Vec<Uuid>,
    /// Pooled, fifty in stock
    pub chairs: Uuid,

    /// Global approver
    pub admin: Uuid,
    /// Projector approvers, levels 1 and 2
    pub lab_head: Uuid,
    pub lab_staff: Uuid,
    pub warehouse: Uuid,
    pub venue_keeper: Uuid,
    /// Pickup, return, re-binding and booking management
    pub officer: Uuid,
    /// Blanket approval override
    pub supervisor: Uuid,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_config(BookingConfig::default()).await
    }

    pub async fn with_config(config: BookingConfig) -> Self {
        let mut inventory = MemoryInventory::new();
        let venue = inventory.add_venue("Aula Utama", VenueStatus::Available);
        let closed_venue = inventory.add_venue("Gedung Lama", VenueStatus::Unavailable);
        let projector = inventory.add_equipment("Proyektor", Tracking::Serialized, 5);
        let chairs = inventory.add_equipment("Kursi Lipat", Tracking::Pooled, 50);

        let admin = Uuid::new_v4();
        let lab_head = Uuid::new_v4();
        let lab_staff = Uuid::new_v4();
        let warehouse = Uuid::new_v4();
        let venue_keeper = Uuid::new_v4();
        let officer = Uuid::new_v4();
        let supervisor = Uuid::new_v4();

        let approvers = MemoryApproverDirectory::new()
            .with_global(admin, 1)
            .with_equipment(projector, lab_head, 1)
            .with_equipment(projector, lab_staff, 2)
            .with_equipment(chairs, warehouse, 1)
            .with_venue(venue, venue_keeper, 1);

        let authorization = MemoryAuthorizationOracle::new()
            .grant(officer, Capability::ValidatePickup)
            .grant(officer, Capability::ValidateReturn)
            .grant(officer, Capability::ManageAllocations)
            .grant(officer, Capability::ManageBookings)
            .grant(supervisor, Capability::OverrideApproval);

        let store = Arc::new(MemoryStore::new());
        let mut projector_units = Vec::new();
        for n in 1..=5 {
            let unit = EquipmentUnit {
                id: Uuid::new_v4(),
                equipment_id: projector,
                serial_number: format!("PRJ-{:03}", n),
                status: UnitStatus::Available,
            };
            projector_units.push(unit.id);
            store.insert_unit(unit).await;
        }

        let audit = Arc::new(RecordingAuditSink::new());
        let notifications = Arc::new(RecordingNotificationSink::new());

        let collaborators = Collaborators {
            inventory: Arc::new(inventory),
            approvers: Arc::new(approvers),
            authorization: Arc::new(authorization),
            audit: audit.clone(),
            notifications: notifications.clone(),
        };
        let engine = BookingEngine::new(store.clone(), collaborators.clone(), config);

        Self {
            store,
            engine,
            audit,
            notifications,
            collaborators,
            venue,
            closed_venue,
            projector,
            projector_units,
            chairs,
            admin,
            lab_head,
            lab_staff,
            warehouse,
            venue_keeper,
            officer,
            supervisor,
        }
    }

    /// A second engine over the same store and collaborators
    pub fn engine_with(&self, config: BookingConfig) -> BookingEngine<MemoryStore> {
        BookingEngine::new(self.store.clone(), self.collaborators.clone(), config)
    }

    /// Approve every pending task of a booking with its own assignee
    pub async fn approve_all(&self, booking_id: Uuid) {
        for task in self.store.tasks(booking_id).await {
            if task.is_pending() {
                self.engine
                    .approvals
                    .decide(booking_id, task.scope, task.approver_id, Decision::Approve, None, None)
                    .await
                    .unwrap();
            }
        }
        let booking = self.store.booking(booking_id).await.unwrap();
        assert_eq!(booking.status, BookingStatus::Approved);
    }

    /// Submit and approve an equipment booking
    pub async fn approved_equipment_booking(
        &self,
        requester: Uuid,
        lines: &[(Uuid, i32)],
        from: i64,
        to: i64,
    ) -> BookingDetails {
        let details = self
            .engine
            .lifecycle
            .create(requester, equipment_request(lines, from, to))
            .await
            .unwrap();
        self.approve_all(details.booking.id).await;
        self.engine.lifecycle.details(details.booking.id).await.unwrap()
    }

    /// Pick up a booking holding one projector line, binding the given units
    pub async fn pick_up_projectors(&self, details: &BookingDetails, units: &[Uuid]) {
        let line = details
            .lines
            .iter()
            .find(|l| l.equipment_id == self.projector)
            .unwrap();
        let request = PickupRequest {
            units: units
                .iter()
                .map(|unit_id| UnitBinding {
                    line_id: line.id,
                    unit_id: *unit_id,
                })
                .collect(),
            pooled_line_ids: details
                .lines
                .iter()
                .filter(|l| l.equipment_id == self.chairs)
                .map(|l| l.id)
                .collect(),
            photo: None,
        };
        self.engine
            .allocations
            .validate_pickup(self.officer, details.booking.id, request)
            .await
            .unwrap();
    }

    /// Active bookings of a requester as the store sees them
    pub async fn active_count(&self, requester: Uuid) -> i32 {
        self.store
            .bookings_of(requester)
            .await
            .iter()
            .filter(|b| b.status.is_active())
            .count() as i32
    }

    /// Quota count as the quota guard tracks it
    pub async fn quota_count(&self, requester: Uuid) -> i32 {
        self.store
            .quota(requester)
            .await
            .map(|q| q.active_count)
            .unwrap_or(0)
    }
}

pub fn base_request(loan_type: LoanType, from: i64, to: i64) -> BookingRequest {
    BookingRequest {
        loan_type,
        venue_id: None,
        custom_location: None,
        participant_count: None,
        group_id: None,
        title: "Kegiatan Himpunan".to_string(),
        start_at: at(from),
        end_at: at(to),
        document_ref: None,
        lines: Vec::new(),
    }
}

pub fn venue_request(venue: Uuid, from: i64, to: i64) -> BookingRequest {
    BookingRequest {
        venue_id: Some(venue),
        ..base_request(LoanType::Venue, from, to)
    }
}

pub fn location_request(location: &str, from: i64, to: i64) -> BookingRequest {
    BookingRequest {
        custom_location: Some(location.to_string()),
        ..base_request(LoanType::Venue, from, to)
    }
}

pub fn equipment_request(lines: &[(Uuid, i32)], from: i64, to: i64) -> BookingRequest {
    BookingRequest {
        lines: lines
            .iter()
            .map(|(equipment_id, quantity)| LineRequest {
                equipment_id: *equipment_id,
                quantity: *quantity,
                notes: None,
            })
            .collect(),
        ..base_request(LoanType::Equipment, from, to)
    }
}

/// Scope of the projector approvals
pub fn projector_scope(fx: &Fixture) -> ApprovalScope {
    ApprovalScope::Equipment(fx.projector)
}
