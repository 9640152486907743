//! Booking lifecycle manager
//!
//! Creates, edits, cancels and deletes bookings. Creation runs the quota and
//! conflict checks, persists the booking with its lines and seeds the
//! approval tasks, all in one transaction.

use chrono::{DateTime, Utc};
use sarpras_core::{
    models::{
        ApprovalAggregate, Booking, BookingLine, BookingStatus, LoanType, Notification,
        NotificationEvent, TimeWindow,
    },
    traits::{AuditSink, AuthorizationOracle, BookingStore, BookingTx, Capability, NotificationSink},
    ActorId, AppError, AppResult, BookingConfig,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::approval_workflow::ApprovalWorkflow;
use crate::audit::AuditTrail;
use crate::conflict_detector::{ConflictCandidate, ConflictDetector};
use crate::constants::{
    ACTION_CANCEL, ACTION_CREATE, ACTION_DELETE, ACTION_UPDATE, ENTITY_BOOKING,
};
use crate::quota_guard::QuotaGuard;

/// Requested equipment line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct LineRequest {
    pub equipment_id: Uuid,

    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,

    #[validate(length(max = 500))]
    pub notes: Option<String>,
}

/// Booking submission or edit
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BookingRequest {
    pub loan_type: LoanType,

    pub venue_id: Option<Uuid>,

    #[validate(length(max = 255, message = "Custom location is too long"))]
    pub custom_location: Option<String>,

    #[validate(range(min = 1, message = "Participant count must be positive"))]
    pub participant_count: Option<i32>,

    pub group_id: Option<Uuid>,

    #[validate(length(min = 1, max = 255, message = "Title is required"))]
    pub title: String,

    pub start_at: DateTime<Utc>,

    pub end_at: DateTime<Utc>,

    #[validate(length(max = 500))]
    pub document_ref: Option<String>,

    #[validate(nested)]
    pub lines: Vec<LineRequest>,
}

impl BookingRequest {
    /// Run field and cross-field checks, returning the requested window
    pub fn check(&self) -> AppResult<TimeWindow> {
        self.validate().map_err(|e| {
            warn!("Booking request validation failed: {}", e);
            AppError::from(e)
        })?;

        let window = TimeWindow::new(self.start_at, self.end_at)?;

        if self.title.trim().is_empty() {
            return Err(AppError::Validation("Title is required".to_string()));
        }

        let location = self.custom_location.as_deref().map(str::trim);
        if location == Some("") {
            return Err(AppError::Validation(
                "Custom location must not be blank".to_string(),
            ));
        }

        let has_place = self.venue_id.is_some() || location.is_some();
        if self.venue_id.is_some() && location.is_some() {
            return Err(AppError::Validation(
                "A booking names either a venue or a custom location, not both".to_string(),
            ));
        }
        if self.loan_type.requires_place() && !has_place {
            return Err(AppError::Validation(format!(
                "A {} loan needs a venue or a custom location",
                self.loan_type
            )));
        }
        if self.loan_type == LoanType::Equipment && has_place {
            return Err(AppError::Validation(
                "An equipment loan does not book a place".to_string(),
            ));
        }
        if self.loan_type.requires_equipment() && self.lines.is_empty() {
            return Err(AppError::Validation(format!(
                "A {} loan needs at least one equipment line",
                self.loan_type
            )));
        }

        let mut seen = HashSet::new();
        if let Some(dup) = self.lines.iter().find(|l| !seen.insert(l.equipment_id)) {
            return Err(AppError::Validation(format!(
                "Equipment {} is listed twice",
                dup.equipment_id
            )));
        }

        Ok(window)
    }

    /// Copy the requested fields onto a booking
    fn apply(&self, booking: &mut Booking, window: TimeWindow) {
        booking.loan_type = self.loan_type;
        booking.venue_id = self.venue_id;
        booking.custom_location = self.custom_location.as_deref().map(|l| l.trim().to_string());
        booking.participant_count = self.participant_count;
        booking.group_id = self.group_id;
        booking.title = self.title.trim().to_string();
        booking.start_at = window.start;
        booking.end_at = window.end;
        booking.document_ref = self.document_ref.clone();
    }
}

/// A booking with its lines and approval rollup
#[derive(Debug, Clone, Serialize)]
pub struct BookingDetails {
    pub booking: Booking,
    pub lines: Vec<BookingLine>,
    pub approval: ApprovalAggregate,
}

/// Booking lifecycle manager
pub struct BookingLifecycle<S: BookingStore> {
    store: Arc<S>,
    detector: ConflictDetector,
    quota: QuotaGuard,
    approvals: Arc<ApprovalWorkflow<S>>,
    authorization: Arc<dyn AuthorizationOracle>,
    audit: AuditTrail,
    notifier: Arc<dyn NotificationSink>,
}

impl<S: BookingStore> BookingLifecycle<S> {
    /// Create a new booking lifecycle manager
    pub fn new(
        store: Arc<S>,
        detector: ConflictDetector,
        approvals: Arc<ApprovalWorkflow<S>>,
        authorization: Arc<dyn AuthorizationOracle>,
        audit: Arc<dyn AuditSink>,
        notifier: Arc<dyn NotificationSink>,
        config: &BookingConfig,
    ) -> Self {
        Self {
            store,
            detector,
            quota: QuotaGuard::new(config),
            approvals,
            authorization,
            audit: AuditTrail::new(audit),
            notifier,
        }
    }

    /// Submit a new booking on behalf of `actor_id`
    #[instrument(skip(self, request), fields(title = %request.title))]
    pub async fn create(&self, actor_id: ActorId, request: BookingRequest) -> AppResult<BookingDetails> {
        let window = request.check()?;
        info!("Requester {} submits a {} booking", actor_id, request.loan_type);

        let mut tx = self.store.begin().await?;

        self.quota.reserve(&mut tx, actor_id).await?;

        let mut booking = Booking::new(actor_id, request.loan_type, request.title.clone(), window);
        request.apply(&mut booking, window);
        let lines: Vec<BookingLine> = request
            .lines
            .iter()
            .map(|l| BookingLine::new(booking.id, l.equipment_id, l.quantity, l.notes.clone()))
            .collect();

        let candidate = ConflictCandidate {
            window,
            venue_id: booking.venue_id,
            custom_location: booking.custom_location.clone(),
            equipment: lines
                .iter()
                .map(|l| (l.equipment_id, l.quantity_requested))
                .collect(),
            exclude: None,
        };
        let scan = self.detector.scan(&mut tx, &candidate).await?;
        if let Some(conflict) = scan.conflict {
            warn!("Booking rejected on conflict: {}", conflict.message);
            return Err(conflict.into());
        }

        let rivals: Vec<Uuid> = scan.rivals.iter().map(|r| r.booking_id).collect();
        if !rivals.is_empty() {
            let token = scan
                .rivals
                .iter()
                .find_map(|r| r.conflict_group)
                .unwrap_or_else(Uuid::new_v4);
            booking.conflict_group = Some(token);
        }

        tx.insert_booking(&booking).await?;
        tx.replace_lines(booking.id, &lines).await?;
        let (approval, tasks) = self.approvals.seed(&mut tx, &booking, &lines).await?;
        if let Some(token) = booking.conflict_group {
            debug!("Linking {} pending rivals under {}", rivals.len(), token);
            tx.set_conflict_group(&rivals, token).await?;
        }

        tx.commit().await?;

        info!("Booking {} created with {} lines", booking.id, lines.len());

        self.audit
            .record(ACTION_CREATE, ENTITY_BOOKING, booking.id, None, Some(&booking), Some(actor_id))
            .await;

        let approvers: BTreeSet<Uuid> = tasks.iter().map(|t| t.approver_id).collect();
        for approver_id in approvers {
            self.notifier
                .dispatch(Notification::new(
                    NotificationEvent::Submitted,
                    booking.id,
                    approver_id,
                    booking.title.clone(),
                ))
                .await;
        }

        Ok(BookingDetails {
            booking,
            lines,
            approval,
        })
    }

    /// Edit a pending or approved booking.
    ///
    /// Lines are matched by equipment: kept lines keep their id and their
    /// approved quantity, clamped to the new request.
    #[instrument(skip(self, request))]
    pub async fn update(
        &self,
        actor_id: ActorId,
        booking_id: Uuid,
        request: BookingRequest,
    ) -> AppResult<BookingDetails> {
        let window = request.check()?;

        let mut tx = self.store.begin().await?;

        let mut booking = tx
            .find_booking(booking_id)
            .await?
            .ok_or(AppError::BookingNotFound(booking_id))?;
        self.ensure_may_manage(actor_id, &booking).await?;
        booking.ensure_status(&[BookingStatus::Pending, BookingStatus::Approved], "update")?;

        let before = booking.clone();
        let old_lines = tx.find_lines(booking_id).await?;

        let mut lines: Vec<BookingLine> = request
            .lines
            .iter()
            .map(|l| match old_lines.iter().find(|o| o.equipment_id == l.equipment_id) {
                Some(old) => BookingLine {
                    quantity_requested: l.quantity,
                    quantity_approved: old.quantity_approved.map(|q| q.min(l.quantity)),
                    notes: l.notes.clone(),
                    ..old.clone()
                },
                None => BookingLine::new(booking_id, l.equipment_id, l.quantity, l.notes.clone()),
            })
            .collect();

        request.apply(&mut booking, window);

        if booking.status == BookingStatus::Approved
            && ApprovalWorkflow::<S>::required_scopes(&before, &old_lines)
                != ApprovalWorkflow::<S>::required_scopes(&booking, &lines)
        {
            return Err(AppError::InvalidStateTransition(format!(
                "resources of approved booking {} cannot change",
                booking_id
            )));
        }

        if booking.status == BookingStatus::Approved {
            for line in &lines {
                let granted = old_lines
                    .iter()
                    .find(|o| o.equipment_id == line.equipment_id)
                    .map(|o| o.effective_quantity())
                    .unwrap_or(line.quantity_requested);
                if line.quantity_requested > granted {
                    return Err(AppError::Validation(format!(
                        "approved booking {} grants {} of equipment {}, cannot request {}",
                        booking_id, granted, line.equipment_id, line.quantity_requested
                    )));
                }
            }
        }

        let candidate = ConflictCandidate::from_booking(&booking, &lines);
        if let Some(conflict) = self.detector.check_conflicts(&mut tx, &candidate).await? {
            warn!("Booking {} update rejected on conflict: {}", booking_id, conflict.message);
            return Err(conflict.into());
        }

        booking.updated_at = Utc::now();
        tx.update_booking(&booking).await?;
        tx.replace_lines(booking_id, &lines).await?;

        let (approval, event) = if booking.status == BookingStatus::Pending {
            self.approvals
                .sync(&mut tx, &mut booking, &mut lines, &before, &old_lines)
                .await?
        } else {
            let approval = tx
                .find_approval(booking_id)
                .await?
                .unwrap_or_else(|| ApprovalAggregate::new(booking_id));
            (approval, None)
        };

        tx.commit().await?;

        info!("Booking {} updated by {}", booking_id, actor_id);

        self.audit
            .record(ACTION_UPDATE, ENTITY_BOOKING, booking_id, Some(&before), Some(&booking), Some(actor_id))
            .await;
        self.approvals
            .announce(&before, &booking, event, actor_id)
            .await;

        Ok(BookingDetails {
            booking,
            lines,
            approval,
        })
    }

    /// Withdraw a pending or approved booking
    #[instrument(skip(self, reason))]
    pub async fn cancel(
        &self,
        actor_id: ActorId,
        booking_id: Uuid,
        reason: Option<String>,
    ) -> AppResult<Booking> {
        let mut tx = self.store.begin().await?;

        let mut booking = tx
            .find_booking(booking_id)
            .await?
            .ok_or(AppError::BookingNotFound(booking_id))?;
        self.ensure_may_manage(actor_id, &booking).await?;

        let before = booking.clone();
        booking.transition_to(BookingStatus::Cancelled)?;
        booking.cancellation_reason = reason;
        booking.cancelled_by = Some(actor_id);
        booking.cancelled_at = Some(Utc::now());

        for mut assignment in tx
            .find_assignments(booking_id)
            .await?
            .into_iter()
            .filter(|a| a.is_active())
        {
            assignment.release(actor_id);
            tx.update_assignment(&assignment).await?;
        }

        self.quota.release(&mut tx, &mut booking).await?;
        tx.update_booking(&booking).await?;

        tx.commit().await?;

        info!("Booking {} cancelled by {}", booking_id, actor_id);

        self.audit
            .record(ACTION_CANCEL, ENTITY_BOOKING, booking_id, Some(&before), Some(&booking), Some(actor_id))
            .await;

        Ok(booking)
    }

    /// Hard-delete a pending booking
    #[instrument(skip(self))]
    pub async fn delete(&self, actor_id: ActorId, booking_id: Uuid) -> AppResult<()> {
        self.authorization
            .require(actor_id, Capability::ManageBookings)
            .await?;

        let mut tx = self.store.begin().await?;

        let mut booking = tx
            .find_booking(booking_id)
            .await?
            .ok_or(AppError::BookingNotFound(booking_id))?;
        booking.ensure_status(&[BookingStatus::Pending], "delete")?;

        self.quota.release(&mut tx, &mut booking).await?;
        tx.delete_booking(booking_id).await?;

        tx.commit().await?;

        info!("Booking {} deleted by {}", booking_id, actor_id);

        self.audit
            .record(ACTION_DELETE, ENTITY_BOOKING, booking_id, Some(&booking), None, Some(actor_id))
            .await;

        Ok(())
    }

    /// Load a booking with its lines and approval rollup
    pub async fn details(&self, booking_id: Uuid) -> AppResult<BookingDetails> {
        let mut tx = self.store.begin().await?;

        let booking = tx
            .find_booking(booking_id)
            .await?
            .ok_or(AppError::BookingNotFound(booking_id))?;
        let lines = tx.find_lines(booking_id).await?;
        let approval = tx
            .find_approval(booking_id)
            .await?
            .unwrap_or_else(|| ApprovalAggregate::new(booking_id));

        Ok(BookingDetails {
            booking,
            lines,
            approval,
        })
    }

    /// The requester may manage their own booking, others need `ManageBookings`
    async fn ensure_may_manage(&self, actor_id: ActorId, booking: &Booking) -> AppResult<()> {
        if booking.is_owned_by(actor_id) {
            return Ok(());
        }
        self.authorization
            .require(actor_id, Capability::ManageBookings)
            .await
    }
}
