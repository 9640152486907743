//! Approval workflow engine
//!
//! A booking needs one global approval plus one approval per distinct
//! equipment and venue it references. Each scope is staffed by the approvers
//! the directory lists for it, at their own hierarchy levels:
//! - Any rejecting decision vetoes the whole booking
//! - The booking is approved once every task of every scope approves
//! - A more senior approver of the same scope, or an actor holding the
//!   override capability, may decide a pending task in the assignee's place

use sarpras_core::{
    models::{
        ApprovalAggregate, ApprovalScope, ApprovalStatus, ApprovalTask, Booking, BookingLine,
        BookingStatus, Decision, Notification, NotificationEvent,
    },
    traits::{
        ApproverDirectory, AuditSink, AuthorizationOracle, BookingStore, BookingTx, Capability,
        NotificationSink,
    },
    ActorId, AppError, AppResult, BookingConfig,
};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::audit::AuditTrail;
use crate::constants::{
    ACTION_APPROVE, ACTION_DECIDE, ACTION_OVERRIDE, ACTION_REJECT, ENTITY_APPROVAL_TASK,
    ENTITY_BOOKING,
};
use crate::quota_guard::QuotaGuard;

/// Everything a decision touched
#[derive(Debug, Clone)]
pub struct ApprovalOutcome {
    pub booking: Booking,
    pub approval: ApprovalAggregate,
    /// The task that was decided or overridden
    pub task: ApprovalTask,
}

/// Approval workflow engine
pub struct ApprovalWorkflow<S: BookingStore> {
    store: Arc<S>,
    directory: Arc<dyn ApproverDirectory>,
    authorization: Arc<dyn AuthorizationOracle>,
    audit: AuditTrail,
    notifier: Arc<dyn NotificationSink>,
    quota: QuotaGuard,
}

impl<S: BookingStore> ApprovalWorkflow<S> {
    /// Create a new approval workflow
    pub fn new(
        store: Arc<S>,
        directory: Arc<dyn ApproverDirectory>,
        authorization: Arc<dyn AuthorizationOracle>,
        audit: Arc<dyn AuditSink>,
        notifier: Arc<dyn NotificationSink>,
        config: &BookingConfig,
    ) -> Self {
        Self {
            store,
            directory,
            authorization,
            audit: AuditTrail::new(audit),
            notifier,
            quota: QuotaGuard::new(config),
        }
    }

    /// Scopes a booking must be approved for
    pub fn required_scopes(booking: &Booking, lines: &[BookingLine]) -> BTreeSet<ApprovalScope> {
        let mut scopes = BTreeSet::from([ApprovalScope::Global]);
        if let Some(venue_id) = booking.venue_id {
            scopes.insert(ApprovalScope::Venue(venue_id));
        }
        scopes.extend(lines.iter().map(|l| ApprovalScope::Equipment(l.equipment_id)));
        scopes
    }

    /// Fresh pending tasks for one scope, one per configured approver
    async fn tasks_for(&self, booking_id: Uuid, scope: ApprovalScope) -> AppResult<Vec<ApprovalTask>> {
        let approvers = match scope {
            ApprovalScope::Global => self.directory.global_approvers().await?,
            ApprovalScope::Equipment(id) => self.directory.equipment_approvers(id).await?,
            ApprovalScope::Venue(id) => self.directory.venue_approvers(id).await?,
        };

        if approvers.is_empty() {
            if scope == ApprovalScope::Global {
                return Err(AppError::Validation(
                    "no global approver is configured".to_string(),
                ));
            }
            debug!("No approver configured for {}", scope);
        }

        let mut seen = HashSet::new();
        Ok(approvers
            .into_iter()
            .filter(|a| seen.insert(a.approver_id))
            .map(|a| ApprovalTask::new(booking_id, a.approver_id, scope, a.level))
            .collect())
    }

    /// Create the approval tasks and aggregate of a new booking
    #[instrument(skip(self, tx, booking, lines), fields(booking_id = %booking.id))]
    pub async fn seed<T: BookingTx>(
        &self,
        tx: &mut T,
        booking: &Booking,
        lines: &[BookingLine],
    ) -> AppResult<(ApprovalAggregate, Vec<ApprovalTask>)> {
        let mut tasks = Vec::new();
        for scope in Self::required_scopes(booking, lines) {
            tasks.extend(self.tasks_for(booking.id, scope).await?);
        }
        tx.insert_tasks(&tasks).await?;

        let mut approval = ApprovalAggregate::new(booking.id);
        approval.recompute(&tasks);
        tx.save_approval(&approval).await?;

        debug!("Seeded {} approval tasks", tasks.len());
        Ok((approval, tasks))
    }

    /// Align the tasks of an edited pending booking with its resources.
    ///
    /// Tasks of resources no longer referenced are dropped and resources new
    /// to the booking get pending tasks. Decisions on an equipment line whose
    /// requested quantity grew are reopened, and a moved window reopens every
    /// decision. Other tasks keep their decisions.
    #[instrument(skip(self, tx, booking, lines, before, before_lines), fields(booking_id = %booking.id))]
    pub async fn sync<T: BookingTx>(
        &self,
        tx: &mut T,
        booking: &mut Booking,
        lines: &mut [BookingLine],
        before: &Booking,
        before_lines: &[BookingLine],
    ) -> AppResult<(ApprovalAggregate, Option<NotificationEvent>)> {
        let required = Self::required_scopes(booking, lines);
        let existing = tx.find_tasks(booking.id).await?;

        let window_moved = before.start_at != booking.start_at || before.end_at != booking.end_at;
        let grown: BTreeSet<ApprovalScope> = lines
            .iter()
            .filter(|l| {
                before_lines
                    .iter()
                    .any(|o| o.equipment_id == l.equipment_id && l.quantity_requested > o.quantity_requested)
            })
            .map(|l| ApprovalScope::Equipment(l.equipment_id))
            .collect();
        let reopens = |scope: &ApprovalScope| window_moved || grown.contains(scope);

        let stale: Vec<Uuid> = existing
            .iter()
            .filter(|t| !required.contains(&t.scope))
            .map(|t| t.id)
            .collect();
        tx.delete_tasks(&stale).await?;

        let mut tasks: Vec<ApprovalTask> = existing
            .into_iter()
            .filter(|t| required.contains(&t.scope))
            .collect();

        let mut reopened = 0;
        let mut global_reopened = false;
        for task in tasks.iter_mut().filter(|t| reopens(&t.scope)) {
            if task.reopen() {
                tx.update_task(task).await?;
                reopened += 1;
                global_reopened |= task.scope == ApprovalScope::Global;
            }
        }
        for line in lines
            .iter_mut()
            .filter(|l| reopens(&ApprovalScope::Equipment(l.equipment_id)))
        {
            if line.quantity_approved.take().is_some() {
                tx.update_line(line).await?;
            }
        }

        let present: BTreeSet<ApprovalScope> = tasks.iter().map(|t| t.scope).collect();
        let mut added = Vec::new();
        for scope in required.iter().filter(|s| !present.contains(s)) {
            added.extend(self.tasks_for(booking.id, *scope).await?);
        }
        tx.insert_tasks(&added).await?;
        tasks.extend(added);

        debug!(
            "Approval sync dropped {} tasks, reopened {}, now {}",
            stale.len(),
            reopened,
            tasks.len()
        );

        let mut approval = tx
            .find_approval(booking.id)
            .await?
            .unwrap_or_else(|| ApprovalAggregate::new(booking.id));
        if global_reopened {
            approval.global_decided_by = None;
            approval.global_decided_at = None;
            approval.global_reason = None;
        }
        approval.recompute(&tasks);
        tx.save_approval(&approval).await?;

        let event = self.settle(tx, booking, lines, approval.status, None).await?;
        Ok((approval, event))
    }

    /// Current aggregate and tasks of a booking
    pub async fn status(&self, booking_id: Uuid) -> AppResult<(ApprovalAggregate, Vec<ApprovalTask>)> {
        let mut tx = self.store.begin().await?;
        let approval = tx
            .find_approval(booking_id)
            .await?
            .ok_or(AppError::BookingNotFound(booking_id))?;
        let tasks = tx.find_tasks(booking_id).await?;
        Ok((approval, tasks))
    }

    /// Record an approver's decision on their own task.
    ///
    /// `approved_quantity` trims the quantity of the equipment line when an
    /// equipment approver approves less than was requested.
    #[instrument(skip(self, notes))]
    pub async fn decide(
        &self,
        booking_id: Uuid,
        scope: ApprovalScope,
        approver_id: ActorId,
        decision: Decision,
        notes: Option<String>,
        approved_quantity: Option<i32>,
    ) -> AppResult<ApprovalOutcome> {
        info!("Approver {} decides {} on {}", approver_id, decision, scope);

        if approved_quantity.is_some()
            && (decision == Decision::Reject || !matches!(scope, ApprovalScope::Equipment(_)))
        {
            return Err(AppError::Validation(
                "an approved quantity only applies when approving equipment".to_string(),
            ));
        }

        let mut tx = self.store.begin().await?;

        let mut booking = tx
            .find_booking(booking_id)
            .await?
            .ok_or(AppError::BookingNotFound(booking_id))?;
        booking.ensure_status(&[BookingStatus::Pending], "decide on")?;
        let booking_before = booking.clone();

        let mut tasks = tx.find_tasks(booking_id).await?;
        let index = Self::match_task(&tasks, booking_id, scope, approver_id)?;
        let task_before = tasks[index].clone();
        tasks[index].decide(decision, notes);
        tx.update_task(&tasks[index]).await?;

        let mut lines = tx.find_lines(booking_id).await?;
        if let (Some(quantity), ApprovalScope::Equipment(equipment_id)) = (approved_quantity, scope) {
            let line = lines
                .iter_mut()
                .find(|l| l.equipment_id == equipment_id)
                .ok_or_else(|| {
                    AppError::Validation(format!("booking has no line for equipment {}", equipment_id))
                })?;
            if quantity < 1 || quantity > line.quantity_requested {
                return Err(AppError::Validation(format!(
                    "approved quantity must be between 1 and {}",
                    line.quantity_requested
                )));
            }
            line.quantity_approved = Some(quantity);
            tx.update_line(line).await?;
        }

        let task = tasks[index].clone();
        let (approval, event) = self
            .conclude(&mut tx, &mut booking, &mut lines, &tasks, &task)
            .await?;

        tx.commit().await?;

        info!(
            "Booking {} approval now {} after {} by {}",
            booking_id, approval.status, decision, approver_id
        );

        self.audit
            .record(
                ACTION_DECIDE,
                ENTITY_APPROVAL_TASK,
                task.id,
                Some(&task_before),
                Some(&task),
                Some(approver_id),
            )
            .await;
        self.announce(&booking_before, &booking, event, approver_id).await;

        Ok(ApprovalOutcome {
            booking,
            approval,
            task,
        })
    }

    /// Decide a pending task in place of its assignee
    #[instrument(skip(self, reason))]
    pub async fn override_task(
        &self,
        task_id: Uuid,
        actor_id: ActorId,
        decision: Decision,
        reason: Option<String>,
    ) -> AppResult<ApprovalOutcome> {
        info!("Actor {} overrides task {} with {}", actor_id, task_id, decision);

        let mut tx = self.store.begin().await?;

        let target = tx
            .find_task(task_id)
            .await?
            .ok_or(AppError::TaskNotFound(task_id))?;
        let mut booking = tx
            .find_booking(target.booking_id)
            .await?
            .ok_or(AppError::BookingNotFound(target.booking_id))?;
        booking.ensure_status(&[BookingStatus::Pending], "override approvals of")?;
        let booking_before = booking.clone();

        if !target.is_pending() {
            return Err(AppError::InvalidStateTransition(format!(
                "approval task {} is already {}",
                task_id, target.status
            )));
        }

        let mut tasks = tx.find_tasks(booking.id).await?;
        let senior = tasks.iter().any(|t| {
            t.scope == target.scope && t.approver_id == actor_id && t.level < target.level
        });
        if !senior
            && !self
                .authorization
                .has_capability(actor_id, Capability::OverrideApproval)
                .await?
        {
            warn!("Actor {} may not override task {}", actor_id, task_id);
            return Err(AppError::Forbidden(format!(
                "actor {} is neither senior to the assignee of task {} nor allowed to override",
                actor_id, task_id
            )));
        }

        let index = tasks
            .iter()
            .position(|t| t.id == task_id)
            .ok_or(AppError::TaskNotFound(task_id))?;
        tasks[index].apply_override(actor_id, decision, reason);
        tx.update_task(&tasks[index]).await?;

        let mut lines = tx.find_lines(booking.id).await?;
        let task = tasks[index].clone();
        let (approval, event) = self
            .conclude(&mut tx, &mut booking, &mut lines, &tasks, &task)
            .await?;

        tx.commit().await?;

        info!(
            "Booking {} approval now {} after override by {}",
            booking.id, approval.status, actor_id
        );

        self.audit
            .record(
                ACTION_OVERRIDE,
                ENTITY_APPROVAL_TASK,
                task.id,
                Some(&target),
                Some(&task),
                Some(actor_id),
            )
            .await;
        self.announce(&booking_before, &booking, event, actor_id).await;

        Ok(ApprovalOutcome {
            booking,
            approval,
            task,
        })
    }

    /// Position of the approver's pending task in `scope`
    fn match_task(
        tasks: &[ApprovalTask],
        booking_id: Uuid,
        scope: ApprovalScope,
        approver_id: ActorId,
    ) -> AppResult<usize> {
        let mut held = tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.scope == scope && t.approver_id == approver_id)
            .peekable();

        if held.peek().is_none() {
            warn!("Approver {} holds no {} task", approver_id, scope);
            return Err(AppError::Forbidden(format!(
                "approver {} holds no {} approval on booking {}",
                approver_id, scope, booking_id
            )));
        }

        held.find(|(_, t)| t.is_pending())
            .map(|(i, _)| i)
            .ok_or_else(|| {
                AppError::InvalidStateTransition(format!(
                    "approver {} has already decided {} on booking {}",
                    approver_id, scope, booking_id
                ))
            })
    }

    /// Roll the tasks up after `decided` changed and settle the booking
    async fn conclude<T: BookingTx>(
        &self,
        tx: &mut T,
        booking: &mut Booking,
        lines: &mut [BookingLine],
        tasks: &[ApprovalTask],
        decided: &ApprovalTask,
    ) -> AppResult<(ApprovalAggregate, Option<NotificationEvent>)> {
        let mut approval = tx
            .find_approval(booking.id)
            .await?
            .unwrap_or_else(|| ApprovalAggregate::new(booking.id));

        if decided.scope == ApprovalScope::Global {
            approval.global_decided_by = Some(decided.overridden_by.unwrap_or(decided.approver_id));
            approval.global_decided_at = decided.decided_at;
            approval.global_reason = decided.notes.clone();
        }

        approval.recompute(tasks);
        tx.save_approval(&approval).await?;

        let reason = decided.notes.as_deref();
        let event = self.settle(tx, booking, lines, approval.status, reason).await?;
        Ok((approval, event))
    }

    /// Move a pending booking along once its approval is final
    async fn settle<T: BookingTx>(
        &self,
        tx: &mut T,
        booking: &mut Booking,
        lines: &mut [BookingLine],
        status: ApprovalStatus,
        reason: Option<&str>,
    ) -> AppResult<Option<NotificationEvent>> {
        if booking.status != BookingStatus::Pending {
            return Ok(None);
        }

        match status {
            ApprovalStatus::Rejected => {
                booking.transition_to(BookingStatus::Rejected)?;
                booking.rejection_reason = reason.map(str::to_string);
                self.quota.release(tx, booking).await?;
                tx.update_booking(booking).await?;
                info!("Booking {} rejected", booking.id);
                Ok(Some(NotificationEvent::Rejected))
            }
            ApprovalStatus::Approved => {
                booking.transition_to(BookingStatus::Approved)?;
                for line in lines.iter_mut().filter(|l| l.quantity_approved.is_none()) {
                    line.quantity_approved = Some(line.quantity_requested);
                    tx.update_line(line).await?;
                }
                tx.update_booking(booking).await?;
                info!("Booking {} approved", booking.id);
                Ok(Some(NotificationEvent::Approved))
            }
            ApprovalStatus::Pending | ApprovalStatus::PartiallyApproved => Ok(None),
        }
    }

    /// Audit and notify a committed booking status change
    pub(crate) async fn announce(
        &self,
        before: &Booking,
        after: &Booking,
        event: Option<NotificationEvent>,
        actor_id: ActorId,
    ) {
        let action = match event {
            Some(NotificationEvent::Approved) => ACTION_APPROVE,
            Some(NotificationEvent::Rejected) => ACTION_REJECT,
            _ => return,
        };
        let Some(event) = event else {
            return;
        };

        self.audit
            .record(
                action,
                ENTITY_BOOKING,
                after.id,
                Some(before),
                Some(after),
                Some(actor_id),
            )
            .await;
        self.notifier
            .dispatch(Notification::new(
                event,
                after.id,
                after.requester_id,
                after.title.clone(),
            ))
            .await;
    }
}
