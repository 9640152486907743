//! Approval models
//!
//! Every booking needs one global approval plus one approval per distinct
//! equipment and venue it references. Each required decision is an
//! [`ApprovalTask`]; the [`ApprovalAggregate`] rolls them up into the overall
//! status that gates the booking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// What an approval task is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "resource_id", rename_all = "snake_case")]
pub enum ApprovalScope {
    /// The booking as a whole
    Global,
    /// One equipment referenced by a line
    Equipment(Uuid),
    /// The requested venue
    Venue(Uuid),
}

impl ApprovalScope {
    /// Storage discriminant
    pub fn kind(&self) -> &'static str {
        match self {
            ApprovalScope::Global => "global",
            ApprovalScope::Equipment(_) => "equipment",
            ApprovalScope::Venue(_) => "venue",
        }
    }

    /// Referenced equipment or venue
    pub fn resource_id(&self) -> Option<Uuid> {
        match self {
            ApprovalScope::Global => None,
            ApprovalScope::Equipment(id) | ApprovalScope::Venue(id) => Some(*id),
        }
    }

    /// Rebuild a scope from its storage columns
    pub fn from_parts(kind: &str, resource_id: Option<Uuid>) -> Option<Self> {
        match (kind, resource_id) {
            ("global", None) => Some(ApprovalScope::Global),
            ("equipment", Some(id)) => Some(ApprovalScope::Equipment(id)),
            ("venue", Some(id)) => Some(ApprovalScope::Venue(id)),
            _ => None,
        }
    }
}

impl fmt::Display for ApprovalScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApprovalScope::Global => write!(f, "global"),
            ApprovalScope::Equipment(id) => write!(f, "equipment:{}", id),
            ApprovalScope::Venue(id) => write!(f, "venue:{}", id),
        }
    }
}

/// An approver's verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Approve => write!(f, "approve"),
            Decision::Reject => write!(f, "reject"),
        }
    }
}

impl Decision {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "approve" => Some(Decision::Approve),
            "reject" => Some(Decision::Reject),
            _ => None,
        }
    }
}

/// Approval task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
    /// Decided by a more senior approver in place of the assignee
    Overridden,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Approved => write!(f, "approved"),
            TaskStatus::Rejected => write!(f, "rejected"),
            TaskStatus::Overridden => write!(f, "overridden"),
        }
    }
}

impl TaskStatus {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(TaskStatus::Pending),
            "approved" => Some(TaskStatus::Approved),
            "rejected" => Some(TaskStatus::Rejected),
            "overridden" => Some(TaskStatus::Overridden),
            _ => None,
        }
    }
}

/// One required approval decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalTask {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub approver_id: Uuid,
    pub scope: ApprovalScope,
    /// Hierarchy level; lower is more senior
    pub level: i32,
    pub status: TaskStatus,
    pub decided_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub overridden_by: Option<Uuid>,
    pub overridden_at: Option<DateTime<Utc>>,
    /// Verdict applied by the override, when status is `Overridden`
    pub override_decision: Option<Decision>,
    pub created_at: DateTime<Utc>,
}

impl ApprovalTask {
    /// Create a new pending task
    pub fn new(booking_id: Uuid, approver_id: Uuid, scope: ApprovalScope, level: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            booking_id,
            approver_id,
            scope,
            level,
            status: TaskStatus::Pending,
            decided_at: None,
            notes: None,
            overridden_by: None,
            overridden_at: None,
            override_decision: None,
            created_at: Utc::now(),
        }
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        self.status == TaskStatus::Pending
    }

    /// Verdict that counts for the rollup, whoever gave it
    pub fn effective_decision(&self) -> Option<Decision> {
        match self.status {
            TaskStatus::Pending => None,
            TaskStatus::Approved => Some(Decision::Approve),
            TaskStatus::Rejected => Some(Decision::Reject),
            TaskStatus::Overridden => self.override_decision,
        }
    }

    /// Record the assignee's own decision
    pub fn decide(&mut self, decision: Decision, notes: Option<String>) {
        self.status = match decision {
            Decision::Approve => TaskStatus::Approved,
            Decision::Reject => TaskStatus::Rejected,
        };
        self.notes = notes;
        self.decided_at = Some(Utc::now());
    }

    /// Record a decision taken by `actor` in place of the assignee
    pub fn apply_override(&mut self, actor: Uuid, decision: Decision, reason: Option<String>) {
        let now = Utc::now();
        self.status = TaskStatus::Overridden;
        self.override_decision = Some(decision);
        self.overridden_by = Some(actor);
        self.overridden_at = Some(now);
        self.decided_at = Some(now);
        self.notes = reason;
    }

    /// Put a decided task back to pending, dropping its verdict.
    ///
    /// Returns `false` when the task was still pending.
    pub fn reopen(&mut self) -> bool {
        if self.is_pending() {
            return false;
        }
        self.status = TaskStatus::Pending;
        self.decided_at = None;
        self.notes = None;
        self.overridden_by = None;
        self.overridden_at = None;
        self.override_decision = None;
        true
    }
}

/// Overall approval status of a booking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    #[default]
    Pending,
    Approved,
    PartiallyApproved,
    Rejected,
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApprovalStatus::Pending => write!(f, "pending"),
            ApprovalStatus::Approved => write!(f, "approved"),
            ApprovalStatus::PartiallyApproved => write!(f, "partially_approved"),
            ApprovalStatus::Rejected => write!(f, "rejected"),
        }
    }
}

impl ApprovalStatus {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(ApprovalStatus::Pending),
            "approved" => Some(ApprovalStatus::Approved),
            "partially_approved" => Some(ApprovalStatus::PartiallyApproved),
            "rejected" => Some(ApprovalStatus::Rejected),
            _ => None,
        }
    }

    /// Approved and rejected are final
    pub fn is_final(&self) -> bool {
        matches!(self, ApprovalStatus::Approved | ApprovalStatus::Rejected)
    }

    /// Position in the monotonic order pending < partially approved < final
    fn rank(&self) -> u8 {
        match self {
            ApprovalStatus::Pending => 0,
            ApprovalStatus::PartiallyApproved => 1,
            ApprovalStatus::Approved | ApprovalStatus::Rejected => 2,
        }
    }
}

/// Rolled-up status of one scope (global, or one resource)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScopeStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for ScopeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeStatus::Pending => write!(f, "pending"),
            ScopeStatus::Approved => write!(f, "approved"),
            ScopeStatus::Rejected => write!(f, "rejected"),
        }
    }
}

impl ScopeStatus {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(ScopeStatus::Pending),
            "approved" => Some(ScopeStatus::Approved),
            "rejected" => Some(ScopeStatus::Rejected),
            _ => None,
        }
    }

    /// A scope is rejected by any rejecting task and approved once all tasks approve
    fn rollup<'a>(tasks: impl Iterator<Item = &'a ApprovalTask>) -> Self {
        let mut all_approved = true;
        for task in tasks {
            match task.effective_decision() {
                Some(Decision::Reject) => return ScopeStatus::Rejected,
                Some(Decision::Approve) => {}
                None => all_approved = false,
            }
        }
        if all_approved {
            ScopeStatus::Approved
        } else {
            ScopeStatus::Pending
        }
    }
}

/// Summary of the decisions about one equipment or venue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceApproval {
    pub scope: ApprovalScope,
    pub status: ScopeStatus,
}

/// One-per-booking approval rollup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalAggregate {
    pub booking_id: Uuid,
    pub status: ApprovalStatus,
    pub global_status: ScopeStatus,
    pub global_decided_by: Option<Uuid>,
    pub global_decided_at: Option<DateTime<Utc>>,
    pub global_reason: Option<String>,
    pub resources: Vec<ResourceApproval>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalAggregate {
    /// Create a fresh pending aggregate
    pub fn new(booking_id: Uuid) -> Self {
        Self {
            booking_id,
            status: ApprovalStatus::Pending,
            global_status: ScopeStatus::Pending,
            global_decided_by: None,
            global_decided_at: None,
            global_reason: None,
            resources: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Recompute every rollup from the booking's tasks.
    ///
    /// Overall status is rejected when any scope is rejected, approved when
    /// every scope is approved, partially approved once at least one task has
    /// an approving verdict, pending otherwise. The overall status never moves
    /// backwards in the order pending < partially approved < approved/rejected.
    pub fn recompute(&mut self, tasks: &[ApprovalTask]) -> ApprovalStatus {
        let mut by_scope: BTreeMap<ApprovalScope, Vec<&ApprovalTask>> = BTreeMap::new();
        for task in tasks {
            by_scope.entry(task.scope).or_default().push(task);
        }

        self.global_status = by_scope
            .get(&ApprovalScope::Global)
            .map(|t| ScopeStatus::rollup(t.iter().copied()))
            .unwrap_or(ScopeStatus::Pending);

        self.resources = by_scope
            .iter()
            .filter(|(scope, _)| **scope != ApprovalScope::Global)
            .map(|(scope, t)| ResourceApproval {
                scope: *scope,
                status: ScopeStatus::rollup(t.iter().copied()),
            })
            .collect();

        let scopes = std::iter::once(self.global_status)
            .chain(self.resources.iter().map(|r| r.status));
        let mut any_pending = false;
        let mut any_rejected = false;
        for status in scopes {
            match status {
                ScopeStatus::Rejected => any_rejected = true,
                ScopeStatus::Pending => any_pending = true,
                ScopeStatus::Approved => {}
            }
        }
        let any_decided = tasks.iter().any(|t| t.effective_decision().is_some());

        let computed = if any_rejected {
            ApprovalStatus::Rejected
        } else if !any_pending {
            ApprovalStatus::Approved
        } else if any_decided {
            ApprovalStatus::PartiallyApproved
        } else {
            ApprovalStatus::Pending
        };

        if !self.status.is_final() && computed.rank() >= self.status.rank() {
            self.status = computed;
        }
        self.updated_at = Utc::now();
        self.status
    }

    /// Status of one resource scope, if the booking references it
    pub fn resource_status(&self, scope: ApprovalScope) -> Option<ScopeStatus> {
        self.resources
            .iter()
            .find(|r| r.scope == scope)
            .map(|r| r.status)
    }
}
