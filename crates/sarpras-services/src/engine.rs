//! Booking engine
//!
//! Wires the services over one store and one set of collaborators.

use sarpras_core::{
    traits::{ApproverDirectory, AuditSink, AuthorizationOracle, BookingStore, InventoryLedger, NotificationSink},
    BookingConfig,
};
use std::sync::Arc;

use crate::allocation_manager::AllocationManager;
use crate::approval_workflow::ApprovalWorkflow;
use crate::booking_lifecycle::BookingLifecycle;
use crate::conflict_detector::ConflictDetector;
use crate::sweep::ExpirySweeper;

/// External systems the engine talks to
#[derive(Clone)]
pub struct Collaborators {
    pub inventory: Arc<dyn InventoryLedger>,
    pub approvers: Arc<dyn ApproverDirectory>,
    pub authorization: Arc<dyn AuthorizationOracle>,
    pub audit: Arc<dyn AuditSink>,
    pub notifications: Arc<dyn NotificationSink>,
}

/// All booking services sharing one store
pub struct BookingEngine<S: BookingStore> {
    pub lifecycle: BookingLifecycle<S>,
    pub approvals: Arc<ApprovalWorkflow<S>>,
    pub allocations: AllocationManager<S>,
    pub sweeper: ExpirySweeper<S>,
}

impl<S: BookingStore> BookingEngine<S> {
    pub fn new(store: Arc<S>, collaborators: Collaborators, config: BookingConfig) -> Self {
        let Collaborators {
            inventory,
            approvers,
            authorization,
            audit,
            notifications,
        } = collaborators;

        let approvals = Arc::new(ApprovalWorkflow::new(
            store.clone(),
            approvers,
            authorization.clone(),
            audit.clone(),
            notifications.clone(),
            &config,
        ));

        let lifecycle = BookingLifecycle::new(
            store.clone(),
            ConflictDetector::new(inventory.clone()),
            approvals.clone(),
            authorization.clone(),
            audit.clone(),
            notifications.clone(),
            &config,
        );

        let allocations =
            AllocationManager::new(store.clone(), inventory, authorization, audit.clone(), &config);

        let sweeper = ExpirySweeper::new(store, audit, notifications, &config);

        Self {
            lifecycle,
            approvals,
            allocations,
            sweeper,
        }
    }
}
