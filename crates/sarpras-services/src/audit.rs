//! Audit helper shared by the services

use sarpras_core::{models::AuditEntry, traits::AuditSink, ActorId};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Builds audit entries and hands them to the sink after a commit
#[derive(Clone)]
pub(crate) struct AuditTrail {
    sink: Arc<dyn AuditSink>,
}

impl AuditTrail {
    pub(crate) fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Record one committed change; `actor` is `None` for the sweep
    pub(crate) async fn record<T: Serialize + Sync>(
        &self,
        action: &str,
        entity_type: &str,
        entity_id: Uuid,
        before: Option<&T>,
        after: Option<&T>,
        actor: Option<ActorId>,
    ) {
        let mut builder = AuditEntry::builder()
            .action(action)
            .entity(entity_type, entity_id);
        if let Some(before) = before {
            builder = builder.before(before);
        }
        if let Some(after) = after {
            builder = builder.after(after);
        }
        if let Some(actor) = actor {
            builder = builder.actor(actor);
        }

        match builder.build() {
            Ok(entry) => self.sink.record(entry).await,
            Err(e) => warn!("Dropping audit entry for {}: {}", action, e),
        }
    }
}
