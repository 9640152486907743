//! Audit entry model
//!
//! Each committed state change is recorded once with explicit before/after
//! snapshots of the affected entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Audit entry handed to the audit sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Action performed (e.g. "booking.create", "approval.override")
    pub action: String,

    /// Entity type affected (e.g. "booking", "approval_task")
    pub entity_type: String,

    /// Entity ID
    pub entity_id: Uuid,

    /// Snapshot before the change, absent for creations
    pub before: Option<JsonValue>,

    /// Snapshot after the change, absent for deletions
    pub after: Option<JsonValue>,

    /// Who performed the action; `None` for system sweeps
    pub actor_id: Option<Uuid>,

    /// When the change was committed
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    /// Create a new audit entry builder
    pub fn builder() -> AuditEntryBuilder {
        AuditEntryBuilder::default()
    }
}

/// Builder for audit entries
#[derive(Debug, Default)]
pub struct AuditEntryBuilder {
    action: Option<String>,
    entity_type: Option<String>,
    entity_id: Option<Uuid>,
    before: Option<JsonValue>,
    after: Option<JsonValue>,
    actor_id: Option<Uuid>,
}

impl AuditEntryBuilder {
    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn entity(mut self, entity_type: impl Into<String>, entity_id: Uuid) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id);
        self
    }

    /// Snapshot before the change; serialization failures leave it empty
    pub fn before<T: Serialize>(mut self, value: &T) -> Self {
        self.before = serde_json::to_value(value).ok();
        self
    }

    /// Snapshot after the change; serialization failures leave it empty
    pub fn after<T: Serialize>(mut self, value: &T) -> Self {
        self.after = serde_json::to_value(value).ok();
        self
    }

    pub fn actor(mut self, actor_id: Uuid) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    /// Build the audit entry
    pub fn build(self) -> Result<AuditEntry, &'static str> {
        Ok(AuditEntry {
            action: self.action.ok_or("action is required")?,
            entity_type: self.entity_type.ok_or("entity is required")?,
            entity_id: self.entity_id.ok_or("entity is required")?,
            before: self.before,
            after: self.after,
            actor_id: self.actor_id,
            recorded_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_requires_action_and_entity() {
        assert!(AuditEntry::builder().action("booking.create").build().is_err());
        assert!(AuditEntry::builder().entity("booking", Uuid::nil()).build().is_err());
    }

    #[test]
    fn test_builder_snapshots() {
        let actor = Uuid::new_v4();
        let entry = AuditEntry::builder()
            .action("booking.cancel")
            .entity("booking", Uuid::nil())
            .before(&json!({"status": "pending"}))
            .after(&json!({"status": "cancelled"}))
            .actor(actor)
            .build()
            .unwrap();

        assert_eq!(entry.before, Some(json!({"status": "pending"})));
        assert_eq!(entry.after.unwrap()["status"], "cancelled");
        assert_eq!(entry.actor_id, Some(actor));
    }
}
