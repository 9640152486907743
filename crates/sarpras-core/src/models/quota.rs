//! Per-requester active booking quota

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Count of a requester's active bookings and the configured cap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    pub requester_id: Uuid,
    pub active_count: i32,
    pub max_active: i32,
    pub updated_at: DateTime<Utc>,
}

impl Quota {
    /// Create an empty quota with the given cap
    pub fn new(requester_id: Uuid, max_active: i32) -> Self {
        Self {
            requester_id,
            active_count: 0,
            max_active,
            updated_at: Utc::now(),
        }
    }

    /// Check if one more booking fits under the cap
    #[inline]
    pub fn has_capacity(&self) -> bool {
        self.active_count < self.max_active
    }

    pub fn increment(&mut self) {
        self.active_count += 1;
        self.updated_at = Utc::now();
    }

    /// Never goes below zero
    pub fn decrement(&mut self) {
        self.active_count = (self.active_count - 1).max(0);
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity() {
        let mut quota = Quota::new(Uuid::new_v4(), 2);
        assert!(quota.has_capacity());
        quota.increment();
        quota.increment();
        assert!(!quota.has_capacity());
        quota.decrement();
        assert!(quota.has_capacity());
    }

    #[test]
    fn test_decrement_saturates() {
        let mut quota = Quota::new(Uuid::new_v4(), 3);
        quota.decrement();
        assert_eq!(quota.active_count, 0);
    }
}
