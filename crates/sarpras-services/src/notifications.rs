//! Notification sink writing to the log

use async_trait::async_trait;
use sarpras_core::{models::Notification, traits::NotificationSink};
use tracing::info;

/// Logs every notification at info level.
///
/// Used by the sweep binary where no delivery channel is wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotificationSink;

#[async_trait]
impl NotificationSink for TracingNotificationSink {
    async fn dispatch(&self, notification: Notification) {
        info!(
            event = %notification.event,
            booking_id = %notification.booking_id,
            recipient_id = %notification.recipient_id,
            "Notify: {}",
            notification.title
        );
    }
}
