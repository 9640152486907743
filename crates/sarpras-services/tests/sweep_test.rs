//! Integration tests for the expiry sweep

mod common;

#[cfg(test)]
mod tests {
    use crate::common::*;
    use chrono::Duration;
    use sarpras_core::models::{BookingStatus, NotificationEvent};
    use uuid::Uuid;

    #[tokio::test]
    async fn test_ended_pending_and_approved_bookings_expire() {
        let fx = Fixture::new().await;
        let requester = Uuid::new_v4();

        let pending = fx
            .engine
            .lifecycle
            .create(requester, venue_request(fx.venue, 8, 10))
            .await
            .unwrap();
        let approved = fx
            .approved_equipment_booking(requester, &[(fx.chairs, 5)], 9, 11)
            .await;
        let later = fx
            .engine
            .lifecycle
            .create(requester, location_request("Kantin", 20, 22))
            .await
            .unwrap();
        assert_eq!(fx.quota_count(requester).await, 3);

        let report = fx.engine.sweeper.sweep(at(12)).await.unwrap();
        let mut expired = report.expired.clone();
        expired.sort();
        let mut expected = vec![pending.booking.id, approved.booking.id];
        expected.sort();
        assert_eq!(expired, expected);

        assert_eq!(
            fx.store.booking(pending.booking.id).await.unwrap().status,
            BookingStatus::Expired
        );
        assert_eq!(
            fx.store.booking(later.booking.id).await.unwrap().status,
            BookingStatus::Pending
        );
        assert_eq!(fx.quota_count(requester).await, 1);
        assert_eq!(fx.active_count(requester).await, 1);
        assert_eq!(
            fx.audit
                .actions()
                .await
                .iter()
                .filter(|a| *a == "booking.expire")
                .count(),
            2
        );

        // A second run finds nothing left to do
        let report = fx.engine.sweeper.sweep(at(12)).await.unwrap();
        assert!(report.is_empty());
        assert_eq!(fx.quota_count(requester).await, 1);
    }

    #[tokio::test]
    async fn test_overdue_pickup_is_reported_once() {
        let fx = Fixture::new().await;
        let requester = Uuid::new_v4();
        let details = fx
            .approved_equipment_booking(requester, &[(fx.projector, 1)], 8, 10)
            .await;
        fx.pick_up_projectors(&details, &fx.projector_units[..1]).await;

        let report = fx.engine.sweeper.sweep(at(11)).await.unwrap();
        assert_eq!(report.overdue, vec![details.booking.id]);
        assert!(report.expired.is_empty());

        let booking = fx.store.booking(details.booking.id).await.unwrap();
        assert_eq!(booking.status, BookingStatus::PickedUp);
        assert_eq!(booking.overdue_notified_at, Some(at(11)));

        let report = fx.engine.sweeper.sweep(at(13)).await.unwrap();
        assert!(report.overdue.is_empty());

        let overdue = fx
            .notifications
            .sent()
            .await
            .into_iter()
            .filter(|n| n.event == NotificationEvent::Overdue)
            .collect::<Vec<_>>();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].recipient_id, requester);
    }

    #[tokio::test]
    async fn test_pickup_reminder_within_lead_time() {
        let fx = Fixture::new().await;
        let requester = Uuid::new_v4();
        let soon = fx
            .approved_equipment_booking(requester, &[(fx.chairs, 5)], 10, 12)
            .await;
        let far = fx
            .approved_equipment_booking(requester, &[(fx.chairs, 5)], 15, 16)
            .await;

        let now = at(10) - Duration::minutes(30);
        let report = fx.engine.sweeper.sweep(now).await.unwrap();
        assert_eq!(report.reminded, vec![soon.booking.id]);

        let report = fx.engine.sweeper.sweep(now + Duration::minutes(5)).await.unwrap();
        assert!(report.reminded.is_empty());

        let reminders = fx
            .notifications
            .sent()
            .await
            .into_iter()
            .filter(|n| n.event == NotificationEvent::PickupDue)
            .map(|n| n.booking_id)
            .collect::<Vec<_>>();
        assert_eq!(reminders, vec![soon.booking.id]);
        assert!(fx
            .store
            .booking(far.booking.id)
            .await
            .unwrap()
            .pickup_reminder_sent_at
            .is_none());
    }

    #[tokio::test]
    async fn test_terminal_bookings_are_left_alone() {
        let fx = Fixture::new().await;
        let requester = Uuid::new_v4();
        let details = fx
            .engine
            .lifecycle
            .create(requester, venue_request(fx.venue, 8, 9))
            .await
            .unwrap();
        fx.engine
            .lifecycle
            .cancel(requester, details.booking.id, None)
            .await
            .unwrap();

        let report = fx.engine.sweeper.sweep(at(23)).await.unwrap();
        assert!(report.is_empty());
        assert_eq!(
            fx.store.booking(details.booking.id).await.unwrap().status,
            BookingStatus::Cancelled
        );
    }
}
