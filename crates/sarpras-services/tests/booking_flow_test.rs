//! Integration tests for booking creation, editing and cancellation
//!
//! Run against the in-memory store; see `common` for the fixture.

mod common;

#[cfg(test)]
mod tests {
    use crate::common::*;
    use sarpras_core::{
        models::{
            ApprovalScope, ApprovalStatus, ApprovalTask, BookingStatus, Decision, LoanType,
            NotificationEvent, ScopeStatus,
        },
        AppError, BookingConfig,
    };
    use sarpras_services::LineRequest;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_create_seeds_approvals_and_notifies() {
        let fx = Fixture::new().await;
        let requester = Uuid::new_v4();

        let details = fx
            .engine
            .lifecycle
            .create(requester, venue_request(fx.venue, 8, 10))
            .await
            .unwrap();

        assert_eq!(details.booking.status, BookingStatus::Pending);
        assert_eq!(details.approval.status, ApprovalStatus::Pending);

        let tasks = fx.store.tasks(details.booking.id).await;
        assert_eq!(tasks.len(), 2);
        assert!(tasks.iter().any(|t| t.scope == ApprovalScope::Global && t.approver_id == fx.admin));
        assert!(tasks
            .iter()
            .any(|t| t.scope == ApprovalScope::Venue(fx.venue) && t.approver_id == fx.venue_keeper));

        assert_eq!(fx.quota_count(requester).await, 1);
        assert_eq!(fx.audit.actions().await, vec!["booking.create".to_string()]);

        let sent = fx.notifications.sent().await;
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|n| n.event == NotificationEvent::Submitted));
    }

    #[tokio::test]
    async fn test_venue_overlap_with_approved_booking_conflicts() {
        let fx = Fixture::new().await;
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        let existing = fx
            .engine
            .lifecycle
            .create(first, venue_request(fx.venue, 11, 13))
            .await
            .unwrap();
        fx.approve_all(existing.booking.id).await;

        let err = fx
            .engine
            .lifecycle
            .create(second, venue_request(fx.venue, 10, 12))
            .await
            .unwrap_err();

        match err {
            AppError::Conflict {
                resource,
                claimant,
                ..
            } => {
                assert_eq!(resource, "Aula Utama");
                assert_eq!(claimant, Some(first));
            }
            other => panic!("expected conflict, got {:?}", other),
        }

        // Nothing of the failed attempt was kept
        assert!(fx.store.bookings_of(second).await.is_empty());
        assert_eq!(fx.quota_count(second).await, 0);
    }

    #[tokio::test]
    async fn test_touching_windows_do_not_conflict() {
        let fx = Fixture::new().await;

        fx.engine
            .lifecycle
            .create(Uuid::new_v4(), venue_request(fx.venue, 10, 12))
            .await
            .unwrap();
        fx.engine
            .lifecycle
            .create(Uuid::new_v4(), venue_request(fx.venue, 12, 14))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unavailable_venue_conflicts() {
        let fx = Fixture::new().await;

        let err = fx
            .engine
            .lifecycle
            .create(Uuid::new_v4(), venue_request(fx.closed_venue, 8, 9))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_custom_location_is_exclusive() {
        let fx = Fixture::new().await;

        fx.engine
            .lifecycle
            .create(Uuid::new_v4(), location_request("Lapangan Basket", 8, 10))
            .await
            .unwrap();

        let err = fx
            .engine
            .lifecycle
            .create(Uuid::new_v4(), location_request(" Lapangan Basket ", 9, 11))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict { .. }));

        fx.engine
            .lifecycle
            .create(Uuid::new_v4(), location_request("Lapangan Voli", 9, 11))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_quota_blocks_fourth_booking_until_cancel() {
        let fx = Fixture::new().await;
        let requester = Uuid::new_v4();

        let mut created = Vec::new();
        for hour in [8, 10, 12] {
            let details = fx
                .engine
                .lifecycle
                .create(requester, location_request("Ruang Rapat", hour, hour + 1))
                .await
                .unwrap();
            created.push(details.booking.id);
        }

        let err = fx
            .engine
            .lifecycle
            .create(requester, location_request("Ruang Rapat", 14, 15))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::QuotaExceeded { active: 3, max: 3, .. }));

        fx.engine
            .lifecycle
            .cancel(requester, created[0], Some("jadwal bentrok".into()))
            .await
            .unwrap();

        fx.engine
            .lifecycle
            .create(requester, location_request("Ruang Rapat", 14, 15))
            .await
            .unwrap();

        assert_eq!(fx.quota_count(requester).await, 3);
        assert_eq!(fx.active_count(requester).await, 3);
    }

    #[tokio::test]
    async fn test_configured_quota_limit() {
        let fx = Fixture::with_config(BookingConfig {
            max_active_bookings: 1,
            ..BookingConfig::default()
        })
        .await;
        let requester = Uuid::new_v4();

        fx.engine
            .lifecycle
            .create(requester, location_request("Taman", 8, 9))
            .await
            .unwrap();
        let err = fx
            .engine
            .lifecycle
            .create(requester, location_request("Taman", 10, 11))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::QuotaExceeded { max: 1, .. }));
    }

    #[tokio::test]
    async fn test_raised_quota_reaches_existing_requester() {
        let fx = Fixture::new().await;
        let requester = Uuid::new_v4();

        let first = fx
            .engine
            .lifecycle
            .create(requester, location_request("Taman", 1, 2))
            .await
            .unwrap();
        fx.engine
            .lifecycle
            .cancel(requester, first.booking.id, None)
            .await
            .unwrap();

        let engine = fx.engine_with(BookingConfig {
            max_active_bookings: 5,
            ..BookingConfig::default()
        });
        for hour in 0..5 {
            engine
                .lifecycle
                .create(requester, location_request("Taman", 3 + hour * 2, 4 + hour * 2))
                .await
                .unwrap();
        }
        let err = engine
            .lifecycle
            .create(requester, location_request("Taman", 20, 21))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::QuotaExceeded { active: 5, max: 5, .. }));
        assert_eq!(fx.quota_count(requester).await, 5);
    }

    #[tokio::test]
    async fn test_cancel_twice_is_rejected() {
        let fx = Fixture::new().await;
        let requester = Uuid::new_v4();
        let details = fx
            .engine
            .lifecycle
            .create(requester, venue_request(fx.venue, 8, 9))
            .await
            .unwrap();

        let cancelled = fx
            .engine
            .lifecycle
            .cancel(requester, details.booking.id, None)
            .await
            .unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);
        assert_eq!(cancelled.cancelled_by, Some(requester));
        assert!(cancelled.quota_released);

        let err = fx
            .engine
            .lifecycle
            .cancel(requester, details.booking.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidStateTransition(_)));
        assert_eq!(fx.quota_count(requester).await, 0);
    }

    #[tokio::test]
    async fn test_cancel_by_stranger_is_forbidden() {
        let fx = Fixture::new().await;
        let details = fx
            .engine
            .lifecycle
            .create(Uuid::new_v4(), venue_request(fx.venue, 8, 9))
            .await
            .unwrap();

        let err = fx
            .engine
            .lifecycle
            .cancel(Uuid::new_v4(), details.booking.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        fx.engine
            .lifecycle
            .cancel(fx.officer, details.booking.id, Some("ruangan dipakai rektorat".into()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_pooled_overbooking_is_refused() {
        let fx = Fixture::new().await;

        fx.engine
            .lifecycle
            .create(Uuid::new_v4(), equipment_request(&[(fx.chairs, 30)], 8, 12))
            .await
            .unwrap();

        let err = fx
            .engine
            .lifecycle
            .create(Uuid::new_v4(), equipment_request(&[(fx.chairs, 30)], 10, 14))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict { .. }));

        // Outside the window the full stock is free again
        fx.engine
            .lifecycle
            .create(Uuid::new_v4(), equipment_request(&[(fx.chairs, 50)], 12, 14))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_pending_rivals_share_conflict_group() {
        let fx = Fixture::new().await;

        let first = fx
            .engine
            .lifecycle
            .create(Uuid::new_v4(), equipment_request(&[(fx.chairs, 20)], 8, 12))
            .await
            .unwrap();
        assert!(first.booking.conflict_group.is_none());

        let second = fx
            .engine
            .lifecycle
            .create(Uuid::new_v4(), equipment_request(&[(fx.chairs, 20)], 10, 14))
            .await
            .unwrap();
        let token = second.booking.conflict_group.expect("rivals are linked");

        let third = fx
            .engine
            .lifecycle
            .create(Uuid::new_v4(), equipment_request(&[(fx.chairs, 5)], 11, 13))
            .await
            .unwrap();

        assert_eq!(
            fx.store.booking(first.booking.id).await.unwrap().conflict_group,
            Some(token)
        );
        assert_eq!(third.booking.conflict_group, Some(token));
    }

    #[tokio::test]
    async fn test_update_rechecks_conflicts_excluding_itself() {
        let fx = Fixture::new().await;
        let requester = Uuid::new_v4();
        let details = fx
            .engine
            .lifecycle
            .create(requester, venue_request(fx.venue, 8, 10))
            .await
            .unwrap();
        fx.engine
            .lifecycle
            .create(Uuid::new_v4(), venue_request(fx.venue, 12, 14))
            .await
            .unwrap();

        let mut request = venue_request(fx.venue, 8, 11);
        request.title = "Rapat Kerja".to_string();
        let updated = fx
            .engine
            .lifecycle
            .update(requester, details.booking.id, request)
            .await
            .unwrap();
        assert_eq!(updated.booking.title, "Rapat Kerja");
        assert_eq!(updated.booking.end_at, at(11));

        let err = fx
            .engine
            .lifecycle
            .update(requester, details.booking.id, venue_request(fx.venue, 8, 13))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict { .. }));

        let err = fx
            .engine
            .lifecycle
            .update(Uuid::new_v4(), details.booking.id, venue_request(fx.venue, 8, 9))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_update_pending_syncs_tasks() {
        let fx = Fixture::new().await;
        let requester = Uuid::new_v4();
        let details = fx
            .engine
            .lifecycle
            .create(requester, equipment_request(&[(fx.projector, 1)], 8, 10))
            .await
            .unwrap();
        let id = details.booking.id;

        fx.engine
            .approvals
            .decide(id, ApprovalScope::Global, fx.admin, Decision::Approve, None, None)
            .await
            .unwrap();

        let mut request = equipment_request(&[(fx.chairs, 10)], 8, 10);
        request.lines.push(LineRequest {
            equipment_id: fx.projector,
            quantity: 2,
            notes: Some("HDMI".into()),
        });
        let updated = fx.engine.lifecycle.update(requester, id, request).await.unwrap();

        let projector_line = updated
            .lines
            .iter()
            .find(|l| l.equipment_id == fx.projector)
            .unwrap();
        assert_eq!(projector_line.id, details.lines[0].id);
        assert_eq!(projector_line.quantity_requested, 2);

        let tasks = fx.store.tasks(id).await;
        assert!(tasks.iter().any(|t| t.scope == ApprovalScope::Equipment(fx.chairs)));
        // Global decision survives the edit
        assert!(tasks
            .iter()
            .any(|t| t.scope == ApprovalScope::Global && !t.is_pending()));

        // Dropping the projector drops its tasks
        fx.engine
            .lifecycle
            .update(requester, id, equipment_request(&[(fx.chairs, 10)], 8, 10))
            .await
            .unwrap();
        let tasks = fx.store.tasks(id).await;
        assert!(!tasks.iter().any(|t| t.scope == ApprovalScope::Equipment(fx.projector)));
        assert_eq!(fx.store.lines(id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_growing_line_reopens_its_approval() {
        let fx = Fixture::new().await;
        let requester = Uuid::new_v4();
        let id = fx
            .engine
            .lifecycle
            .create(
                requester,
                equipment_request(&[(fx.chairs, 10), (fx.projector, 1)], 8, 10),
            )
            .await
            .unwrap()
            .booking
            .id;
        let chairs = ApprovalScope::Equipment(fx.chairs);
        let chairs_decided = |tasks: &[ApprovalTask]| {
            tasks.iter().any(|t| t.scope == chairs && !t.is_pending())
        };

        fx.engine
            .approvals
            .decide(id, chairs, fx.warehouse, Decision::Approve, None, Some(3))
            .await
            .unwrap();

        // Asking for less keeps the decision
        fx.engine
            .lifecycle
            .update(
                requester,
                id,
                equipment_request(&[(fx.chairs, 5), (fx.projector, 1)], 8, 10),
            )
            .await
            .unwrap();
        assert!(chairs_decided(&fx.store.tasks(id).await));

        // Asking for more sends it back to the approver
        let updated = fx
            .engine
            .lifecycle
            .update(
                requester,
                id,
                equipment_request(&[(fx.chairs, 45), (fx.projector, 1)], 8, 10),
            )
            .await
            .unwrap();
        assert!(!chairs_decided(&fx.store.tasks(id).await));
        assert_eq!(updated.approval.resource_status(chairs), Some(ScopeStatus::Pending));
        let line = updated.lines.iter().find(|l| l.equipment_id == fx.chairs).unwrap();
        assert_eq!(line.quantity_approved, None);

        fx.engine
            .approvals
            .decide(id, ApprovalScope::Global, fx.admin, Decision::Approve, None, None)
            .await
            .unwrap();
        assert_eq!(
            fx.store.booking(id).await.unwrap().status,
            BookingStatus::Pending
        );

        fx.approve_all(id).await;
        let line = fx
            .store
            .lines(id)
            .await
            .into_iter()
            .find(|l| l.equipment_id == fx.chairs)
            .unwrap();
        assert_eq!(line.quantity_approved, Some(45));
    }

    #[tokio::test]
    async fn test_moving_window_reopens_every_decision() {
        let fx = Fixture::new().await;
        let requester = Uuid::new_v4();
        let id = fx
            .engine
            .lifecycle
            .create(requester, equipment_request(&[(fx.projector, 1)], 8, 10))
            .await
            .unwrap()
            .booking
            .id;

        fx.engine
            .approvals
            .decide(id, ApprovalScope::Global, fx.admin, Decision::Approve, None, None)
            .await
            .unwrap();
        fx.engine
            .approvals
            .decide(id, projector_scope(&fx), fx.lab_head, Decision::Approve, None, None)
            .await
            .unwrap();

        let moved = fx
            .engine
            .lifecycle
            .update(requester, id, equipment_request(&[(fx.projector, 1)], 12, 14))
            .await
            .unwrap();
        assert!(fx.store.tasks(id).await.iter().all(|t| t.is_pending()));
        assert_eq!(moved.approval.global_status, ScopeStatus::Pending);
        assert_eq!(moved.approval.global_decided_by, None);
        // Overall status never moves backwards
        assert_eq!(moved.approval.status, ApprovalStatus::PartiallyApproved);
        assert_eq!(moved.booking.status, BookingStatus::Pending);

        fx.approve_all(id).await;
    }

    #[tokio::test]
    async fn test_update_approved_keeps_resources() {
        let fx = Fixture::new().await;
        let requester = Uuid::new_v4();
        let details = fx
            .approved_equipment_booking(requester, &[(fx.chairs, 10)], 8, 10)
            .await;
        let id = details.booking.id;

        // Same resources, new window
        let moved = fx
            .engine
            .lifecycle
            .update(requester, id, equipment_request(&[(fx.chairs, 10)], 9, 11))
            .await
            .unwrap();
        assert_eq!(moved.booking.status, BookingStatus::Approved);
        assert_eq!(moved.lines[0].quantity_approved, Some(10));

        // Requests beyond the granted quantity are refused, smaller ones accepted
        let err = fx
            .engine
            .lifecycle
            .update(requester, id, equipment_request(&[(fx.chairs, 12)], 9, 11))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        let trimmed = fx
            .engine
            .lifecycle
            .update(requester, id, equipment_request(&[(fx.chairs, 8)], 9, 11))
            .await
            .unwrap();
        assert_eq!(trimmed.lines[0].quantity_requested, 8);
        assert_eq!(trimmed.lines[0].quantity_approved, Some(8));

        let err = fx
            .engine
            .lifecycle
            .update(
                requester,
                id,
                equipment_request(&[(fx.chairs, 10), (fx.projector, 1)], 9, 11),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidStateTransition(_)));
    }

    #[tokio::test]
    async fn test_delete_requires_capability_and_pending() {
        let fx = Fixture::new().await;
        let requester = Uuid::new_v4();
        let details = fx
            .engine
            .lifecycle
            .create(requester, venue_request(fx.venue, 8, 9))
            .await
            .unwrap();

        let err = fx
            .engine
            .lifecycle
            .delete(requester, details.booking.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        fx.engine
            .lifecycle
            .delete(fx.officer, details.booking.id)
            .await
            .unwrap();
        assert!(fx.store.booking(details.booking.id).await.is_none());
        assert!(fx.store.tasks(details.booking.id).await.is_empty());
        assert_eq!(fx.quota_count(requester).await, 0);

        let approved = fx
            .approved_equipment_booking(requester, &[(fx.chairs, 1)], 8, 9)
            .await;
        let err = fx
            .engine
            .lifecycle
            .delete(fx.officer, approved.booking.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidStateTransition(_)));
    }

    #[tokio::test]
    async fn test_invalid_request_persists_nothing() {
        let fx = Fixture::new().await;
        let requester = Uuid::new_v4();

        let err = fx
            .engine
            .lifecycle
            .create(requester, base_request(LoanType::Combined, 8, 9))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = fx
            .engine
            .lifecycle
            .create(requester, venue_request(fx.venue, 10, 9))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        assert!(fx.store.bookings_of(requester).await.is_empty());
        assert!(fx.store.quota(requester).await.is_none());
    }
}
