//! Integration tests for the approval workflow

mod common;

#[cfg(test)]
mod tests {
    use crate::common::*;
    use sarpras_core::{
        models::{
            ApprovalScope, ApprovalStatus, BookingStatus, Decision, NotificationEvent, ScopeStatus,
            TaskStatus,
        },
        AppError,
    };
    use uuid::Uuid;

    async fn projector_booking(fx: &Fixture, requester: Uuid, quantity: i32) -> Uuid {
        fx.engine
            .lifecycle
            .create(requester, equipment_request(&[(fx.projector, quantity)], 8, 10))
            .await
            .unwrap()
            .booking
            .id
    }

    #[tokio::test]
    async fn test_specific_rejection_vetoes_global_approval() {
        let fx = Fixture::new().await;
        let requester = Uuid::new_v4();
        let id = projector_booking(&fx, requester, 2).await;

        let outcome = fx
            .engine
            .approvals
            .decide(id, ApprovalScope::Global, fx.admin, Decision::Approve, None, None)
            .await
            .unwrap();
        assert_eq!(outcome.approval.status, ApprovalStatus::PartiallyApproved);
        assert_eq!(outcome.approval.global_status, ScopeStatus::Approved);
        assert_eq!(outcome.approval.global_decided_by, Some(fx.admin));
        assert_eq!(outcome.booking.status, BookingStatus::Pending);

        let outcome = fx
            .engine
            .approvals
            .decide(
                id,
                projector_scope(&fx),
                fx.lab_head,
                Decision::Reject,
                Some("lensa rusak".into()),
                None,
            )
            .await
            .unwrap();
        assert_eq!(outcome.approval.status, ApprovalStatus::Rejected);
        assert_eq!(outcome.booking.status, BookingStatus::Rejected);
        assert_eq!(outcome.booking.rejection_reason.as_deref(), Some("lensa rusak"));

        assert_eq!(fx.quota_count(requester).await, 0);
        assert_eq!(fx.active_count(requester).await, 0);

        let sent = fx.notifications.sent().await;
        assert!(sent
            .iter()
            .any(|n| n.event == NotificationEvent::Rejected && n.recipient_id == requester));
        assert!(fx.audit.actions().await.contains(&"booking.reject".to_string()));
    }

    #[tokio::test]
    async fn test_full_approval_fills_line_quantities() {
        let fx = Fixture::new().await;
        let requester = Uuid::new_v4();
        let id = projector_booking(&fx, requester, 3).await;

        fx.approve_all(id).await;

        let details = fx.engine.lifecycle.details(id).await.unwrap();
        assert_eq!(details.approval.status, ApprovalStatus::Approved);
        assert_eq!(details.lines[0].quantity_approved, Some(3));
        assert_eq!(
            details.approval.resource_status(projector_scope(&fx)),
            Some(ScopeStatus::Approved)
        );

        let sent = fx.notifications.sent().await;
        assert!(sent
            .iter()
            .any(|n| n.event == NotificationEvent::Approved && n.recipient_id == requester));
    }

    #[tokio::test]
    async fn test_multi_level_scope_waits_for_every_approver() {
        let fx = Fixture::new().await;
        let id = projector_booking(&fx, Uuid::new_v4(), 1).await;

        fx.engine
            .approvals
            .decide(id, ApprovalScope::Global, fx.admin, Decision::Approve, None, None)
            .await
            .unwrap();
        let outcome = fx
            .engine
            .approvals
            .decide(id, projector_scope(&fx), fx.lab_head, Decision::Approve, None, None)
            .await
            .unwrap();
        assert_eq!(outcome.approval.status, ApprovalStatus::PartiallyApproved);
        assert_eq!(outcome.booking.status, BookingStatus::Pending);

        let outcome = fx
            .engine
            .approvals
            .decide(id, projector_scope(&fx), fx.lab_staff, Decision::Approve, None, None)
            .await
            .unwrap();
        assert_eq!(outcome.approval.status, ApprovalStatus::Approved);
        assert_eq!(outcome.booking.status, BookingStatus::Approved);
    }

    #[tokio::test]
    async fn test_deciding_twice_is_rejected() {
        let fx = Fixture::new().await;
        let id = projector_booking(&fx, Uuid::new_v4(), 1).await;

        fx.engine
            .approvals
            .decide(id, ApprovalScope::Global, fx.admin, Decision::Approve, None, None)
            .await
            .unwrap();
        let err = fx
            .engine
            .approvals
            .decide(id, ApprovalScope::Global, fx.admin, Decision::Approve, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidStateTransition(_)));
    }

    #[tokio::test]
    async fn test_decision_requires_matching_task() {
        let fx = Fixture::new().await;
        let id = projector_booking(&fx, Uuid::new_v4(), 1).await;

        let err = fx
            .engine
            .approvals
            .decide(id, ApprovalScope::Global, fx.lab_head, Decision::Approve, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let err = fx
            .engine
            .approvals
            .decide(id, ApprovalScope::Venue(fx.venue), fx.venue_keeper, Decision::Approve, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let err = fx
            .engine
            .approvals
            .decide(Uuid::new_v4(), ApprovalScope::Global, fx.admin, Decision::Approve, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BookingNotFound(_)));
    }

    #[tokio::test]
    async fn test_approved_quantity_trims_line() {
        let fx = Fixture::new().await;
        let id = projector_booking(&fx, Uuid::new_v4(), 3).await;

        let err = fx
            .engine
            .approvals
            .decide(id, projector_scope(&fx), fx.lab_head, Decision::Approve, None, Some(4))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = fx
            .engine
            .approvals
            .decide(id, ApprovalScope::Global, fx.admin, Decision::Approve, None, Some(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        fx.engine
            .approvals
            .decide(id, projector_scope(&fx), fx.lab_head, Decision::Approve, None, Some(1))
            .await
            .unwrap();
        fx.approve_all(id).await;

        let lines = fx.store.lines(id).await;
        assert_eq!(lines[0].quantity_requested, 3);
        assert_eq!(lines[0].quantity_approved, Some(1));
        assert_eq!(lines[0].effective_quantity(), 1);
    }

    #[tokio::test]
    async fn test_senior_approver_overrides_junior() {
        let fx = Fixture::new().await;
        let id = projector_booking(&fx, Uuid::new_v4(), 1).await;
        let tasks = fx.store.tasks(id).await;
        let junior = tasks.iter().find(|t| t.approver_id == fx.lab_staff).unwrap().id;
        let senior = tasks.iter().find(|t| t.approver_id == fx.lab_head).unwrap().id;

        let err = fx
            .engine
            .approvals
            .override_task(senior, fx.lab_staff, Decision::Approve, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let outcome = fx
            .engine
            .approvals
            .override_task(junior, fx.lab_head, Decision::Approve, Some("staf cuti".into()))
            .await
            .unwrap();
        assert_eq!(outcome.task.status, TaskStatus::Overridden);
        assert_eq!(outcome.task.overridden_by, Some(fx.lab_head));
        assert_eq!(outcome.task.effective_decision(), Some(Decision::Approve));

        // The junior can no longer decide their own task
        let err = fx
            .engine
            .approvals
            .override_task(junior, fx.lab_head, Decision::Reject, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidStateTransition(_)));

        assert!(fx.audit.actions().await.contains(&"approval.override".to_string()));
    }

    #[tokio::test]
    async fn test_override_capability_can_veto() {
        let fx = Fixture::new().await;
        let requester = Uuid::new_v4();
        let id = projector_booking(&fx, requester, 1).await;
        let global = fx
            .store
            .tasks(id)
            .await
            .into_iter()
            .find(|t| t.scope == ApprovalScope::Global)
            .unwrap();

        let err = fx
            .engine
            .approvals
            .override_task(global.id, Uuid::new_v4(), Decision::Reject, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let outcome = fx
            .engine
            .approvals
            .override_task(global.id, fx.supervisor, Decision::Reject, Some("anggaran".into()))
            .await
            .unwrap();
        assert_eq!(outcome.approval.status, ApprovalStatus::Rejected);
        assert_eq!(outcome.approval.global_decided_by, Some(fx.supervisor));
        assert_eq!(outcome.booking.status, BookingStatus::Rejected);
        assert_eq!(fx.quota_count(requester).await, 0);
    }

    #[tokio::test]
    async fn test_final_status_never_regresses() {
        let fx = Fixture::new().await;
        let id = projector_booking(&fx, Uuid::new_v4(), 1).await;
        fx.approve_all(id).await;

        let err = fx
            .engine
            .approvals
            .decide(id, projector_scope(&fx), fx.lab_head, Decision::Reject, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidStateTransition(_)));

        let (approval, tasks) = fx.engine.approvals.status(id).await.unwrap();
        assert_eq!(approval.status, ApprovalStatus::Approved);
        assert!(tasks.iter().all(|t| !t.is_pending()));
    }
}
