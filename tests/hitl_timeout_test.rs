//! Expiry behavior: an undecided request is rejected, never approved.

mod common;

use common::{RecordingListener, build_app, count_events, signal};
use rust_decimal_macros::dec;
use std::time::Duration;
use tradewarden::application::pipeline::PipelineOutcome;
use tradewarden::domain::hitl::{ApprovalStatus, DecisionChannel, REASON_HITL_TIMEOUT};

#[tokio::test]
async fn test_undecided_request_expires_to_rejected() {
    let app = build_app(&[("HITL_TIMEOUT_SECONDS", "1")]).await;
    let (listener, names) = RecordingListener::new();
    app.bus.subscribe(listener).await;
    let _handle = app.clone().start().await.unwrap();

    let s = signal("X-1", dec!(1850000.00), dec!(1830000.00));
    let trade_id = match app.pipeline.handle_signal(s).await.unwrap() {
        PipelineOutcome::AwaitingApproval { trade_id } => trade_id,
        other => panic!("expected AwaitingApproval, got {other:?}"),
    };

    // TTL is 1 s; both the per-request timer and the sweep worker race to
    // expire it, and the conditional write lets exactly one win.
    tokio::time::sleep(Duration::from_secs(3)).await;

    let request = app
        .hitl
        .pending()
        .await
        .unwrap()
        .requests
        .into_iter()
        .find(|r| r.trade_id == trade_id);
    assert!(request.is_none(), "expired request must leave pending");

    // Terminal state: REJECTED / HITL_TIMEOUT / SYSTEM.
    let all_expired = count_events(&names, "hitl.expired");
    assert_eq!(all_expired, 1, "hitl.expired must fire exactly once");
    assert_eq!(app.metrics.hitl_rejections_timeout_total.get(), 1);
    assert_eq!(
        app.metrics
            .hitl_rejections_total
            .with_label_values(&[REASON_HITL_TIMEOUT])
            .get(),
        1
    );

    // A late decision hits a terminal row.
    let err = app
        .hitl
        .decide(
            &trade_id,
            "op-a",
            tradewarden::domain::hitl::DecisionType::Approve,
            dec!(1850000.00),
            DecisionChannel::Api,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        tradewarden::domain::errors::HitlError::StateConflict { .. }
    ));
}

#[tokio::test]
async fn test_decide_on_stale_row_rejects_with_timeout() {
    // No workers running: the stale row is caught at decide time.
    let app = build_app(&[("HITL_TIMEOUT_SECONDS", "1")]).await;

    let s = signal("X-2", dec!(1850000.00), dec!(1830000.00));
    let outcome = app
        .hitl
        .create(&s, dec!(0.05), common::snapshot(dec!(1850000.00)))
        .await
        .unwrap();
    let trade_id = outcome.request().trade_id.clone();

    tokio::time::sleep(Duration::from_secs(2)).await;

    let err = app
        .hitl
        .decide(
            &trade_id,
            "op-a",
            tradewarden::domain::hitl::DecisionType::Approve,
            dec!(1850000.00),
            DecisionChannel::Api,
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(
        err.code(),
        Some(tradewarden::domain::errors::ErrorCode::HitlTimeout)
    );

    let stored = app
        .hitl
        .pending()
        .await
        .unwrap();
    assert!(stored.requests.is_empty());

    // The row was transitioned by the decide path itself.
    let trail = app.audit.find_by_correlation(s.correlation_id).await.unwrap();
    let expired = trail.iter().find(|r| r.action == "HITL_EXPIRE").unwrap();
    assert_eq!(expired.result, ApprovalStatus::Rejected.to_string());
}
