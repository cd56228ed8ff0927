//! Disabled mode: create auto-approves through the SYSTEM channel, but the
//! Guardian still has the last word.

mod common;

use common::{RecordingListener, build_app, count_events, signal, snapshot};
use rust_decimal_macros::dec;
use tradewarden::application::pipeline::PipelineOutcome;
use tradewarden::domain::errors::ErrorCode;
use tradewarden::domain::hitl::{ApprovalStatus, DecisionChannel, REASON_HITL_DISABLED};
use tradewarden::domain::orders::ReconciliationOutcome;

#[tokio::test]
async fn test_disabled_mode_auto_approves_and_executes() {
    // HITL off: no operator whitelist required.
    let app = build_app(&[("HITL_ENABLED", "false"), ("HITL_ALLOWED_OPERATORS", "")]).await;
    let (listener, names) = RecordingListener::new();
    app.bus.subscribe(listener).await;
    let _handle = app.clone().start().await.unwrap();

    let s = signal("X-1", dec!(1850000.00), dec!(1830000.00));
    let corr = s.correlation_id;

    let outcome = app.pipeline.handle_signal(s).await.unwrap();
    let reconciliation = match outcome {
        PipelineOutcome::Executed { reconciliation } => reconciliation,
        other => panic!("expected Executed, got {other:?}"),
    };
    assert_eq!(reconciliation.outcome, ReconciliationOutcome::MockFilled);
    assert_eq!(reconciliation.correlation_id, corr);

    assert_eq!(count_events(&names, "hitl.auto_approved"), 1);
    assert_eq!(count_events(&names, "hitl.created"), 0);

    // Terminal system approval, no operator id.
    let trail = app.audit.find_by_correlation(corr).await.unwrap();
    let auto = trail
        .iter()
        .find(|r| r.action == "HITL_AUTO_APPROVE")
        .expect("auto-approval must be audited");
    assert_eq!(auto.result, ApprovalStatus::Approved.to_string());
    assert_eq!(auto.context["reason"], REASON_HITL_DISABLED);

    assert_eq!(app.metrics.hitl_approvals_total.get(), 1);
}

#[tokio::test]
async fn test_disabled_mode_still_consults_guardian() {
    let app = build_app(&[("HITL_ENABLED", "false"), ("HITL_ALLOWED_OPERATORS", "")]).await;
    let _handle = app.clone().start().await.unwrap();

    // Engage the hard stop.
    app.guardian.check_vitals(dec!(98000.00), None).await.unwrap();
    assert!(app.guardian.is_locked());

    let err = app
        .hitl
        .create(
            &signal("X-2", dec!(1850000.00), dec!(1830000.00)),
            dec!(0.05),
            snapshot(dec!(1850000.00)),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::GuardianLocked));
    assert!(app.metrics.blocked_by_guardian_total.get() >= 1);
}

#[tokio::test]
async fn test_auto_approved_record_is_terminal_and_hash_clean() {
    let app = build_app(&[("HITL_ENABLED", "false"), ("HITL_ALLOWED_OPERATORS", "")]).await;

    let outcome = app
        .hitl
        .create(
            &signal("X-3", dec!(1850000.00), dec!(1830000.00)),
            dec!(0.05),
            snapshot(dec!(1850000.00)),
        )
        .await
        .unwrap();
    let request = outcome.request();

    assert_eq!(request.status, ApprovalStatus::Approved);
    assert_eq!(request.decision_channel, Some(DecisionChannel::System));
    assert_eq!(request.reason.as_deref(), Some(REASON_HITL_DISABLED));
    assert!(request.operator_id.is_none());
    assert!(request.verify_row_hash());

    // Nothing is pending; the record went in terminal.
    assert!(app.hitl.pending().await.unwrap().requests.is_empty());
}
