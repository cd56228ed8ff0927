//! End-to-end pulse: policy -> risk -> HITL -> order manager, against the
//! mock venue and an in-memory store.

mod common;

use common::{build_app, signal};
use rust_decimal_macros::dec;
use tradewarden::application::pipeline::PipelineOutcome;
use tradewarden::domain::hitl::{
    ApprovalStatus, DecisionChannel, DecisionType, REASON_SLIPPAGE_EXCEEDED,
};
use tradewarden::domain::orders::ReconciliationOutcome;

#[tokio::test]
async fn test_approval_happy_path() {
    let app = build_app(&[]).await;
    let _handle = app.clone().start().await.unwrap();

    let s = signal("X-1", dec!(1850000.00), dec!(1830000.00));
    let corr = s.correlation_id;

    // Signal parks behind the human gate with a permit sized at 1% risk.
    let outcome = app.pipeline.handle_signal(s).await.unwrap();
    let trade_id = match outcome {
        PipelineOutcome::AwaitingApproval { trade_id } => trade_id,
        other => panic!("expected AwaitingApproval, got {other:?}"),
    };

    let pending = app.hitl.pending().await.unwrap();
    assert_eq!(pending.requests.len(), 1);
    assert_eq!(pending.requests[0].qty, dec!(0.05));
    assert_eq!(pending.requests[0].correlation_id, corr);

    // Operator approves at the request price: zero deviation.
    let approved = app
        .hitl
        .decide(
            &trade_id,
            "op-a",
            DecisionType::Approve,
            dec!(1850000.00),
            DecisionChannel::Api,
            None,
        )
        .await
        .unwrap();
    assert_eq!(approved.status, ApprovalStatus::Approved);
    assert_eq!(approved.operator_id.as_deref(), Some("op-a"));
    assert!(approved.verify_row_hash());

    // The parked permit is consumed exactly once by the order manager.
    let reconciliation = app.pipeline.execute_approved(&approved).await.unwrap();
    assert_eq!(reconciliation.outcome, ReconciliationOutcome::MockFilled);
    assert_eq!(reconciliation.filled_qty, dec!(0.05));
    assert_eq!(reconciliation.correlation_id, corr);

    // One correlation id links the whole audit trail.
    let trail = app.audit.find_by_correlation(corr).await.unwrap();
    let actions: Vec<&str> = trail.iter().map(|r| r.action.as_str()).collect();
    assert!(actions.contains(&"HITL_CREATE"));
    assert!(actions.contains(&"HITL_DECIDE"));
    assert!(actions.contains(&"ORDER_RECONCILE"));
    assert!(actions.contains(&"TRADE_FILLED"));

    assert_eq!(app.metrics.hitl_approvals_total.get(), 1);
    assert_eq!(app.metrics.signals_executed_total.get(), 1);
}

#[tokio::test]
async fn test_slippage_rejects_approval() {
    let app = build_app(&[]).await;
    let _handle = app.clone().start().await.unwrap();

    let s = signal("X-2", dec!(1850000.00), dec!(1830000.00));
    let corr = s.correlation_id;
    let outcome = app.pipeline.handle_signal(s).await.unwrap();
    let trade_id = match outcome {
        PipelineOutcome::AwaitingApproval { trade_id } => trade_id,
        other => panic!("expected AwaitingApproval, got {other:?}"),
    };

    // Market moved ~0.54% past the request price: SEC-050.
    let err = app
        .hitl
        .decide(
            &trade_id,
            "op-a",
            DecisionType::Approve,
            dec!(1860000.00),
            DecisionChannel::Api,
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(
        err.code(),
        Some(tradewarden::domain::errors::ErrorCode::SlippageExceeded)
    );

    let request = app.hitl.pending().await.unwrap();
    assert!(request.requests.is_empty(), "request must no longer be pending");

    let stored = app.audit.find_by_correlation(corr).await.unwrap();
    assert!(stored.iter().any(|r| r.action == "HITL_REJECT"));

    assert_eq!(
        app.metrics
            .hitl_rejections_total
            .with_label_values(&[REASON_SLIPPAGE_EXCEEDED])
            .get(),
        1
    );
    assert_eq!(app.metrics.hitl_approvals_total.get(), 0);
}

#[tokio::test]
async fn test_operator_must_be_whitelisted() {
    let app = build_app(&[]).await;
    let _handle = app.clone().start().await.unwrap();

    let s = signal("X-3", dec!(1850000.00), dec!(1830000.00));
    let outcome = app.pipeline.handle_signal(s).await.unwrap();
    let trade_id = match outcome {
        PipelineOutcome::AwaitingApproval { trade_id } => trade_id,
        other => panic!("expected AwaitingApproval, got {other:?}"),
    };

    let err = app
        .hitl
        .decide(
            &trade_id,
            "op-evil",
            DecisionType::Approve,
            dec!(1850000.00),
            DecisionChannel::Api,
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(
        err.code(),
        Some(tradewarden::domain::errors::ErrorCode::OperatorNotAllowed)
    );

    // The request is untouched.
    let pending = app.hitl.pending().await.unwrap();
    assert_eq!(pending.requests.len(), 1);
    assert_eq!(pending.requests[0].status, ApprovalStatus::AwaitingApproval);
}
