//! HITL REST surface: bearer auth, operator whitelisting, decision routes
//! and their status-code contract.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use common::{build_app, signal, snapshot};
use rust_decimal_macros::dec;
use std::sync::Arc;
use tower::util::ServiceExt;
use tradewarden::application::system::Application;
use tradewarden::interfaces::api::{ApiState, build_router};

const TOKEN: &str = "test-bearer-token";

async fn harness() -> (axum::Router, Arc<Application>) {
    let app = build_app(&[]).await;
    let (tx, _rx) = tokio::sync::mpsc::channel(8);
    (build_router(ApiState::new(app.clone(), tx)), app)
}

fn authed(request: Request<Body>) -> Request<Body> {
    let (mut parts, body) = request.into_parts();
    parts.headers.insert(
        header::AUTHORIZATION,
        format!("Bearer {TOKEN}").parse().unwrap(),
    );
    Request::from_parts(parts, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn park_request(app: &Arc<Application>, external_id: &str) -> String {
    app.hitl
        .create(
            &signal(external_id, dec!(1850000.00), dec!(1830000.00)),
            dec!(0.05),
            snapshot(dec!(1850000.00)),
        )
        .await
        .unwrap()
        .request()
        .trade_id
        .clone()
}

#[tokio::test]
async fn test_pending_requires_bearer_token() {
    let (router, _app) = harness().await;

    let response = router
        .clone()
        .oneshot(get("/api/hitl/pending"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let mut wrong = get("/api/hitl/pending");
    wrong
        .headers_mut()
        .insert(header::AUTHORIZATION, "Bearer nope".parse().unwrap());
    let response = router.clone().oneshot(wrong).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = router.oneshot(authed(get("/api/hitl/pending"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_approve_via_api() {
    let (router, app) = harness().await;
    let trade_id = park_request(&app, "A-1").await;

    let response = router
        .oneshot(authed(post_json(
            &format!("/api/hitl/{trade_id}/approve"),
            serde_json::json!({"operator_id": "op-a", "current_price": "1850000.00"}),
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let stored = app
        .hitl
        .pending()
        .await
        .unwrap();
    assert!(stored.requests.is_empty());
}

#[tokio::test]
async fn test_unwhitelisted_operator_is_403() {
    let (router, app) = harness().await;
    let trade_id = park_request(&app, "A-2").await;

    let response = router
        .oneshot(authed(post_json(
            &format!("/api/hitl/{trade_id}/approve"),
            serde_json::json!({"operator_id": "stranger", "current_price": "1850000.00"}),
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_slippage_is_412() {
    let (router, app) = harness().await;
    let trade_id = park_request(&app, "A-3").await;

    let response = router
        .oneshot(authed(post_json(
            &format!("/api/hitl/{trade_id}/approve"),
            serde_json::json!({"operator_id": "op-a", "current_price": "1860000.00"}),
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn test_float_current_price_is_400() {
    let (router, app) = harness().await;
    let trade_id = park_request(&app, "A-4").await;

    let response = router
        .oneshot(authed(post_json(
            &format!("/api/hitl/{trade_id}/approve"),
            serde_json::json!({"operator_id": "op-a", "current_price": 1850000.5}),
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_reject_and_conflict_on_second_decision() {
    let (router, app) = harness().await;
    let trade_id = park_request(&app, "A-5").await;

    let response = router
        .clone()
        .oneshot(authed(post_json(
            &format!("/api/hitl/{trade_id}/reject"),
            serde_json::json!({"operator_id": "op-b", "reason": "setup looks stale"}),
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(app.hitl.pending().await.unwrap().requests.is_empty());

    // Second decision hits a terminal row: 409.
    let response = router
        .oneshot(authed(post_json(
            &format!("/api/hitl/{trade_id}/approve"),
            serde_json::json!({"operator_id": "op-a", "current_price": "1850000.00"}),
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_unknown_trade_is_404_and_guardian_lock_is_423() {
    let (router, app) = harness().await;

    let response = router
        .clone()
        .oneshot(authed(post_json(
            "/api/hitl/trd-unknown/approve",
            serde_json::json!({"operator_id": "op-a", "current_price": "1850000.00"}),
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let trade_id = park_request(&app, "A-6").await;
    app.guardian.check_vitals(dec!(100000.00), None).await.unwrap();
    app.guardian.check_vitals(dec!(98000.00), None).await.unwrap();

    // The cascade already rejected it; decide now conflicts rather than
    // approving under a lock.
    let response = router
        .oneshot(authed(post_json(
            &format!("/api/hitl/{trade_id}/approve"),
            serde_json::json!({"operator_id": "op-a", "current_price": "1850000.00"}),
        )))
        .await
        .unwrap();
    assert!(
        response.status() == StatusCode::CONFLICT || response.status() == StatusCode::LOCKED
    );

    // A fresh create while locked is SEC-020.
    let err = app
        .hitl
        .create(
            &signal("A-7", dec!(1850000.00), dec!(1830000.00)),
            dec!(0.05),
            snapshot(dec!(1850000.00)),
        )
        .await
        .unwrap_err();
    assert_eq!(
        err.code(),
        Some(tradewarden::domain::errors::ErrorCode::GuardianLocked)
    );
}
