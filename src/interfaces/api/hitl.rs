//! HITL REST endpoints.
//!
//! GET  /api/hitl/pending            - pending requests ordered by expiry
//! POST /api/hitl/{trade_id}/approve - approve, body {operator_id, current_price}
//! POST /api/hitl/{trade_id}/reject  - reject, body {operator_id, reason}
//!
//! Refusal codes map onto status codes: 403 SEC-090, 409 SEC-030, 410
//! SEC-060, 412 SEC-050, 423 SEC-020, 500 SEC-080.

use crate::domain::errors::HitlError;
use crate::domain::hitl::{DecisionChannel, DecisionType};
use crate::domain::money;
use crate::interfaces::api::auth::AuthBearer;
use crate::interfaces::api::server::ApiState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::error;

#[derive(Deserialize)]
pub struct ApproveBody {
    operator_id: String,
    /// Decimal string or integer; float tokens are rejected.
    current_price: Value,
}

#[derive(Deserialize)]
pub struct RejectBody {
    operator_id: String,
    reason: Option<String>,
}

fn refusal(status: StatusCode, error: &HitlError) -> Response {
    let body = serde_json::json!({
        "error": error.to_string(),
        "code": error.code().map(|c| c.as_str()),
    });
    (status, axum::Json(body)).into_response()
}

fn map_error(error: HitlError) -> Response {
    let status = match &error {
        HitlError::OperatorNotAllowed { .. } => StatusCode::FORBIDDEN,
        HitlError::InvalidTransition { .. } | HitlError::StateConflict { .. } => {
            StatusCode::CONFLICT
        }
        HitlError::Expired { .. } => StatusCode::GONE,
        HitlError::SlippageExceeded { .. } => StatusCode::PRECONDITION_FAILED,
        HitlError::GuardianLocked { .. } => StatusCode::LOCKED,
        HitlError::HashMismatch { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        HitlError::NotFound { .. } => StatusCode::NOT_FOUND,
        HitlError::Storage(e) => {
            error!("hitl api: storage failure: {e:#}");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    refusal(status, &error)
}

pub async fn pending(
    _auth: AuthBearer,
    State(state): State<Arc<ApiState>>,
) -> Response {
    match state.app.hitl.pending().await {
        Ok(report) => axum::Json(serde_json::json!({
            "pending": report.requests,
            "corrupt_omitted": report.corrupt_omitted,
        }))
        .into_response(),
        Err(e) => {
            error!("hitl api: pending query failed: {e:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn approve(
    _auth: AuthBearer,
    State(state): State<Arc<ApiState>>,
    Path(trade_id): Path<String>,
    axum::Json(body): axum::Json<ApproveBody>,
) -> Response {
    let current_price = match money::decimal_from_wire(&body.current_price) {
        Ok(price) if price > Decimal::ZERO => price,
        Ok(_) => {
            return (
                StatusCode::BAD_REQUEST,
                axum::Json(serde_json::json!({ "error": "current_price must be positive" })),
            )
                .into_response();
        }
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                axum::Json(serde_json::json!({ "error": "AUD-001" })),
            )
                .into_response();
        }
    };

    match state
        .app
        .hitl
        .decide(
            &trade_id,
            &body.operator_id,
            DecisionType::Approve,
            current_price,
            DecisionChannel::Api,
            None,
        )
        .await
    {
        Ok(request) => {
            // Execution happens off the request path; the approval is final
            // either way and the reconciliation lands in the audit log.
            let pipeline = state.app.pipeline.clone();
            let approved = request.clone();
            tokio::spawn(async move {
                if let Err(e) = pipeline.execute_approved(&approved).await {
                    error!(
                        "hitl api: execution after approval of {} failed: {e:#}",
                        approved.trade_id
                    );
                }
            });
            axum::Json(request).into_response()
        }
        Err(e) => map_error(e),
    }
}

pub async fn reject(
    _auth: AuthBearer,
    State(state): State<Arc<ApiState>>,
    Path(trade_id): Path<String>,
    axum::Json(body): axum::Json<RejectBody>,
) -> Response {
    match state
        .app
        .hitl
        .decide(
            &trade_id,
            &body.operator_id,
            DecisionType::Reject,
            Decimal::ZERO,
            DecisionChannel::Api,
            body.reason,
        )
        .await
    {
        Ok(request) => axum::Json(request).into_response(),
        Err(e) => map_error(e),
    }
}
