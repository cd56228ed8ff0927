//! Webhook signal ingress (hot path).
//!
//! The contract, in order: byte-exact HMAC verification over the raw body,
//! strict parse (float tokens are AUD-001), idempotent insert, dispatch to
//! the bounded pipeline queue. The handler does nothing else; everything
//! downstream is asynchronous. Responses are limited to 200/401/400/503.

use crate::domain::errors::IngressError;
use crate::domain::hashing::verify_hmac_sha256;
use crate::domain::repositories::SignalInsert;
use crate::domain::signal::Signal;
use crate::interfaces::api::server::ApiState;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub const SIGNATURE_HEADER: &str = "X-Signature";

#[derive(Serialize)]
struct IngressAck {
    correlation_id: Uuid,
    status: &'static str,
}

fn error_response(status: StatusCode, error: &str) -> Response {
    (status, axum::Json(serde_json::json!({ "error": error }))).into_response()
}

pub async fn ingest_signal(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // 1. Authenticate the raw bytes before touching them.
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !verify_hmac_sha256(&state.hmac_secret, &body, signature) {
        warn!("webhook: signature verification failed");
        return error_response(StatusCode::UNAUTHORIZED, "SEC-001");
    }

    // 2. Backpressure check up front so a 503 never strands a persisted
    // signal without a dispatch.
    if state.signal_tx.capacity() == 0 {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "ingress queue full");
    }

    // 3. Strict parse.
    let correlation_id = Uuid::new_v4();
    let signal = match Signal::parse(correlation_id, &body) {
        Ok(signal) => signal,
        Err(e @ IngressError::FloatField { .. }) => {
            warn!("webhook: {e}");
            return error_response(StatusCode::BAD_REQUEST, "AUD-001");
        }
        Err(e) => {
            warn!("webhook: {e}");
            return error_response(StatusCode::BAD_REQUEST, "malformed signal");
        }
    };

    // 4. Idempotent insert keyed by (source, external_id).
    let inserted = match state.app.signals.insert(&signal).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!("webhook: signal insert failed: {e}");
            return error_response(StatusCode::SERVICE_UNAVAILABLE, "storage unavailable");
        }
    };

    match inserted {
        SignalInsert::Duplicate(existing) => {
            info!("webhook [{existing}]: duplicate signal ({})", signal.external_id);
            (
                StatusCode::OK,
                axum::Json(IngressAck {
                    correlation_id: existing,
                    status: "duplicate",
                }),
            )
                .into_response()
        }
        SignalInsert::Inserted(correlation_id) => {
            state.app.metrics.signals_received_total.inc();
            // 5. Hand off; the ack does not wait for the pipeline.
            if state.signal_tx.try_send(signal).is_err() {
                return error_response(StatusCode::SERVICE_UNAVAILABLE, "ingress queue full");
            }
            (
                StatusCode::OK,
                axum::Json(IngressAck {
                    correlation_id,
                    status: "ack",
                }),
            )
                .into_response()
        }
    }
}
