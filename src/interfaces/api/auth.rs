//! Bearer token authentication for the HITL REST surface.
//!
//! Extracts and validates `Authorization: Bearer <token>` against the frozen
//! configuration. Comparison runs in constant time; a missing or invalid
//! token short-circuits with 401 before any handler body executes. Operator
//! whitelisting (SEC-090 / 403) happens later, in the gateway.

use crate::interfaces::api::server::ApiState;
use axum::{
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::warn;

/// Compare two byte slices in constant time. Always examines every byte of
/// both slices even when a mismatch is found early.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Axum extractor yielding the validated raw token.
pub struct AuthBearer(pub String);

pub struct AuthRejection {
    message: &'static str,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        (StatusCode::UNAUTHORIZED, axum::Json(body)).into_response()
    }
}

#[async_trait::async_trait]
impl FromRequestParts<Arc<ApiState>> for AuthBearer {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<ApiState>,
    ) -> Result<Self, Self::Rejection> {
        let expected = state.bearer_token.as_bytes();
        if expected.is_empty() {
            warn!("API bearer token is not configured; rejecting all authenticated requests");
            return Err(AuthRejection {
                message: "Server authentication not configured",
            });
        }

        let auth_header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());

        let token = match auth_header {
            Some(value) if value.starts_with("Bearer ") => &value[7..],
            _ => {
                warn!("Missing or malformed Authorization header");
                return Err(AuthRejection {
                    message: "Missing or invalid authorization token",
                });
            }
        };

        if !constant_time_eq(token.as_bytes(), expected) {
            warn!("Invalid bearer token presented");
            return Err(AuthRejection {
                message: "Invalid authorization token",
            });
        }

        Ok(AuthBearer(token.to_string()))
    }
}
