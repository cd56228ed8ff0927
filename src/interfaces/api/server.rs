//! Router construction and shared API state.

use crate::application::system::Application;
use crate::domain::signal::Signal;
use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

pub struct ApiState {
    pub app: Arc<Application>,
    pub signal_tx: mpsc::Sender<Signal>,
    pub hmac_secret: Vec<u8>,
    pub bearer_token: String,
}

impl ApiState {
    pub fn new(app: Arc<Application>, signal_tx: mpsc::Sender<Signal>) -> Arc<Self> {
        let hmac_secret = app.config.webhook_hmac_secret.as_bytes().to_vec();
        let bearer_token = app.config.api_bearer_token.clone();
        Arc::new(Self {
            app,
            signal_tx,
            hmac_secret,
            bearer_token,
        })
    }
}

/// Build the full router: webhook ingress, HITL REST, metrics, health.
pub fn build_router(state: Arc<ApiState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // -- Hot path ------------------------------------------------
        .route("/webhook/signal", post(super::webhook::ingest_signal))
        // -- HITL REST (bearer auth) ---------------------------------
        .route("/api/hitl/pending", get(super::hitl::pending))
        .route("/api/hitl/:trade_id/approve", post(super::hitl::approve))
        .route("/api/hitl/:trade_id/reject", post(super::hitl::reject))
        // -- Observability (public) ----------------------------------
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        // -- Middleware & state --------------------------------------
        .layer(cors)
        .with_state(state)
}

pub async fn serve(state: Arc<ApiState>, bind_addr: &str) -> anyhow::Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("API listening on {bind_addr}");
    axum::serve(listener, router).await?;
    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    guardian_locked: bool,
    policy_latched: bool,
    server_time: i64,
}

async fn health(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    axum::Json(HealthResponse {
        status: "ok",
        guardian_locked: state.app.guardian.is_locked(),
        policy_latched: state.app.policy.is_latched(),
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

async fn metrics(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    match state.app.metrics.encode() {
        Ok(text) => (StatusCode::OK, text).into_response(),
        Err(e) => {
            tracing::error!("metrics encoding failed: {e:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
