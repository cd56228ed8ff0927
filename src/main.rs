//! tradewarden server - headless trading control plane.
//!
//! Boots the frozen configuration (fail-closed on missing required keys),
//! wires the application leaves-first, recovers persisted approvals and
//! serves the webhook + HITL + metrics API until Ctrl+C.

use anyhow::Result;
use std::sync::Arc;
use tradewarden::application::system::Application;
use tradewarden::config::Config;
use tradewarden::interfaces::api::{self, server::serve};
use tracing::{Level, error, info};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false).pretty();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("tradewarden {} starting...", env!("CARGO_PKG_VERSION"));

    // Fail-closed: SEC-040 aborts the boot before any component exists.
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("configuration rejected: {e}");
            std::process::exit(1);
        }
    };
    info!(
        "Configuration loaded (mock_mode={}, hitl_enabled={}, bind={})",
        config.mock_mode, config.hitl_enabled, config.bind_addr
    );

    let bind_addr = config.bind_addr.clone();
    let app = Arc::new(Application::build(config).await?);
    let handle = app.clone().start().await?;

    let state = api::ApiState::new(app.clone(), handle.signal_tx.clone());
    let server = tokio::spawn(async move { serve(state, &bind_addr).await });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Stopping workers...");
    let _ = handle.shutdown_tx.send(true);
    server.abort();

    Ok(())
}
