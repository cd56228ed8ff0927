//! Background sweep for expired approval requests.
//!
//! Per-request timers do the precise work; this worker is the safety net
//! that catches timers lost to restarts or missed wakeups. The scan
//! interval is a tenth of the configured TTL, floored at one second.

use crate::application::hitl::gateway::HitlGateway;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

pub struct ExpiryWorker {
    gateway: Arc<HitlGateway>,
    interval: Duration,
}

impl ExpiryWorker {
    pub fn new(gateway: Arc<HitlGateway>) -> Self {
        let interval = Duration::from_secs((gateway.ttl_seconds() / 10).max(1));
        Self { gateway, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run until the shutdown signal flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "ExpiryWorker: started (interval {:?})",
            self.interval
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.gateway.expire_due().await {
                        Ok(0) => {}
                        Ok(n) => info!("ExpiryWorker: expired {n} request(s)"),
                        Err(e) => warn!("ExpiryWorker: sweep failed: {e}"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("ExpiryWorker: shutting down");
                        return;
                    }
                }
            }
        }
    }
}
