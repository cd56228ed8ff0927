//! Discord webhook notifier.
//!
//! Cold path only: events are posted fire-and-forget from a spawned task so
//! a slow or dead webhook can never stall the publisher. No financial
//! decision ever depends on a notification being delivered.

use crate::domain::events::{EventListener, TradingEvent};
use crate::infrastructure::core::outbound;
use reqwest_middleware::ClientWithMiddleware;
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

const COLOR_GREEN: u32 = 0x2ecc71;
const COLOR_RED: u32 = 0xe74c3c;
const COLOR_AMBER: u32 = 0xf39c12;

pub struct DiscordNotifier {
    client: Arc<ClientWithMiddleware>,
    webhook_url: String,
}

impl DiscordNotifier {
    pub fn new(webhook_url: String) -> Self {
        Self {
            client: Arc::new(outbound::notifier_client()),
            webhook_url,
        }
    }

    fn embed_for(event: &TradingEvent) -> serde_json::Value {
        let (title, color) = match event {
            TradingEvent::HitlCreated { .. } => ("Approval requested", COLOR_AMBER),
            TradingEvent::HitlDecided { .. } => ("Operator decision", COLOR_GREEN),
            TradingEvent::HitlExpired { .. } => ("Approval expired", COLOR_RED),
            TradingEvent::HitlRecovered { .. } => ("Approval recovered", COLOR_AMBER),
            TradingEvent::HitlAutoApproved { .. } => ("Auto-approved (HITL disabled)", COLOR_AMBER),
            TradingEvent::GuardianLocked { .. } => ("GUARDIAN LOCKED", COLOR_RED),
            TradingEvent::GuardianUnlocked { .. } => ("Guardian unlocked", COLOR_GREEN),
            TradingEvent::OrderReconciled { .. } => ("Order reconciled", COLOR_GREEN),
            TradingEvent::PolicyLatchReset { .. } => ("Policy latch reset", COLOR_AMBER),
        };

        json!({
            "embeds": [{
                "title": title,
                "color": color,
                "description": format!(
                    "`{}`\ncorrelation: `{}`",
                    event.name(),
                    event.correlation_id().map(|c| c.to_string()).unwrap_or_default()
                ),
            }]
        })
    }
}

impl EventListener for DiscordNotifier {
    fn on_event(&self, event: &TradingEvent) {
        let payload = Self::embed_for(event);
        let client = Arc::clone(&self.client);
        let url = self.webhook_url.clone();
        let name = event.name();

        tokio::spawn(async move {
            if let Err(e) = client.post(&url).json(&payload).send().await {
                warn!("DiscordNotifier: failed to deliver '{name}': {e}");
            }
        });
    }
}
