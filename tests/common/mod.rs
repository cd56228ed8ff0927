//! Shared harness for integration tests.
#![allow(dead_code)]

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tradewarden::application::system::Application;
use tradewarden::config::Config;
use tradewarden::domain::events::{EventListener, TradingEvent};
use tradewarden::domain::hitl::PriceSnapshot;
use tradewarden::domain::orders::OrderSide;
use tradewarden::domain::signal::Signal;
use uuid::Uuid;

pub fn test_config(overrides: &[(&str, &str)]) -> Config {
    let mut env: HashMap<&str, String> = HashMap::from([
        ("WEBHOOK_HMAC_SECRET", "test-hmac-secret".to_string()),
        ("API_BEARER_TOKEN", "test-bearer-token".to_string()),
        ("HITL_ALLOWED_OPERATORS", "op-a,op-b".to_string()),
        ("MOCK_MODE", "true".to_string()),
        ("DATABASE_URL", "sqlite::memory:".to_string()),
    ]);
    for (key, value) in overrides {
        env.insert(key, value.to_string());
    }
    Config::from_lookup(|key| env.get(key).cloned()).expect("test config must parse")
}

pub async fn build_app(overrides: &[(&str, &str)]) -> Arc<Application> {
    Arc::new(
        Application::build(test_config(overrides))
            .await
            .expect("application must build"),
    )
}

pub fn signal(external_id: &str, price: Decimal, stop: Decimal) -> Signal {
    Signal {
        correlation_id: Uuid::new_v4(),
        source: "tradingview".to_string(),
        external_id: external_id.to_string(),
        symbol: "BTCZAR".to_string(),
        side: OrderSide::Buy,
        price,
        stop_price: Some(stop),
        atr: None,
        advisory_confidence: None,
        received_at: chrono::Utc::now(),
    }
}

pub fn snapshot(price: Decimal) -> PriceSnapshot {
    PriceSnapshot {
        price,
        bid: price - dec!(10),
        ask: price + dec!(10),
        spread_pct: dec!(0.0011),
        latency_ms: 3,
    }
}

/// Records every published event name, for exactly-once assertions.
pub struct RecordingListener {
    pub names: Arc<Mutex<Vec<String>>>,
}

impl RecordingListener {
    pub fn new() -> (Arc<Self>, Arc<Mutex<Vec<String>>>) {
        let names = Arc::new(Mutex::new(Vec::new()));
        (
            Arc::new(Self {
                names: Arc::clone(&names),
            }),
            names,
        )
    }
}

impl EventListener for RecordingListener {
    fn on_event(&self, event: &TradingEvent) {
        self.names.lock().unwrap().push(event.name().to_string());
    }
}

pub fn count_events(names: &Arc<Mutex<Vec<String>>>, name: &str) -> usize {
    names.lock().unwrap().iter().filter(|n| *n == name).count()
}
