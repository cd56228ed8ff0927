use crate::domain::events::{EventListener, TradingEvent};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Event bus for publishing trading events to multiple listeners.
///
/// Fan-out is synchronous and in subscription order: `publish` returns only
/// after every listener has observed the event. The Guardian relies on this
/// to guarantee subscribers see a lock before the next permit is issued.
pub struct EventBus {
    listeners: Arc<RwLock<Vec<Arc<dyn EventListener>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Subscribe a listener to events
    pub async fn subscribe(&self, listener: Arc<dyn EventListener>) {
        self.listeners.write().await.push(listener);
    }

    /// Publish an event to all listeners
    pub async fn publish(&self, event: TradingEvent) {
        let listeners = self.listeners.read().await;
        for listener in listeners.iter() {
            listener.on_event(&event);
        }
    }

    /// Get count of subscribers (for testing)
    pub async fn subscriber_count(&self) -> usize {
        self.listeners.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            listeners: Arc::clone(&self.listeners),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::LoggingListener;
    use crate::domain::guardian::{GuardianLock, LockReason};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct CountingListener {
        count: Arc<AtomicUsize>,
    }

    impl EventListener for CountingListener {
        fn on_event(&self, _event: &TradingEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn lock_event() -> TradingEvent {
        TradingEvent::GuardianLocked {
            lock: GuardianLock {
                lock_id: Uuid::new_v4(),
                locked_at: chrono::Utc::now(),
                reason: LockReason::DailyLossExceeded,
                daily_loss_zar: dec!(1100.00),
                daily_loss_pct: dec!(0.011),
                correlation_id: None,
            },
        }
    }

    #[tokio::test]
    async fn test_event_bus_subscribe() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count().await, 0);

        bus.subscribe(Arc::new(LoggingListener)).await;
        assert_eq!(bus.subscriber_count().await, 1);

        bus.subscribe(Arc::new(LoggingListener)).await;
        assert_eq!(bus.subscriber_count().await, 2);
    }

    #[tokio::test]
    async fn test_event_bus_publish_reaches_all_listeners() {
        let bus = EventBus::new();

        let count1 = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::new(AtomicUsize::new(0));

        bus.subscribe(Arc::new(CountingListener {
            count: Arc::clone(&count1),
        }))
        .await;
        bus.subscribe(Arc::new(CountingListener {
            count: Arc::clone(&count2),
        }))
        .await;

        bus.publish(lock_event()).await;

        assert_eq!(count1.load(Ordering::SeqCst), 1);
        assert_eq!(count2.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_event_bus_clone_shares_listeners() {
        let bus1 = EventBus::new();
        let bus2 = bus1.clone();

        bus1.subscribe(Arc::new(LoggingListener)).await;

        assert_eq!(bus2.subscriber_count().await, 1);
    }
}
