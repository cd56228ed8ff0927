//! Order manager.
//!
//! Consumes an execution permit exactly once: submits a bounded limit order,
//! polls the venue every three seconds until the permit's deadline, cancels
//! on timeout and reconciles whatever state the order finally reached. The
//! permit's slippage and timeout bounds are taken as-is; there is no path
//! that widens them here.

use crate::domain::audit::AuditRecord;
use crate::domain::events::TradingEvent;
use crate::domain::money::{self, PERCENT_SCALE};
use crate::domain::orders::{
    ExchangeOrder, OrderSide, OrderStatus, Reconciliation, ReconciliationOutcome,
};
use crate::domain::permit::ExecutionPermit;
use crate::domain::ports::ExchangeService;
use crate::domain::repositories::AuditLog;
use crate::infrastructure::EventBus;
use crate::infrastructure::exchange::VenueBreaker;
use crate::infrastructure::observability::Metrics;
use anyhow::Result;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_secs(3);

pub struct OrderManager {
    exchange: Arc<dyn ExchangeService>,
    audit: Arc<dyn AuditLog>,
    bus: EventBus,
    metrics: Metrics,
    breaker: VenueBreaker,
}

impl OrderManager {
    pub fn new(
        exchange: Arc<dyn ExchangeService>,
        audit: Arc<dyn AuditLog>,
        bus: EventBus,
        metrics: Metrics,
    ) -> Self {
        Self {
            exchange,
            audit,
            bus,
            metrics,
            breaker: VenueBreaker::new("exchange"),
        }
    }

    /// Drive one permit to a terminal reconciliation. Never panics and never
    /// returns early without classifying the outcome.
    pub async fn execute(
        &self,
        symbol: &str,
        side: OrderSide,
        permit: ExecutionPermit,
    ) -> Result<Reconciliation> {
        let started = Instant::now();
        let correlation_id = permit.correlation_id;

        // Bound the limit price by the permitted slippage.
        let slip = permit.entry_price * permit.max_slippage_pct;
        let limit_price = money::to_price(match side {
            OrderSide::Buy => permit.entry_price + slip,
            OrderSide::Sell => permit.entry_price - slip,
        });

        // The venue must admit the order first; an offline venue refuses
        // without touching the wire.
        if let Err(e) = self.breaker.admit(correlation_id).await {
            warn!("OrderManager [{correlation_id}]: {e}");
            let reconciliation = self.failed(symbol, side, correlation_id, started);
            self.record(&permit, &reconciliation, "venue offline").await?;
            return Ok(reconciliation);
        }

        let submitted = self
            .exchange
            .submit_limit_order(symbol, side, permit.approved_qty, limit_price, correlation_id)
            .await;

        let order = match submitted {
            Ok(order) => {
                self.breaker.record_success().await;
                order
            }
            Err(e) => {
                self.breaker.record_failure().await;
                warn!("OrderManager [{correlation_id}]: submission failed: {e}");
                let reconciliation = self.failed(symbol, side, correlation_id, started);
                self.record(&permit, &reconciliation, "submission failed").await?;
                return Ok(reconciliation);
            }
        };

        let deadline = started + Duration::from_secs(permit.timeout_seconds);
        let mut last_seen = order.clone();

        loop {
            if matches!(
                last_seen.status,
                OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
            ) {
                break;
            }
            if Instant::now() >= deadline {
                // Deadline reached: cancel, then take one final look. The
                // cancel can race a fill, so the re-poll decides.
                if let Err(e) = self.exchange.cancel_order(&last_seen.order_id).await {
                    warn!("OrderManager [{correlation_id}]: cancel failed: {e}");
                }
                if let Ok(fin) = self.exchange.order_status(&last_seen.order_id).await {
                    last_seen = fin;
                }
                break;
            }

            tokio::time::sleep(POLL_INTERVAL).await;
            match self.exchange.order_status(&last_seen.order_id).await {
                Ok(order) => last_seen = order,
                Err(e) => warn!("OrderManager [{correlation_id}]: status poll failed: {e}"),
            }
        }

        let reconciliation = self.classify(&permit, symbol, side, &last_seen, started);
        self.record(&permit, &reconciliation, "reconciled").await?;
        Ok(reconciliation)
    }

    fn failed(
        &self,
        symbol: &str,
        side: OrderSide,
        correlation_id: uuid::Uuid,
        started: Instant,
    ) -> Reconciliation {
        Reconciliation {
            correlation_id,
            symbol: symbol.to_string(),
            side,
            outcome: ReconciliationOutcome::Failed,
            filled_qty: Decimal::ZERO,
            avg_price: None,
            slippage_pct: Decimal::ZERO,
            execution_time_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn classify(
        &self,
        permit: &ExecutionPermit,
        symbol: &str,
        side: OrderSide,
        order: &ExchangeOrder,
        started: Instant,
    ) -> Reconciliation {
        let outcome = match order.status {
            OrderStatus::Filled if self.exchange.is_mock() => ReconciliationOutcome::MockFilled,
            OrderStatus::Filled => ReconciliationOutcome::Filled,
            OrderStatus::PartiallyFilled => ReconciliationOutcome::PartiallyFilled,
            OrderStatus::Cancelled if order.filled_qty > Decimal::ZERO => {
                ReconciliationOutcome::PartiallyFilled
            }
            OrderStatus::Cancelled => ReconciliationOutcome::Cancelled,
            OrderStatus::Rejected => ReconciliationOutcome::Failed,
            OrderStatus::New => ReconciliationOutcome::Cancelled,
        };

        let slippage_pct = match order.avg_fill_price {
            Some(avg) if order.filled_qty > Decimal::ZERO => money::quantize(
                ((avg - permit.entry_price) / permit.entry_price).abs()
                    * Decimal::ONE_HUNDRED,
                PERCENT_SCALE,
            ),
            _ => Decimal::ZERO,
        };

        Reconciliation {
            correlation_id: permit.correlation_id,
            symbol: symbol.to_string(),
            side,
            outcome,
            filled_qty: order.filled_qty,
            avg_price: order.avg_fill_price,
            slippage_pct,
            execution_time_ms: started.elapsed().as_millis() as u64,
        }
    }

    async fn record(
        &self,
        permit: &ExecutionPermit,
        reconciliation: &Reconciliation,
        note: &str,
    ) -> Result<()> {
        self.metrics
            .slippage_pct
            .observe(reconciliation.slippage_pct.to_f64().unwrap_or(0.0));
        if matches!(
            reconciliation.outcome,
            ReconciliationOutcome::Filled | ReconciliationOutcome::MockFilled
        ) {
            self.metrics.signals_executed_total.inc();
        }

        self.audit
            .append(
                &AuditRecord::new(
                    reconciliation.correlation_id,
                    "order_manager",
                    "ORDER_RECONCILE",
                    reconciliation.outcome.to_string(),
                )
                .with_context(serde_json::json!({
                    "note": note,
                    "symbol": reconciliation.symbol,
                    "side": reconciliation.side.to_string(),
                    "filled_qty": money::canonical_string(reconciliation.filled_qty),
                    "avg_price": reconciliation.avg_price.map(money::canonical_string),
                    "slippage_pct": money::canonical_string(reconciliation.slippage_pct),
                    "execution_time_ms": reconciliation.execution_time_ms,
                    "planned_risk_zar": money::canonical_string(permit.planned_risk_zar),
                })),
            )
            .await?;

        self.bus
            .publish(TradingEvent::OrderReconciled {
                reconciliation: reconciliation.clone(),
            })
            .await;

        info!(
            "OrderManager [{}]: {} {} {} -> {} (filled {}, slippage {}%, {}ms)",
            reconciliation.correlation_id,
            reconciliation.side,
            reconciliation.symbol,
            permit.approved_qty,
            reconciliation.outcome,
            reconciliation.filled_qty,
            reconciliation.slippage_pct,
            reconciliation.execution_time_ms
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::risk_governor::{DEFAULT_MAX_SLIPPAGE_PCT, DEFAULT_TIMEOUT_SECONDS};
    use crate::infrastructure::exchange::mock::{FillBehavior, MockExchangeService};
    use crate::infrastructure::persistence::Database;
    use crate::infrastructure::persistence::repositories::SqliteAuditLog;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn permit() -> ExecutionPermit {
        ExecutionPermit {
            correlation_id: Uuid::new_v4(),
            approved_qty: dec!(0.05),
            entry_price: dec!(1850000),
            stop_price: dec!(1830000),
            max_slippage_pct: DEFAULT_MAX_SLIPPAGE_PCT,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            planned_risk_zar: dec!(1000.00),
            created_at: Utc::now(),
        }
    }

    async fn manager(behavior: FillBehavior) -> (OrderManager, Database) {
        let db = Database::in_memory().await.unwrap();
        let manager = OrderManager::new(
            Arc::new(MockExchangeService::with_behavior(behavior)),
            Arc::new(SqliteAuditLog::new(db.clone())),
            EventBus::new(),
            Metrics::new().unwrap(),
        );
        (manager, db)
    }

    #[tokio::test]
    async fn test_immediate_fill_is_mock_filled() {
        let (manager, _db) = manager(FillBehavior::FillImmediately).await;
        let p = permit();
        let corr = p.correlation_id;

        let r = manager.execute("BTCZAR", OrderSide::Buy, p).await.unwrap();
        assert_eq!(r.outcome, ReconciliationOutcome::MockFilled);
        assert_eq!(r.filled_qty, dec!(0.05));
        assert_eq!(r.correlation_id, corr);
        // Filled at the bounded limit: 1850000 * 1.005, |drift| = 0.5%.
        assert_eq!(r.slippage_pct, dec!(0.5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_cancels_resting_order() {
        let (manager, _db) = manager(FillBehavior::NeverFill).await;

        let r = manager
            .execute("BTCZAR", OrderSide::Buy, permit())
            .await
            .unwrap();
        assert_eq!(r.outcome, ReconciliationOutcome::Cancelled);
        assert_eq!(r.filled_qty, dec!(0));
        assert!(r.avg_price.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_fill_reported() {
        let (manager, _db) = manager(FillBehavior::FillHalf).await;

        let r = manager
            .execute("BTCZAR", OrderSide::Sell, permit())
            .await
            .unwrap();
        assert_eq!(r.outcome, ReconciliationOutcome::PartiallyFilled);
        assert_eq!(r.filled_qty, dec!(0.025));
    }

    struct DeadVenue;

    #[async_trait::async_trait]
    impl ExchangeService for DeadVenue {
        async fn submit_limit_order(
            &self,
            _symbol: &str,
            _side: OrderSide,
            _quantity: Decimal,
            _limit_price: Decimal,
            _correlation_id: uuid::Uuid,
        ) -> anyhow::Result<ExchangeOrder> {
            anyhow::bail!("connection refused")
        }

        async fn order_status(&self, _order_id: &str) -> anyhow::Result<ExchangeOrder> {
            anyhow::bail!("connection refused")
        }

        async fn cancel_order(&self, _order_id: &str) -> anyhow::Result<()> {
            anyhow::bail!("connection refused")
        }
    }

    #[tokio::test]
    async fn test_unreachable_venue_trips_the_breaker() {
        let db = Database::in_memory().await.unwrap();
        let audit = Arc::new(SqliteAuditLog::new(db.clone()));
        let manager = OrderManager::new(
            Arc::new(DeadVenue),
            audit.clone(),
            EventBus::new(),
            Metrics::new().unwrap(),
        );

        for _ in 0..5 {
            let r = manager
                .execute("BTCZAR", OrderSide::Buy, permit())
                .await
                .unwrap();
            assert_eq!(r.outcome, ReconciliationOutcome::Failed);
        }

        // The sixth permit is refused before touching the wire.
        let p = permit();
        let corr = p.correlation_id;
        let r = manager.execute("BTCZAR", OrderSide::Buy, p).await.unwrap();
        assert_eq!(r.outcome, ReconciliationOutcome::Failed);

        let trail = audit.find_by_correlation(corr).await.unwrap();
        assert_eq!(trail[0].context["note"], "venue offline");
    }
}
