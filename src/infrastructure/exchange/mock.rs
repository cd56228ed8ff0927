use crate::domain::hitl::PriceSnapshot;
use crate::domain::money::{self, PERCENT_SCALE};
use crate::domain::orders::{ExchangeOrder, OrderSide, OrderStatus};
use crate::domain::ports::{EquityService, ExchangeService, MarketSnapshotService};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// How the mock venue fills submitted orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillBehavior {
    /// Fill the full quantity at the limit price on submission.
    FillImmediately,
    /// Fill half the quantity and leave the rest resting.
    FillHalf,
    /// Leave the order resting until cancelled.
    NeverFill,
}

/// Simulated venue for MOCK_MODE and tests.
#[derive(Clone)]
pub struct MockExchangeService {
    orders: Arc<RwLock<HashMap<String, ExchangeOrder>>>,
    behavior: FillBehavior,
}

impl MockExchangeService {
    pub fn new() -> Self {
        Self::with_behavior(FillBehavior::FillImmediately)
    }

    pub fn with_behavior(behavior: FillBehavior) -> Self {
        Self {
            orders: Arc::new(RwLock::new(HashMap::new())),
            behavior,
        }
    }

    /// Force a resting order to fill at the given price (test hook).
    pub async fn fill_resting(&self, order_id: &str, price: Decimal) -> Result<()> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| anyhow!("unknown order {order_id}"))?;
        order.filled_qty = order.quantity;
        order.avg_fill_price = Some(price);
        order.status = OrderStatus::Filled;
        Ok(())
    }
}

impl Default for MockExchangeService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeService for MockExchangeService {
    async fn submit_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        limit_price: Decimal,
        correlation_id: Uuid,
    ) -> Result<ExchangeOrder> {
        let order_id = Uuid::new_v4().to_string();

        let (status, filled_qty, avg_fill_price) = match self.behavior {
            FillBehavior::FillImmediately => {
                (OrderStatus::Filled, quantity, Some(limit_price))
            }
            FillBehavior::FillHalf => (
                OrderStatus::PartiallyFilled,
                quantity / Decimal::TWO,
                Some(limit_price),
            ),
            FillBehavior::NeverFill => (OrderStatus::New, Decimal::ZERO, None),
        };

        let order = ExchangeOrder {
            order_id: order_id.clone(),
            correlation_id,
            symbol: symbol.to_string(),
            side,
            limit_price,
            quantity,
            status,
            filled_qty,
            avg_fill_price,
            submitted_at: Utc::now(),
        };

        info!(
            "MockExchange: {} {} {} @ {} -> {:?}",
            side, quantity, symbol, limit_price, status
        );

        self.orders.write().await.insert(order_id, order.clone());
        Ok(order)
    }

    async fn order_status(&self, order_id: &str) -> Result<ExchangeOrder> {
        self.orders
            .read()
            .await
            .get(order_id)
            .cloned()
            .ok_or_else(|| anyhow!("unknown order {order_id}"))
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| anyhow!("unknown order {order_id}"))?;
        if order.status == OrderStatus::New || order.status == OrderStatus::PartiallyFilled {
            order.status = OrderStatus::Cancelled;
        }
        Ok(())
    }

    fn is_mock(&self) -> bool {
        true
    }
}

/// Settable equity source for MOCK_MODE and tests.
pub struct MockEquityService {
    equity: RwLock<Decimal>,
}

impl MockEquityService {
    pub fn new(equity: Decimal) -> Self {
        Self {
            equity: RwLock::new(equity),
        }
    }

    pub async fn set_equity(&self, equity: Decimal) {
        *self.equity.write().await = equity;
    }
}

#[async_trait]
impl EquityService for MockEquityService {
    async fn current_equity_zar(&self) -> Result<Decimal> {
        Ok(*self.equity.read().await)
    }
}

/// Settable market snapshot source for MOCK_MODE and tests.
pub struct MockMarketService {
    price: RwLock<Decimal>,
}

impl MockMarketService {
    pub fn new(price: Decimal) -> Self {
        Self {
            price: RwLock::new(price),
        }
    }

    pub async fn set_price(&self, price: Decimal) {
        *self.price.write().await = price;
    }
}

#[async_trait]
impl MarketSnapshotService for MockMarketService {
    async fn snapshot(&self, _symbol: &str) -> Result<PriceSnapshot> {
        let price = *self.price.read().await;
        let half_spread = price * rust_decimal_macros::dec!(0.0001);
        Ok(PriceSnapshot {
            price,
            bid: money::to_price(price - half_spread),
            ask: money::to_price(price + half_spread),
            spread_pct: money::quantize(rust_decimal_macros::dec!(0.02), PERCENT_SCALE),
            latency_ms: 1,
        })
    }
}
