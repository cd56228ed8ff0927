use crate::domain::hitl::PriceSnapshot;
use crate::domain::orders::{ExchangeOrder, OrderSide};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

// Need async_trait for async functions in traits
#[async_trait]
pub trait ExchangeService: Send + Sync {
    async fn submit_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        limit_price: Decimal,
        correlation_id: Uuid,
    ) -> Result<ExchangeOrder>;

    async fn order_status(&self, order_id: &str) -> Result<ExchangeOrder>;

    async fn cancel_order(&self, order_id: &str) -> Result<()>;

    /// True for simulated venues; fills are classified MOCK_FILLED.
    fn is_mock(&self) -> bool {
        false
    }
}

#[async_trait]
pub trait MarketSnapshotService: Send + Sync {
    async fn snapshot(&self, symbol: &str) -> Result<PriceSnapshot>;
}

#[async_trait]
pub trait EquityService: Send + Sync {
    async fn current_equity_zar(&self) -> Result<Decimal>;
}
