use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

impl std::str::FromStr for OrderSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUY" => Ok(OrderSide::Buy),
            "SELL" => Ok(OrderSide::Sell),
            other => Err(format!("invalid order side: {other}")),
        }
    }
}

/// Exchange-visible order status, as reported by the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

/// A live order as seen by the exchange port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeOrder {
    pub order_id: String,
    pub correlation_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub limit_price: Decimal,
    pub quantity: Decimal,
    pub status: OrderStatus,
    pub filled_qty: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub submitted_at: DateTime<Utc>,
}

/// Final classification of one reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconciliationOutcome {
    Filled,
    PartiallyFilled,
    Cancelled,
    MockFilled,
    Failed,
}

impl fmt::Display for ReconciliationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReconciliationOutcome::Filled => "FILLED",
            ReconciliationOutcome::PartiallyFilled => "PARTIALLY_FILLED",
            ReconciliationOutcome::Cancelled => "CANCELLED",
            ReconciliationOutcome::MockFilled => "MOCK_FILLED",
            ReconciliationOutcome::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Result of driving one permit through the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reconciliation {
    pub correlation_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub outcome: ReconciliationOutcome,
    pub filled_qty: Decimal,
    pub avg_price: Option<Decimal>,
    /// Deviation between average fill and permitted entry, in percent.
    pub slippage_pct: Decimal,
    pub execution_time_ms: u64,
}

/// Outcome class of a closed trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeOutcome {
    Win,
    Loss,
    Breakeven,
}

impl fmt::Display for TradeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TradeOutcome::Win => "WIN",
            TradeOutcome::Loss => "LOSS",
            TradeOutcome::Breakeven => "BREAKEVEN",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for TradeOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WIN" => Ok(TradeOutcome::Win),
            "LOSS" => Ok(TradeOutcome::Loss),
            "BREAKEVEN" => Ok(TradeOutcome::Breakeven),
            other => Err(format!("invalid trade outcome: {other}")),
        }
    }
}

/// A completed round trip, persisted for the circuit breaker and learning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub id: String,
    pub correlation_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub quantity: Decimal,
    pub pnl_zar: Decimal,
    /// P&L as a fraction of the day's starting equity, captured at close so
    /// the circuit breaker can stay headless over trade rows alone.
    pub pnl_pct: Decimal,
    pub outcome: TradeOutcome,
    pub closed_at: DateTime<Utc>,
}

impl ClosedTrade {
    pub fn classify(pnl_zar: Decimal) -> TradeOutcome {
        if pnl_zar > Decimal::ZERO {
            TradeOutcome::Win
        } else if pnl_zar < Decimal::ZERO {
            TradeOutcome::Loss
        } else {
            TradeOutcome::Breakeven
        }
    }
}
