use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An immutable authorization to place exactly one order.
///
/// Issued by the risk governor; consumed at most once by the order manager.
/// Callers may narrow but never widen the slippage and timeout bounds, which
/// is enforced by there being no mutators here at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPermit {
    pub correlation_id: Uuid,
    pub approved_qty: Decimal,
    pub entry_price: Decimal,
    pub stop_price: Decimal,
    pub max_slippage_pct: Decimal,
    pub timeout_seconds: u64,
    pub planned_risk_zar: Decimal,
    pub created_at: DateTime<Utc>,
}
