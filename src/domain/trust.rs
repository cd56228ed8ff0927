use crate::domain::orders::{OrderSide, TradeOutcome};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Learned trust for one strategy fingerprint under one market regime.
///
/// The learned state of the trust governor is this table, nothing else: an
/// empirical, Laplace-smoothed win rate recomputed from persisted learning
/// events. `trust_probability` is always in [0,1] at scale 4.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustState {
    pub strategy_fingerprint: String,
    pub regime_tag: String,
    pub trust_probability: Decimal,
    pub training_sample_count: u64,
    pub updated_at: DateTime<Utc>,
}

/// Structured features captured when a trade closes. Raw source text never
/// lands here; only derived, numeric-or-tagged features are persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeLearningEvent {
    pub correlation_id: Uuid,
    pub strategy_fingerprint: String,
    pub regime_tag: String,
    pub symbol: String,
    pub side: OrderSide,
    pub timeframe: String,
    pub atr_pct: Decimal,
    pub volatility_regime: String,
    pub trend_state: String,
    pub spread_pct: Decimal,
    pub volume_ratio: Decimal,
    pub advisory_confidence: Decimal,
    pub consensus_score: Decimal,
    pub pnl_zar: Decimal,
    pub max_drawdown: Decimal,
    pub outcome: TradeOutcome,
    pub closed_at: DateTime<Utc>,
}
