//! Risk governor.
//!
//! Pure permit derivation from equity and stop distance. If this module
//! returns an error the trade is aborted and logged as RISK-REJECTED; there
//! is no path around it.

use crate::domain::errors::RiskError;
use crate::domain::money::{self, PERCENT_SCALE, ZAR_SCALE};
use crate::domain::permit::ExecutionPermit;
use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use std::sync::Arc;
use uuid::Uuid;

/// Fraction of equity risked per trade.
const RISK_PER_TRADE_PCT: Decimal = dec!(0.01);
/// Minimum stop distance as a fraction of entry; anything tighter is
/// malformed data, not a tradeable setup.
const MIN_STOP_DISTANCE_RATIO: Decimal = dec!(0.000001);
/// Permit bound: maximum slippage the order manager may tolerate.
pub const DEFAULT_MAX_SLIPPAGE_PCT: Decimal = dec!(0.005);
/// Permit bound: reconciliation deadline.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

pub struct RiskGovernor {
    max_risk_zar: Decimal,
    min_trade_zar: Decimal,
    lot_size: Decimal,
}

impl RiskGovernor {
    pub fn new(max_risk_zar: Decimal, min_trade_zar: Decimal, lot_size: Decimal) -> Self {
        Self {
            max_risk_zar,
            min_trade_zar,
            lot_size,
        }
    }

    pub fn from_config(config: &crate::config::Config) -> Arc<Self> {
        Arc::new(Self::new(config.max_risk_zar, config.min_trade_zar, config.lot_size))
    }

    /// Derive an execution permit, or refuse.
    ///
    /// risk = min(equity x 1%, MAX_RISK_ZAR); qty = risk / |entry - stop|,
    /// rounded DOWN to the instrument lot. The permit's slippage and timeout
    /// bounds are fixed here; callers cannot widen them.
    pub fn issue_permit(
        &self,
        correlation_id: Uuid,
        equity_zar: Decimal,
        entry_price: Decimal,
        stop_price: Decimal,
        atr: Option<Decimal>,
    ) -> Result<ExecutionPermit, RiskError> {
        if entry_price <= Decimal::ZERO {
            return Err(RiskError::InvalidInputs {
                reason: "entry price must be positive".to_string(),
            });
        }
        if stop_price <= Decimal::ZERO {
            return Err(RiskError::InvalidInputs {
                reason: "stop price must be positive".to_string(),
            });
        }
        if let Some(atr) = atr
            && atr <= Decimal::ZERO
        {
            return Err(RiskError::InvalidInputs {
                reason: "ATR must be positive when supplied".to_string(),
            });
        }

        let stop_distance = (entry_price - stop_price).abs();
        if stop_distance / entry_price < MIN_STOP_DISTANCE_RATIO {
            return Err(RiskError::InvalidInputs {
                reason: "stop distance is degenerate".to_string(),
            });
        }

        let risk_zar = money::quantize(
            (equity_zar * RISK_PER_TRADE_PCT).min(self.max_risk_zar),
            ZAR_SCALE,
        );
        if risk_zar <= Decimal::ZERO {
            return Err(RiskError::QtyZero);
        }

        let raw_qty = risk_zar / stop_distance;
        let approved_qty = (raw_qty / self.lot_size)
            .round_dp_with_strategy(0, RoundingStrategy::ToZero)
            * self.lot_size;
        if approved_qty <= Decimal::ZERO {
            return Err(RiskError::QtyZero);
        }

        let notional_zar = money::quantize(approved_qty * entry_price, ZAR_SCALE);
        if notional_zar < self.min_trade_zar {
            return Err(RiskError::BelowMinimum {
                notional_zar,
                min_zar: self.min_trade_zar,
            });
        }

        let planned_risk_zar = money::quantize(approved_qty * stop_distance, ZAR_SCALE);
        if planned_risk_zar > self.max_risk_zar {
            return Err(RiskError::CapExceeded {
                planned_zar: planned_risk_zar,
                cap_zar: self.max_risk_zar,
            });
        }

        Ok(ExecutionPermit {
            correlation_id,
            approved_qty,
            entry_price: money::to_price(entry_price),
            stop_price: money::to_price(stop_price),
            max_slippage_pct: money::quantize(DEFAULT_MAX_SLIPPAGE_PCT, PERCENT_SCALE),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            planned_risk_zar,
            created_at: Utc::now(),
        })
    }
}
