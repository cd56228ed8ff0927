//! Trading circuit breaker.
//!
//! Headless and firewalled: decisions come from persisted closed trades for
//! the current UTC day and nothing else. There is no override input; the
//! lockout clears only when its window expires. Limits are compile-time
//! constants.

use crate::domain::orders::TradeOutcome;
use crate::domain::repositories::ClosedTradeRepository;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Daily loss at or beyond this fraction locks trading for 24 hours.
const MAX_DAILY_LOSS_PCT: Decimal = dec!(-0.03);
/// This many consecutive losing trades lock trading for 12 hours.
const CONSECUTIVE_LOSS_LIMIT: usize = 3;

const DAILY_LOSS_LOCK_HOURS: i64 = 24;
const CONSECUTIVE_LOSS_LOCK_HOURS: i64 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockoutRule {
    DailyLoss,
    ConsecutiveLosses,
}

#[derive(Debug, Clone)]
pub enum LockoutDecision {
    Allowed,
    LockedOut {
        rule: LockoutRule,
        until: DateTime<Utc>,
        detail: String,
    },
}

impl LockoutDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, LockoutDecision::Allowed)
    }
}

pub struct TradingCircuitBreaker {
    trades: Arc<dyn ClosedTradeRepository>,
}

impl TradingCircuitBreaker {
    pub fn new(trades: Arc<dyn ClosedTradeRepository>) -> Self {
        Self { trades }
    }

    /// Evaluate the lockout rules, in order: daily loss first, then the
    /// consecutive-loss streak over the most recent closed trades.
    pub async fn check_trading_allowed(
        &self,
        correlation_id: Uuid,
    ) -> Result<LockoutDecision> {
        let now = Utc::now();

        let today = self.trades.closed_on(now.date_naive()).await?;
        if let Some(last) = today.last() {
            let daily_pnl_pct: Decimal = today.iter().map(|t| t.pnl_pct).sum();
            if daily_pnl_pct <= MAX_DAILY_LOSS_PCT {
                let until = last.closed_at + Duration::hours(DAILY_LOSS_LOCK_HOURS);
                if now < until {
                    let detail = format!(
                        "daily P&L {}% breached limit {}%",
                        daily_pnl_pct * Decimal::ONE_HUNDRED,
                        MAX_DAILY_LOSS_PCT * Decimal::ONE_HUNDRED
                    );
                    warn!("CircuitBreaker [{correlation_id}]: {detail}; locked until {until}");
                    return Ok(LockoutDecision::LockedOut {
                        rule: LockoutRule::DailyLoss,
                        until,
                        detail,
                    });
                }
            }
        }

        let recent = self.trades.most_recent(CONSECUTIVE_LOSS_LIMIT).await?;
        if recent.len() == CONSECUTIVE_LOSS_LIMIT
            && recent.iter().all(|t| t.outcome == TradeOutcome::Loss)
        {
            let newest = recent[0].closed_at;
            let until = newest + Duration::hours(CONSECUTIVE_LOSS_LOCK_HOURS);
            if now < until {
                let detail =
                    format!("{CONSECUTIVE_LOSS_LIMIT} consecutive losing trades");
                warn!("CircuitBreaker [{correlation_id}]: {detail}; locked until {until}");
                return Ok(LockoutDecision::LockedOut {
                    rule: LockoutRule::ConsecutiveLosses,
                    until,
                    detail,
                });
            }
        }

        Ok(LockoutDecision::Allowed)
    }
}
