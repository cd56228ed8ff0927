use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Why the Guardian engaged the hard stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockReason {
    DailyLossExceeded,
    Manual,
    Panic,
}

impl fmt::Display for LockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LockReason::DailyLossExceeded => "DAILY_LOSS_EXCEEDED",
            LockReason::Manual => "MANUAL",
            LockReason::Panic => "PANIC",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for LockReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DAILY_LOSS_EXCEEDED" => Ok(LockReason::DailyLossExceeded),
            "MANUAL" => Ok(LockReason::Manual),
            "PANIC" => Ok(LockReason::Panic),
            other => Err(format!("invalid lock reason: {other}")),
        }
    }
}

/// Durable record of an engaged hard stop. Rehydrated at startup so a lock
/// survives restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardianLock {
    pub lock_id: Uuid,
    pub locked_at: DateTime<Utc>,
    pub reason: LockReason,
    pub daily_loss_zar: Decimal,
    pub daily_loss_pct: Decimal,
    pub correlation_id: Option<Uuid>,
}

/// Result of one vitals check.
#[derive(Debug, Clone, Serialize)]
pub struct VitalsReport {
    pub checked_at: DateTime<Utc>,
    pub starting_equity_zar: Decimal,
    pub current_equity_zar: Decimal,
    pub daily_loss_zar: Decimal,
    pub daily_loss_pct: Decimal,
    pub locked: bool,
    pub lock: Option<GuardianLock>,
}
