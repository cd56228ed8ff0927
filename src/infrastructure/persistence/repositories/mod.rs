mod approval_repository;
mod audit_repository;
mod closed_trade_repository;
mod guardian_lock_repository;
mod learning_event_repository;
mod signal_repository;
mod trust_state_repository;

pub use approval_repository::SqliteApprovalRepository;
pub use audit_repository::SqliteAuditLog;
pub use closed_trade_repository::SqliteClosedTradeRepository;
pub use guardian_lock_repository::SqliteGuardianLockRepository;
pub use learning_event_repository::SqliteLearningEventRepository;
pub use signal_repository::SqliteSignalRepository;
pub use trust_state_repository::SqliteTrustStateRepository;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;

/// Parse a canonical TEXT decimal column.
pub(crate) fn decimal_column(raw: &str, column: &str) -> Result<Decimal> {
    Decimal::from_str(raw).with_context(|| format!("invalid decimal in column {column}: {raw}"))
}

/// Parse a canonical RFC 3339 timestamp column.
pub(crate) fn timestamp_column(raw: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("invalid timestamp in column {column}: {raw}"))
}

/// Parse an enum stored as its display string.
pub(crate) fn enum_column<T: FromStr<Err = String>>(raw: &str, column: &str) -> Result<T> {
    raw.parse::<T>()
        .map_err(|e| anyhow!("invalid value in column {column}: {e}"))
}
