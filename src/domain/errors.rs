use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Stable refusal codes surfaced in audit entries, API responses and logs.
///
/// Codes are part of the external contract and never change meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Webhook signature verification failed.
    BadSignature,
    /// Guardian hard stop is engaged.
    GuardianLocked,
    /// Invalid trade lifecycle transition.
    InvalidTransition,
    /// Required configuration key missing at startup.
    MissingConfig,
    /// Price drifted beyond the slippage threshold.
    SlippageExceeded,
    /// Approval request expired before a decision.
    HitlTimeout,
    /// Persisted row failed hash verification.
    HashMismatch,
    /// Operator is not in the allowed set.
    OperatorNotAllowed,
    /// Risk governor produced a zero quantity.
    RiskQtyZero,
    /// Planned risk exceeds the per-trade cap.
    RiskCapExceeded,
    /// Float token found in a decimal field.
    FloatRejected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::BadSignature => "SEC-001",
            ErrorCode::GuardianLocked => "SEC-020",
            ErrorCode::InvalidTransition => "SEC-030",
            ErrorCode::MissingConfig => "SEC-040",
            ErrorCode::SlippageExceeded => "SEC-050",
            ErrorCode::HitlTimeout => "SEC-060",
            ErrorCode::HashMismatch => "SEC-080",
            ErrorCode::OperatorNotAllowed => "SEC-090",
            ErrorCode::RiskQtyZero => "RISK-001",
            ErrorCode::RiskCapExceeded => "RISK-002",
            ErrorCode::FloatRejected => "AUD-001",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors on the webhook ingress path. Mapped to HTTP 401/400/503 and
/// nothing else; the signal source never learns internal failure detail.
#[derive(Debug, Error)]
pub enum IngressError {
    #[error("{}: webhook signature verification failed", ErrorCode::BadSignature)]
    BadSignature,

    #[error("malformed signal body: {reason}")]
    MalformedBody { reason: String },

    #[error("{}: float token in decimal field '{field}'", ErrorCode::FloatRejected)]
    FloatField { field: String },

    #[error("ingress queue is full")]
    Backpressure,
}

impl IngressError {
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            IngressError::BadSignature => Some(ErrorCode::BadSignature),
            IngressError::FloatField { .. } => Some(ErrorCode::FloatRejected),
            IngressError::MalformedBody { .. } | IngressError::Backpressure => None,
        }
    }
}

/// Refusals and failures from the HITL approval gateway.
#[derive(Debug, Error)]
pub enum HitlError {
    #[error("{}: guardian is LOCKED", ErrorCode::GuardianLocked)]
    GuardianLocked { correlation_id: Uuid },

    #[error("{}: invalid transition {from} -> {to}", ErrorCode::InvalidTransition)]
    InvalidTransition { from: String, to: String },

    #[error("{}: row hash mismatch for trade {trade_id}", ErrorCode::HashMismatch)]
    HashMismatch { trade_id: String },

    #[error(
        "{}: slippage {deviation_pct}% exceeds threshold {threshold_pct}%",
        ErrorCode::SlippageExceeded
    )]
    SlippageExceeded {
        deviation_pct: Decimal,
        threshold_pct: Decimal,
    },

    #[error("{}: operator '{operator_id}' is not whitelisted", ErrorCode::OperatorNotAllowed)]
    OperatorNotAllowed { operator_id: String },

    #[error("{}: approval request {trade_id} has expired", ErrorCode::HitlTimeout)]
    Expired { trade_id: String },

    #[error("approval request {trade_id} not found")]
    NotFound { trade_id: String },

    /// The conditional write lost a race: the row left the expected status.
    #[error("{}: request {trade_id} is no longer awaiting approval", ErrorCode::InvalidTransition)]
    StateConflict { trade_id: String },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl HitlError {
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            HitlError::GuardianLocked { .. } => Some(ErrorCode::GuardianLocked),
            HitlError::InvalidTransition { .. } | HitlError::StateConflict { .. } => {
                Some(ErrorCode::InvalidTransition)
            }
            HitlError::HashMismatch { .. } => Some(ErrorCode::HashMismatch),
            HitlError::SlippageExceeded { .. } => Some(ErrorCode::SlippageExceeded),
            HitlError::OperatorNotAllowed { .. } => Some(ErrorCode::OperatorNotAllowed),
            HitlError::Expired { .. } => Some(ErrorCode::HitlTimeout),
            HitlError::NotFound { .. } | HitlError::Storage(_) => None,
        }
    }
}

/// Risk governor refusals.
#[derive(Debug, Error)]
pub enum RiskError {
    #[error("risk inputs rejected: {reason}")]
    InvalidInputs { reason: String },

    #[error("{}: position size rounds to zero", ErrorCode::RiskQtyZero)]
    QtyZero,

    #[error(
        "{}: planned risk R{planned_zar} exceeds cap R{cap_zar}",
        ErrorCode::RiskCapExceeded
    )]
    CapExceeded {
        planned_zar: Decimal,
        cap_zar: Decimal,
    },

    #[error("trade notional R{notional_zar} below minimum R{min_zar}")]
    BelowMinimum {
        notional_zar: Decimal,
        min_zar: Decimal,
    },
}

impl RiskError {
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            RiskError::QtyZero | RiskError::BelowMinimum { .. } => Some(ErrorCode::RiskQtyZero),
            RiskError::CapExceeded { .. } => Some(ErrorCode::RiskCapExceeded),
            RiskError::InvalidInputs { .. } => None,
        }
    }
}

/// Startup configuration failures. Fail-closed: the process refuses to start.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{}: required configuration key '{key}' is missing", ErrorCode::MissingConfig)]
    Missing { key: &'static str },

    #[error("configuration key '{key}' is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },
}
