//! HITL approval records and the trade lifecycle state machine.
//!
//! Every trade passes through a strict state machine with AWAITING_APPROVAL
//! as the mandatory gate:
//!
//! ```text
//! PENDING -> AWAITING_APPROVAL -> {APPROVED, REJECTED, EXPIRED}
//! APPROVED -> FILLED -> CLOSED -> SETTLED
//! ```
//!
//! REJECTED and SETTLED are terminal. Invalid transitions fail SEC-030 and
//! change nothing. The approval row carries a SHA-256 row hash over the
//! canonical JSON of every other field, recomputed on each transition and
//! verified on every read.

use crate::domain::errors::HitlError;
use crate::domain::hashing;
use crate::domain::money;
use crate::domain::orders::OrderSide;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use uuid::Uuid;

/// Rejection reason recorded when a request expires undecided.
pub const REASON_HITL_TIMEOUT: &str = "HITL_TIMEOUT";
/// Rejection reason recorded when the Guardian lock cascades.
pub const REASON_GUARDIAN_LOCK: &str = "GUARDIAN_LOCK";
/// Rejection reason recorded when a persisted row fails hash verification.
pub const REASON_HASH_MISMATCH: &str = "HASH_MISMATCH";
/// Rejection reason recorded when the slippage guard refuses an approval.
pub const REASON_SLIPPAGE_EXCEEDED: &str = "SLIPPAGE_EXCEEDED";
/// Approval reason recorded when the gateway runs in disabled mode.
pub const REASON_HITL_DISABLED: &str = "HITL_DISABLED";

/// Persisted status of an approval row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalStatus {
    AwaitingApproval,
    Approved,
    Rejected,
    Expired,
}

impl ApprovalStatus {
    pub fn is_terminal(self) -> bool {
        self != ApprovalStatus::AwaitingApproval
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApprovalStatus::AwaitingApproval => "AWAITING_APPROVAL",
            ApprovalStatus::Approved => "APPROVED",
            ApprovalStatus::Rejected => "REJECTED",
            ApprovalStatus::Expired => "EXPIRED",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ApprovalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AWAITING_APPROVAL" => Ok(ApprovalStatus::AwaitingApproval),
            "APPROVED" => Ok(ApprovalStatus::Approved),
            "REJECTED" => Ok(ApprovalStatus::Rejected),
            "EXPIRED" => Ok(ApprovalStatus::Expired),
            other => Err(format!("invalid approval status: {other}")),
        }
    }
}

/// Full trade lifecycle state, spanning approval and reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeState {
    Pending,
    AwaitingApproval,
    Approved,
    Rejected,
    Expired,
    Filled,
    Closed,
    Settled,
}

impl fmt::Display for TradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TradeState::Pending => "PENDING",
            TradeState::AwaitingApproval => "AWAITING_APPROVAL",
            TradeState::Approved => "APPROVED",
            TradeState::Rejected => "REJECTED",
            TradeState::Expired => "EXPIRED",
            TradeState::Filled => "FILLED",
            TradeState::Closed => "CLOSED",
            TradeState::Settled => "SETTLED",
        };
        f.write_str(s)
    }
}

/// The only transitions the system will ever persist.
pub const VALID_TRANSITIONS: &[(TradeState, TradeState)] = &[
    (TradeState::Pending, TradeState::AwaitingApproval),
    (TradeState::AwaitingApproval, TradeState::Approved),
    (TradeState::AwaitingApproval, TradeState::Rejected),
    (TradeState::AwaitingApproval, TradeState::Expired),
    (TradeState::Approved, TradeState::Filled),
    (TradeState::Filled, TradeState::Closed),
    (TradeState::Closed, TradeState::Settled),
];

/// Validate a lifecycle transition; SEC-030 on anything not whitelisted.
pub fn validate_transition(from: TradeState, to: TradeState) -> Result<(), HitlError> {
    if VALID_TRANSITIONS.contains(&(from, to)) {
        Ok(())
    } else {
        Err(HitlError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

impl From<ApprovalStatus> for TradeState {
    fn from(status: ApprovalStatus) -> Self {
        match status {
            ApprovalStatus::AwaitingApproval => TradeState::AwaitingApproval,
            ApprovalStatus::Approved => TradeState::Approved,
            ApprovalStatus::Rejected => TradeState::Rejected,
            ApprovalStatus::Expired => TradeState::Expired,
        }
    }
}

/// Which channel produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionChannel {
    Api,
    Discord,
    System,
}

impl fmt::Display for DecisionChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DecisionChannel::Api => "API",
            DecisionChannel::Discord => "DISCORD",
            DecisionChannel::System => "SYSTEM",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for DecisionChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "API" => Ok(DecisionChannel::Api),
            "DISCORD" => Ok(DecisionChannel::Discord),
            "SYSTEM" => Ok(DecisionChannel::System),
            other => Err(format!("invalid decision channel: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionType {
    Approve,
    Reject,
}

/// Market snapshot captured when the approval request is created, so the
/// operator decides against the same picture the system saw.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub price: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
    pub spread_pct: Decimal,
    pub latency_ms: u64,
}

/// A human-approval record. Mutated only through [`ApprovalRequest::apply_transition`],
/// which revalidates the state machine and recomputes the row hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub correlation_id: Uuid,
    pub trade_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub qty: Decimal,
    pub request_price: Decimal,
    pub snapshot: PriceSnapshot,
    pub ttl_seconds: u64,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decision_channel: Option<DecisionChannel>,
    pub operator_id: Option<String>,
    pub reason: Option<String>,
    pub row_hash: String,
}

/// Canonical timestamp rendering used inside row hashes and persistence.
/// Microsecond precision; truncation is deterministic so a value hashed
/// before persistence re-hashes identically after a round trip.
pub fn canonical_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl ApprovalRequest {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        correlation_id: Uuid,
        trade_id: String,
        symbol: String,
        side: OrderSide,
        qty: Decimal,
        request_price: Decimal,
        snapshot: PriceSnapshot,
        ttl_seconds: u64,
    ) -> Self {
        let created_at = Utc::now();
        let mut request = Self {
            correlation_id,
            trade_id,
            symbol,
            side,
            qty,
            request_price,
            snapshot,
            ttl_seconds,
            status: ApprovalStatus::AwaitingApproval,
            created_at,
            expires_at: created_at + chrono::Duration::seconds(ttl_seconds as i64),
            decided_at: None,
            decision_channel: None,
            operator_id: None,
            reason: None,
            row_hash: String::new(),
        };
        request.row_hash = request.compute_row_hash();
        request
    }

    /// Canonical JSON of every field except `row_hash`.
    fn canonical_value(&self) -> Value {
        json!({
            "correlation_id": self.correlation_id.to_string(),
            "trade_id": self.trade_id,
            "symbol": self.symbol,
            "side": self.side.to_string(),
            "qty": money::canonical_string(self.qty),
            "request_price": money::canonical_string(self.request_price),
            "snapshot_price": money::canonical_string(self.snapshot.price),
            "snapshot_bid": money::canonical_string(self.snapshot.bid),
            "snapshot_ask": money::canonical_string(self.snapshot.ask),
            "snapshot_spread_pct": money::canonical_string(self.snapshot.spread_pct),
            "snapshot_latency_ms": self.snapshot.latency_ms,
            "ttl_seconds": self.ttl_seconds,
            "status": self.status.to_string(),
            "created_at": canonical_timestamp(self.created_at),
            "expires_at": canonical_timestamp(self.expires_at),
            "decided_at": self.decided_at.map(canonical_timestamp),
            "decision_channel": self.decision_channel.map(|c| c.to_string()),
            "operator_id": self.operator_id,
            "reason": self.reason,
        })
    }

    pub fn compute_row_hash(&self) -> String {
        hashing::row_hash(&self.canonical_value())
    }

    pub fn verify_row_hash(&self) -> bool {
        self.row_hash == self.compute_row_hash()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Apply a terminal decision. Validates the state machine, stamps the
    /// decision context and recomputes the row hash. The caller persists the
    /// result with a conditional write keyed on the prior status.
    pub fn apply_transition(
        &self,
        to: ApprovalStatus,
        channel: DecisionChannel,
        operator_id: Option<String>,
        reason: Option<String>,
    ) -> Result<ApprovalRequest, HitlError> {
        validate_transition(self.status.into(), to.into())?;

        let mut next = self.clone();
        next.status = to;
        next.decided_at = Some(Utc::now());
        next.decision_channel = Some(channel);
        next.operator_id = operator_id;
        next.reason = reason;
        next.row_hash = next.compute_row_hash();
        Ok(next)
    }
}
