//! Repository traits for durable state.
//!
//! Storage implementations live under `infrastructure::persistence`. Traits
//! return `anyhow::Result`; domain-level refusals (hash mismatch, invalid
//! transition) are decided by the services, not here. The append-only
//! guarantees (audit log, approvals) are enforced twice: conditional writes
//! here, DELETE/UPDATE-blocking triggers in the schema.

use crate::domain::audit::AuditRecord;
use crate::domain::guardian::GuardianLock;
use crate::domain::hitl::{ApprovalRequest, ApprovalStatus};
use crate::domain::orders::ClosedTrade;
use crate::domain::signal::Signal;
use crate::domain::trust::{TradeLearningEvent, TrustState};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

/// Outcome of an idempotent signal insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalInsert {
    Inserted(Uuid),
    /// A row with the same (source, external_id) already exists; carries its
    /// correlation id.
    Duplicate(Uuid),
}

#[async_trait]
pub trait SignalRepository: Send + Sync {
    /// Insert once, keyed by (source, external_id).
    async fn insert(&self, signal: &Signal) -> Result<SignalInsert>;

    async fn find_by_correlation(&self, correlation_id: Uuid) -> Result<Option<Signal>>;
}

#[async_trait]
pub trait ApprovalRepository: Send + Sync {
    async fn insert(&self, request: &ApprovalRequest) -> Result<()>;

    async fn find_by_trade_id(&self, trade_id: &str) -> Result<Option<ApprovalRequest>>;

    /// All AWAITING_APPROVAL rows ordered by `expires_at` ascending.
    async fn awaiting(&self) -> Result<Vec<ApprovalRequest>>;

    /// AWAITING_APPROVAL rows whose `expires_at` is at or before `now`.
    async fn awaiting_expired(&self, now: DateTime<Utc>) -> Result<Vec<ApprovalRequest>>;

    /// Conditional write keyed on the prior status. Returns `false` when the
    /// row was not in `expected` (somebody else transitioned it first);
    /// nothing is written in that case.
    async fn transition(
        &self,
        updated: &ApprovalRequest,
        expected: ApprovalStatus,
    ) -> Result<bool>;
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, record: &AuditRecord) -> Result<()>;

    async fn find_by_correlation(&self, correlation_id: Uuid) -> Result<Vec<AuditRecord>>;
}

#[async_trait]
pub trait ClosedTradeRepository: Send + Sync {
    async fn append(&self, trade: &ClosedTrade) -> Result<()>;

    /// Closed trades for one UTC day, oldest first.
    async fn closed_on(&self, day: NaiveDate) -> Result<Vec<ClosedTrade>>;

    /// Most recent closed trades regardless of age, newest first.
    async fn most_recent(&self, limit: usize) -> Result<Vec<ClosedTrade>>;
}

#[async_trait]
pub trait GuardianLockRepository: Send + Sync {
    async fn save(&self, lock: &GuardianLock) -> Result<()>;

    async fn load(&self) -> Result<Option<GuardianLock>>;

    async fn clear(&self) -> Result<()>;
}

#[async_trait]
pub trait TrustStateRepository: Send + Sync {
    async fn upsert(&self, state: &TrustState) -> Result<()>;

    async fn find(&self, fingerprint: &str, regime: &str) -> Result<Option<TrustState>>;
}

#[async_trait]
pub trait LearningEventRepository: Send + Sync {
    async fn append(&self, event: &TradeLearningEvent) -> Result<()>;

    async fn all(&self) -> Result<Vec<TradeLearningEvent>>;
}
