//! HITL approval gateway.
//!
//! Exclusive owner of approval-record mutation. Every transition is a
//! conditional write keyed on the prior status, every record carries a row
//! hash verified on read, and every decision consults the Guardian first.
//! Timeout means REJECT, never auto-approve; the only auto-approval path is
//! the explicit disabled mode, and even that path checks the Guardian.

use crate::application::guardian::{Guardian, LockObserver};
use crate::application::hitl::slippage::SlippageGuard;
use crate::config::Config;
use crate::domain::audit::AuditRecord;
use crate::domain::errors::HitlError;
use crate::domain::events::TradingEvent;
use crate::domain::guardian::GuardianLock;
use crate::domain::hitl::{
    ApprovalRequest, ApprovalStatus, DecisionChannel, DecisionType, PriceSnapshot,
    REASON_GUARDIAN_LOCK, REASON_HASH_MISMATCH, REASON_HITL_DISABLED, REASON_HITL_TIMEOUT,
    REASON_SLIPPAGE_EXCEEDED,
};
use crate::domain::money::canonical_string;
use crate::domain::repositories::{ApprovalRepository, AuditLog};
use crate::domain::signal::Signal;
use crate::infrastructure::EventBus;
use crate::infrastructure::observability::Metrics;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use tracing::{info, warn};
use uuid::Uuid;

const ACTOR_GATEWAY: &str = "hitl_gateway";
const ACTOR_EXPIRY: &str = "hitl_expiry";
/// Rejection reason when an operator declines without giving one.
const REASON_OPERATOR_REJECTED: &str = "OPERATOR_REJECTED";

#[derive(Debug, Clone)]
pub struct HitlConfig {
    pub enabled: bool,
    pub ttl_seconds: u64,
    pub slippage_max_pct: Decimal,
    pub allowed_operators: HashSet<String>,
}

impl HitlConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            enabled: config.hitl_enabled,
            ttl_seconds: config.hitl_timeout_seconds,
            slippage_max_pct: config.hitl_slippage_max_percent,
            allowed_operators: config.hitl_allowed_operators.clone(),
        }
    }
}

/// Result of `create`: either the request is parked for a human, or disabled
/// mode produced a terminal system approval.
#[derive(Debug, Clone)]
pub enum CreateOutcome {
    AwaitingApproval(ApprovalRequest),
    AutoApproved(ApprovalRequest),
}

impl CreateOutcome {
    pub fn request(&self) -> &ApprovalRequest {
        match self {
            CreateOutcome::AwaitingApproval(r) | CreateOutcome::AutoApproved(r) => r,
        }
    }
}

#[derive(Debug, Default)]
pub struct RecoveryReport {
    pub recovered: Vec<String>,
    pub rejected_corrupt: Vec<String>,
    pub rejected_expired: Vec<String>,
}

#[derive(Debug, Default)]
pub struct PendingReport {
    pub requests: Vec<ApprovalRequest>,
    /// Trade ids omitted because their row hash did not verify.
    pub corrupt_omitted: Vec<String>,
}

pub struct HitlGateway {
    config: HitlConfig,
    approvals: Arc<dyn ApprovalRepository>,
    audit: Arc<dyn AuditLog>,
    guardian: Arc<Guardian>,
    bus: EventBus,
    metrics: Metrics,
    /// Handle to ourselves for spawning per-request expiry timers.
    weak_self: Weak<HitlGateway>,
}

impl HitlGateway {
    pub fn new(
        config: HitlConfig,
        approvals: Arc<dyn ApprovalRepository>,
        audit: Arc<dyn AuditLog>,
        guardian: Arc<Guardian>,
        bus: EventBus,
        metrics: Metrics,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            config,
            approvals,
            audit,
            guardian,
            bus,
            metrics,
            weak_self: weak.clone(),
        })
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.config.ttl_seconds
    }

    /// Create an approval request for a sized trade.
    ///
    /// The Guardian is consulted in every mode, including disabled mode.
    pub async fn create(
        &self,
        signal: &Signal,
        qty: Decimal,
        snapshot: PriceSnapshot,
    ) -> Result<CreateOutcome, HitlError> {
        if self.guardian.is_locked() {
            self.metrics.blocked_by_guardian_total.inc();
            self.audit
                .append(
                    &AuditRecord::new(
                        signal.correlation_id,
                        ACTOR_GATEWAY,
                        "HITL_CREATE",
                        "REFUSED",
                    )
                    .with_context(serde_json::json!({
                        "code": "SEC-020",
                        "symbol": signal.symbol,
                    })),
                )
                .await?;
            return Err(HitlError::GuardianLocked {
                correlation_id: signal.correlation_id,
            });
        }

        let request = ApprovalRequest::new(
            signal.correlation_id,
            format!("trd-{}", Uuid::new_v4()),
            signal.symbol.clone(),
            signal.side,
            qty,
            signal.price,
            snapshot,
            self.config.ttl_seconds,
        );

        if !self.config.enabled {
            // Disabled mode: terminal system approval, still fully audited.
            let approved = request.apply_transition(
                ApprovalStatus::Approved,
                DecisionChannel::System,
                None,
                Some(REASON_HITL_DISABLED.to_string()),
            )?;
            self.approvals.insert(&approved).await.map_err(HitlError::Storage)?;
            self.metrics.hitl_requests_total.inc();
            self.metrics.hitl_approvals_total.inc();
            self.audit
                .append(
                    &AuditRecord::new(
                        approved.correlation_id,
                        ACTOR_GATEWAY,
                        "HITL_AUTO_APPROVE",
                        "APPROVED",
                    )
                    .with_hashes(Some(request.row_hash.clone()), Some(approved.row_hash.clone()))
                    .with_context(serde_json::json!({
                        "reason": REASON_HITL_DISABLED,
                        "trade_id": approved.trade_id,
                    })),
                )
                .await?;
            self.bus
                .publish(TradingEvent::HitlAutoApproved {
                    request: approved.clone(),
                })
                .await;
            return Ok(CreateOutcome::AutoApproved(approved));
        }

        self.approvals.insert(&request).await.map_err(HitlError::Storage)?;
        self.metrics.hitl_requests_total.inc();
        self.audit
            .append(
                &AuditRecord::new(
                    request.correlation_id,
                    ACTOR_GATEWAY,
                    "HITL_CREATE",
                    "AWAITING_APPROVAL",
                )
                .with_hashes(None, Some(request.row_hash.clone()))
                .with_context(serde_json::json!({
                    "trade_id": request.trade_id,
                    "symbol": request.symbol,
                    "side": request.side.to_string(),
                    "qty": canonical_string(request.qty),
                    "request_price": canonical_string(request.request_price),
                    "expires_at": crate::domain::hitl::canonical_timestamp(request.expires_at),
                })),
            )
            .await?;
        self.bus
            .publish(TradingEvent::HitlCreated {
                request: request.clone(),
            })
            .await;

        info!(
            "HITL [{}]: created {} ({} {} {} @ {})",
            request.correlation_id,
            request.trade_id,
            request.side,
            request.qty,
            request.symbol,
            request.request_price
        );
        Ok(CreateOutcome::AwaitingApproval(request))
    }

    /// Arm a per-request expiry timer. The periodic worker is the safety net
    /// for timers lost to a restart.
    pub fn arm_expiry(&self, trade_id: String, expires_at: chrono::DateTime<Utc>) {
        let Some(gateway) = self.weak_self.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let wait = (expires_at - Utc::now())
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);
            tokio::time::sleep(wait).await;
            if let Err(e) = gateway.expire_one(&trade_id).await {
                warn!("HITL: per-request expiry for {trade_id} failed: {e}");
            }
        });
    }

    /// Process an operator decision.
    pub async fn decide(
        &self,
        trade_id: &str,
        operator_id: &str,
        decision: DecisionType,
        current_price: Decimal,
        channel: DecisionChannel,
        reason: Option<String>,
    ) -> Result<ApprovalRequest, HitlError> {
        // 1. Operator whitelist.
        if !self.config.allowed_operators.contains(operator_id) {
            self.audit
                .append(
                    &AuditRecord::new(Uuid::nil(), operator_id, "HITL_DECIDE", "REFUSED")
                        .with_context(serde_json::json!({
                            "code": "SEC-090",
                            "trade_id": trade_id,
                        })),
                )
                .await?;
            return Err(HitlError::OperatorNotAllowed {
                operator_id: operator_id.to_string(),
            });
        }

        // 2. Reload and verify integrity.
        let request = self
            .approvals
            .find_by_trade_id(trade_id)
            .await
            .map_err(HitlError::Storage)?
            .ok_or_else(|| HitlError::NotFound {
                trade_id: trade_id.to_string(),
            })?;

        if !request.verify_row_hash() {
            self.audit
                .append(
                    &AuditRecord::new(request.correlation_id, operator_id, "HITL_DECIDE", "REFUSED")
                        .with_context(serde_json::json!({
                            "code": "SEC-080",
                            "trade_id": trade_id,
                        })),
                )
                .await?;
            return Err(HitlError::HashMismatch {
                trade_id: trade_id.to_string(),
            });
        }

        if request.is_terminal() {
            return Err(HitlError::StateConflict {
                trade_id: trade_id.to_string(),
            });
        }

        // Expired but not yet swept: reject now rather than honor a stale
        // approval window.
        if request.is_expired_at(Utc::now()) {
            self.expire_request(&request).await?;
            return Err(HitlError::Expired {
                trade_id: trade_id.to_string(),
            });
        }

        // 3. Guardian re-check.
        if self.guardian.is_locked() {
            self.metrics.blocked_by_guardian_total.inc();
            return Err(HitlError::GuardianLocked {
                correlation_id: request.correlation_id,
            });
        }

        // 4. Slippage guard on approvals.
        let deviation_pct = match decision {
            DecisionType::Approve => {
                match SlippageGuard::new(self.config.slippage_max_pct)
                    .validate(request.request_price, current_price)
                {
                    Ok(deviation) => deviation,
                    Err(e) => {
                        self.reject_with_reason(
                            &request,
                            REASON_SLIPPAGE_EXCEEDED,
                            channel,
                            Some(operator_id.to_string()),
                        )
                        .await?;
                        return Err(e);
                    }
                }
            }
            DecisionType::Reject => Decimal::ZERO,
        };

        // 5. Terminal transition via conditional write.
        let (status, reason) = match decision {
            DecisionType::Approve => (ApprovalStatus::Approved, None),
            DecisionType::Reject => (
                ApprovalStatus::Rejected,
                Some(reason.unwrap_or_else(|| REASON_OPERATOR_REJECTED.to_string())),
            ),
        };
        let updated = request.apply_transition(
            status,
            channel,
            Some(operator_id.to_string()),
            reason.clone(),
        )?;
        let won = self
            .approvals
            .transition(&updated, ApprovalStatus::AwaitingApproval)
            .await
            .map_err(HitlError::Storage)?;
        if !won {
            return Err(HitlError::StateConflict {
                trade_id: trade_id.to_string(),
            });
        }

        // 6. Audit with before/after hashes and full decision context.
        self.audit
            .append(
                &AuditRecord::new(
                    updated.correlation_id,
                    operator_id,
                    "HITL_DECIDE",
                    updated.status.to_string(),
                )
                .with_hashes(Some(request.row_hash.clone()), Some(updated.row_hash.clone()))
                .with_context(serde_json::json!({
                    "trade_id": updated.trade_id,
                    "decision": format!("{decision:?}"),
                    "channel": channel.to_string(),
                    "current_price": canonical_string(current_price),
                    "deviation_pct": canonical_string(deviation_pct),
                    "reason": reason,
                })),
            )
            .await?;

        // 7. Metrics and events.
        match updated.status {
            ApprovalStatus::Approved => self.metrics.hitl_approvals_total.inc(),
            _ => self
                .metrics
                .hitl_rejections_total
                .with_label_values(&[updated
                    .reason
                    .as_deref()
                    .unwrap_or(REASON_OPERATOR_REJECTED)])
                .inc(),
        }
        let latency = (Utc::now() - updated.created_at).num_milliseconds() as f64 / 1000.0;
        self.metrics.hitl_response_latency_seconds.observe(latency);

        self.bus
            .publish(TradingEvent::HitlDecided {
                request: updated.clone(),
                decision,
            })
            .await;

        info!(
            "HITL [{}]: {} decided {} -> {}",
            updated.correlation_id, operator_id, updated.trade_id, updated.status
        );
        Ok(updated)
    }

    /// Reject an AWAITING_APPROVAL request with a system reason. Loses
    /// gracefully if the row moved first.
    async fn reject_with_reason(
        &self,
        request: &ApprovalRequest,
        reason: &str,
        channel: DecisionChannel,
        operator_id: Option<String>,
    ) -> Result<Option<ApprovalRequest>, HitlError> {
        let rejected = request.apply_transition(
            ApprovalStatus::Rejected,
            channel,
            operator_id,
            Some(reason.to_string()),
        )?;
        let won = self
            .approvals
            .transition(&rejected, ApprovalStatus::AwaitingApproval)
            .await
            .map_err(HitlError::Storage)?;
        if !won {
            return Ok(None);
        }

        self.metrics
            .hitl_rejections_total
            .with_label_values(&[reason])
            .inc();
        self.audit
            .append(
                &AuditRecord::new(
                    rejected.correlation_id,
                    ACTOR_GATEWAY,
                    "HITL_REJECT",
                    "REJECTED",
                )
                .with_hashes(Some(request.row_hash.clone()), Some(rejected.row_hash.clone()))
                .with_context(serde_json::json!({
                    "trade_id": rejected.trade_id,
                    "reason": reason,
                })),
            )
            .await?;
        Ok(Some(rejected))
    }

    async fn expire_request(&self, request: &ApprovalRequest) -> Result<(), HitlError> {
        let rejected = request.apply_transition(
            ApprovalStatus::Rejected,
            DecisionChannel::System,
            None,
            Some(REASON_HITL_TIMEOUT.to_string()),
        )?;
        let won = self
            .approvals
            .transition(&rejected, ApprovalStatus::AwaitingApproval)
            .await
            .map_err(HitlError::Storage)?;
        if !won {
            return Ok(());
        }

        self.metrics.hitl_rejections_timeout_total.inc();
        self.metrics
            .hitl_rejections_total
            .with_label_values(&[REASON_HITL_TIMEOUT])
            .inc();
        self.audit
            .append(
                &AuditRecord::new(
                    rejected.correlation_id,
                    ACTOR_EXPIRY,
                    "HITL_EXPIRE",
                    "REJECTED",
                )
                .with_hashes(Some(request.row_hash.clone()), Some(rejected.row_hash.clone()))
                .with_context(serde_json::json!({
                    "trade_id": rejected.trade_id,
                    "reason": REASON_HITL_TIMEOUT,
                })),
            )
            .await?;
        self.bus
            .publish(TradingEvent::HitlExpired {
                request: rejected.clone(),
            })
            .await;
        Ok(())
    }

    /// Expire one request by id if it is still awaiting and past its
    /// deadline. Used by per-request timers.
    pub async fn expire_one(&self, trade_id: &str) -> Result<()> {
        let Some(request) = self.approvals.find_by_trade_id(trade_id).await? else {
            return Ok(());
        };
        if request.status == ApprovalStatus::AwaitingApproval
            && request.is_expired_at(Utc::now())
        {
            self.expire_request(&request).await?;
        }
        Ok(())
    }

    /// Sweep every overdue request. Returns how many were expired.
    pub async fn expire_due(&self) -> Result<usize> {
        let due = self.approvals.awaiting_expired(Utc::now()).await?;
        let mut expired = 0;
        for request in due {
            self.expire_request(&request).await?;
            expired += 1;
        }
        Ok(expired)
    }

    /// Pending approvals ordered by expiry. Rows failing hash verification
    /// are omitted and reported, never served.
    pub async fn pending(&self) -> Result<PendingReport> {
        let mut report = PendingReport::default();
        for request in self.approvals.awaiting().await? {
            if request.verify_row_hash() {
                report.requests.push(request);
            } else {
                warn!(
                    "HITL: omitting {} from pending (row hash mismatch)",
                    request.trade_id
                );
                report.corrupt_omitted.push(request.trade_id.clone());
            }
        }
        Ok(report)
    }

    /// Startup recovery over every AWAITING_APPROVAL row.
    pub async fn recover_on_startup(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let now = Utc::now();

        for request in self.approvals.awaiting().await? {
            if !request.verify_row_hash() {
                // Tampered rows are terminated, not deleted: the evidence
                // stays in the table.
                self.reject_with_reason(
                    &request,
                    REASON_HASH_MISMATCH,
                    DecisionChannel::System,
                    None,
                )
                .await?;
                report.rejected_corrupt.push(request.trade_id.clone());
                continue;
            }

            if request.is_expired_at(now) {
                self.expire_request(&request).await?;
                report.rejected_expired.push(request.trade_id.clone());
                continue;
            }

            self.arm_expiry(request.trade_id.clone(), request.expires_at);
            self.bus
                .publish(TradingEvent::HitlRecovered {
                    request: request.clone(),
                })
                .await;
            report.recovered.push(request.trade_id.clone());
        }

        info!(
            "HITL recovery: {} recovered, {} corrupt, {} expired",
            report.recovered.len(),
            report.rejected_corrupt.len(),
            report.rejected_expired.len()
        );
        Ok(report)
    }
}

/// Guardian-lock cascade: every pending request is rejected before the
/// Guardian finishes its lock transition.
#[async_trait]
impl LockObserver for HitlGateway {
    async fn on_guardian_lock(&self, lock: &GuardianLock) {
        let pending = match self.approvals.awaiting().await {
            Ok(pending) => pending,
            Err(e) => {
                warn!("HITL: guardian cascade could not list pending requests: {e}");
                return;
            }
        };

        for request in pending {
            self.metrics.blocked_by_guardian_total.inc();
            match self
                .reject_with_reason(
                    &request,
                    REASON_GUARDIAN_LOCK,
                    DecisionChannel::System,
                    None,
                )
                .await
            {
                Ok(Some(rejected)) => {
                    self.bus
                        .publish(TradingEvent::HitlDecided {
                            request: rejected,
                            decision: DecisionType::Reject,
                        })
                        .await;
                }
                Ok(None) => {}
                Err(e) => warn!(
                    "HITL: guardian cascade failed for {} (lock {}): {e}",
                    request.trade_id, lock.lock_id
                ),
            }
        }
    }
}
