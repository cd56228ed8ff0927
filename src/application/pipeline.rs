//! Per-signal pulse.
//!
//! policy -> risk governor -> HITL -> order manager -> trade close. Each
//! stage is a gate: a refusal stops the signal, is audited with its code and
//! never propagates as a process failure (Safe-Idle). The pipeline holds the
//! only copy of each issued permit and hands it to the order manager at most
//! once.

use crate::application::circuit_breaker::{LockoutDecision, TradingCircuitBreaker};
use crate::application::guardian::Guardian;
use crate::application::hitl::gateway::{CreateOutcome, HitlGateway};
use crate::application::order_manager::OrderManager;
use crate::application::policy::PermissionPolicy;
use crate::application::rgi::RewardGovernor;
use crate::application::risk_governor::RiskGovernor;
use crate::domain::audit::AuditRecord;
use crate::domain::errors::HitlError;
use crate::domain::guardian::VitalsReport;
use crate::domain::hitl::{ApprovalRequest, TradeState, validate_transition};
use crate::domain::money::{self, ZAR_SCALE};
use crate::domain::orders::{ClosedTrade, Reconciliation, ReconciliationOutcome};
use crate::domain::permit::ExecutionPermit;
use crate::domain::policy::{
    BudgetSignal, HealthStatus, PolicyContext, RiskAssessment, TradePermission,
};
use crate::domain::ports::{EquityService, MarketSnapshotService};
use crate::domain::repositories::{AuditLog, ClosedTradeRepository, LearningEventRepository};
use crate::domain::signal::Signal;
use crate::domain::trust::TradeLearningEvent;
use crate::infrastructure::observability::Metrics;
use anyhow::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

/// Stop distance assumed when a recovered approval lost its permit to a
/// restart and the signal carried no stop of its own.
const FALLBACK_STOP_DISTANCE_PCT: Decimal = dec!(0.01);
/// ATR multiple used to derive a stop when only ATR is supplied.
const ATR_STOP_MULTIPLE: Decimal = dec!(2);

#[derive(Debug)]
pub enum PipelineOutcome {
    Refused {
        stage: &'static str,
        reason: String,
    },
    AwaitingApproval {
        trade_id: String,
    },
    Executed {
        reconciliation: Reconciliation,
    },
}

pub struct SignalPipeline {
    policy: Arc<PermissionPolicy>,
    breaker: Arc<TradingCircuitBreaker>,
    risk: Arc<RiskGovernor>,
    rgi: Arc<RewardGovernor>,
    hitl: Arc<HitlGateway>,
    orders: Arc<OrderManager>,
    guardian: Arc<Guardian>,
    equity: Arc<dyn EquityService>,
    market: Arc<dyn MarketSnapshotService>,
    audit: Arc<dyn AuditLog>,
    trades: Arc<dyn ClosedTradeRepository>,
    learning: Arc<dyn LearningEventRepository>,
    metrics: Metrics,
    daily_loss_limit_pct: Decimal,
    health: RwLock<HealthStatus>,
    latest_vitals: RwLock<Option<VitalsReport>>,
    /// Issued permits parked while their trade awaits approval. Consumed at
    /// most once.
    pending_permits: Mutex<HashMap<String, ExecutionPermit>>,
}

impl SignalPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        policy: Arc<PermissionPolicy>,
        breaker: Arc<TradingCircuitBreaker>,
        risk: Arc<RiskGovernor>,
        rgi: Arc<RewardGovernor>,
        hitl: Arc<HitlGateway>,
        orders: Arc<OrderManager>,
        guardian: Arc<Guardian>,
        equity: Arc<dyn EquityService>,
        market: Arc<dyn MarketSnapshotService>,
        audit: Arc<dyn AuditLog>,
        trades: Arc<dyn ClosedTradeRepository>,
        learning: Arc<dyn LearningEventRepository>,
        metrics: Metrics,
        daily_loss_limit_pct: Decimal,
    ) -> Self {
        Self {
            policy,
            breaker,
            risk,
            rgi,
            hitl,
            orders,
            guardian,
            equity,
            market,
            audit,
            trades,
            learning,
            metrics,
            daily_loss_limit_pct,
            health: RwLock::new(HealthStatus::Green),
            latest_vitals: RwLock::new(None),
            pending_permits: Mutex::new(HashMap::new()),
        }
    }

    /// Fed by the vitals loop.
    pub async fn update_vitals(&self, report: VitalsReport) {
        *self.latest_vitals.write().await = Some(report);
    }

    pub async fn set_health(&self, health: HealthStatus) {
        *self.health.write().await = health;
    }

    async fn policy_context(&self, signal: &Signal) -> PolicyContext {
        let budget_signal = match self.breaker.check_trading_allowed(signal.correlation_id).await
        {
            Ok(LockoutDecision::Allowed) => Some(BudgetSignal::Allow),
            Ok(LockoutDecision::LockedOut { .. }) => Some(BudgetSignal::Halt),
            // A breaker that cannot answer is a breaker that says no.
            Err(e) => {
                warn!("Pipeline: circuit breaker unavailable: {e}");
                None
            }
        };

        let risk_assessment = self.latest_vitals.read().await.as_ref().map(|v| {
            let limit = self.daily_loss_limit_pct;
            if v.daily_loss_pct >= limit {
                RiskAssessment::Critical
            } else if v.daily_loss_pct >= limit * dec!(0.75) {
                RiskAssessment::High
            } else if v.daily_loss_pct >= limit * dec!(0.5) {
                RiskAssessment::Medium
            } else {
                RiskAssessment::Low
            }
        });

        PolicyContext {
            kill_switch_active: Some(self.guardian.is_locked()),
            budget_signal,
            health_status: Some(*self.health.read().await),
            risk_assessment,
        }
    }

    /// Drive one signal through every gate.
    pub async fn handle_signal(&self, signal: Signal) -> Result<PipelineOutcome> {
        let corr = signal.correlation_id;

        // Final authority first.
        let ctx = self.policy_context(&signal).await;
        let decision = self.policy.evaluate(&ctx, corr);
        if decision.permission != TradePermission::Allow {
            self.refuse(
                corr,
                "policy",
                &format!(
                    "{} via {} ({})",
                    decision.permission,
                    decision.blocking_gate.unwrap_or("none"),
                    decision.reason
                ),
            )
            .await?;
            return Ok(PipelineOutcome::Refused {
                stage: "policy",
                reason: decision.reason,
            });
        }

        // Advisory confidence can veto through the trust gate, never
        // authorize.
        if let Some(confidence) = signal.advisory_confidence {
            let fingerprint = format!("{}:{}", signal.source, signal.symbol);
            let regime = regime_tag(&signal);
            let trust = self.rgi.trust_probability(&fingerprint, &regime).await;
            let health_factor = match *self.health.read().await {
                HealthStatus::Green => Decimal::ONE,
                HealthStatus::Yellow => dec!(0.5),
                HealthStatus::Red => Decimal::ZERO,
            };
            let adjusted = RewardGovernor::adjusted_confidence(confidence, trust, health_factor);
            if !self.rgi.gate_passes(adjusted) {
                self.refuse(
                    corr,
                    "trust_gate",
                    &format!("adjusted confidence {adjusted} below execution gate"),
                )
                .await?;
                return Ok(PipelineOutcome::Refused {
                    stage: "trust_gate",
                    reason: format!("adjusted confidence {adjusted}"),
                });
            }
        }

        // Size the trade.
        let equity = self.equity.current_equity_zar().await?;
        let Some(stop_price) = stop_price_for(&signal) else {
            self.refuse(corr, "risk", "no stop price or ATR supplied").await?;
            return Ok(PipelineOutcome::Refused {
                stage: "risk",
                reason: "no stop price or ATR supplied".to_string(),
            });
        };

        let permit = match self.risk.issue_permit(
            corr,
            equity,
            signal.price,
            stop_price,
            signal.atr,
        ) {
            Ok(permit) => permit,
            Err(e) => {
                let code = e
                    .code()
                    .map(|c| c.as_str().to_string())
                    .unwrap_or_else(|| "RISK-REJECTED".to_string());
                self.refuse(corr, "risk", &format!("{code}: {e}")).await?;
                return Ok(PipelineOutcome::Refused {
                    stage: "risk",
                    reason: e.to_string(),
                });
            }
        };

        // Park the trade behind the human gate.
        let snapshot = self.market.snapshot(&signal.symbol).await?;
        match self.hitl.create(&signal, permit.approved_qty, snapshot).await {
            Ok(CreateOutcome::AwaitingApproval(request)) => {
                self.pending_permits
                    .lock()
                    .await
                    .insert(request.trade_id.clone(), permit);
                self.hitl
                    .arm_expiry(request.trade_id.clone(), request.expires_at);
                Ok(PipelineOutcome::AwaitingApproval {
                    trade_id: request.trade_id,
                })
            }
            Ok(CreateOutcome::AutoApproved(request)) => {
                let reconciliation = self.execute_with_permit(&request, permit).await?;
                Ok(PipelineOutcome::Executed { reconciliation })
            }
            Err(HitlError::GuardianLocked { .. }) => {
                Ok(PipelineOutcome::Refused {
                    stage: "hitl",
                    reason: "guardian locked".to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Execute an approved request, consuming its parked permit. Called by
    /// the HITL API after a successful approval.
    pub async fn execute_approved(
        &self,
        request: &ApprovalRequest,
    ) -> Result<Reconciliation> {
        let permit = match self.pending_permits.lock().await.remove(&request.trade_id) {
            Some(permit) => permit,
            // The permit did not survive a restart; re-derive one with the
            // same quantity and the fallback stop distance.
            None => {
                warn!(
                    "Pipeline [{}]: no parked permit for {}; rebuilding",
                    request.correlation_id, request.trade_id
                );
                rebuild_permit(request)
            }
        };

        self.execute_with_permit(request, permit).await
    }

    async fn execute_with_permit(
        &self,
        request: &ApprovalRequest,
        permit: ExecutionPermit,
    ) -> Result<Reconciliation> {
        // No permit is consumed under a lock, even one approved moments
        // before the Guardian engaged.
        if self.guardian.is_locked() {
            self.metrics.blocked_by_guardian_total.inc();
            anyhow::bail!(
                "guardian locked; permit for {} refused before submission",
                request.trade_id
            );
        }

        let reconciliation = self
            .orders
            .execute(&request.symbol, request.side, permit)
            .await?;

        if matches!(
            reconciliation.outcome,
            ReconciliationOutcome::Filled | ReconciliationOutcome::MockFilled
        ) {
            // Lifecycle bookkeeping: APPROVED -> FILLED.
            validate_transition(TradeState::Approved, TradeState::Filled)
                .map_err(anyhow::Error::from)?;
            self.audit
                .append(&AuditRecord::new(
                    reconciliation.correlation_id,
                    "pipeline",
                    "TRADE_FILLED",
                    reconciliation.outcome.to_string(),
                ))
                .await?;
        }

        Ok(reconciliation)
    }

    /// Record a closed round trip: the trade row feeds the circuit breaker,
    /// the learning event feeds the trust aggregator, and expectancy is
    /// republished over the recent window.
    pub async fn record_trade_close(
        &self,
        trade: ClosedTrade,
        learning: TradeLearningEvent,
    ) -> Result<()> {
        validate_transition(TradeState::Filled, TradeState::Closed)
            .map_err(anyhow::Error::from)?;

        self.trades.append(&trade).await?;
        self.learning.append(&learning).await?;

        let recent = self.trades.most_recent(20).await?;
        if !recent.is_empty() {
            let total: Decimal = recent.iter().map(|t| t.pnl_zar).sum();
            let expectancy = money::quantize(
                total / Decimal::from(recent.len() as u64),
                ZAR_SCALE,
            );
            self.metrics
                .expectancy
                .set(expectancy.to_f64().unwrap_or(0.0));
        }

        self.audit
            .append(
                &AuditRecord::new(trade.correlation_id, "pipeline", "TRADE_CLOSED", trade.outcome.to_string())
                    .with_context(serde_json::json!({
                        "pnl_zar": money::canonical_string(trade.pnl_zar),
                        "pnl_pct": money::canonical_string(trade.pnl_pct),
                    })),
            )
            .await?;

        info!(
            "Pipeline [{}]: trade closed {} (P&L R{})",
            trade.correlation_id, trade.outcome, trade.pnl_zar
        );
        Ok(())
    }

    async fn refuse(
        &self,
        correlation_id: uuid::Uuid,
        stage: &str,
        reason: &str,
    ) -> Result<()> {
        warn!("Pipeline [{correlation_id}]: refused at {stage}: {reason}");
        self.audit
            .append(
                &AuditRecord::new(correlation_id, "pipeline", "SIGNAL_REFUSED", "REFUSED")
                    .with_context(serde_json::json!({
                        "stage": stage,
                        "reason": reason,
                    })),
            )
            .await
    }
}

fn stop_price_for(signal: &Signal) -> Option<Decimal> {
    if let Some(stop) = signal.stop_price {
        return Some(stop);
    }
    signal.atr.map(|atr| {
        let distance = atr * ATR_STOP_MULTIPLE;
        match signal.side {
            crate::domain::orders::OrderSide::Buy => signal.price - distance,
            crate::domain::orders::OrderSide::Sell => signal.price + distance,
        }
    })
}

fn regime_tag(signal: &Signal) -> String {
    match signal.atr {
        Some(atr) if atr / signal.price > dec!(0.02) => "volatile".to_string(),
        Some(_) => "normal".to_string(),
        None => "unknown".to_string(),
    }
}

fn rebuild_permit(request: &ApprovalRequest) -> ExecutionPermit {
    let distance = request.request_price * FALLBACK_STOP_DISTANCE_PCT;
    let stop_price = match request.side {
        crate::domain::orders::OrderSide::Buy => request.request_price - distance,
        crate::domain::orders::OrderSide::Sell => request.request_price + distance,
    };
    ExecutionPermit {
        correlation_id: request.correlation_id,
        approved_qty: request.qty,
        entry_price: request.request_price,
        stop_price: money::to_price(stop_price),
        max_slippage_pct: crate::application::risk_governor::DEFAULT_MAX_SLIPPAGE_PCT,
        timeout_seconds: crate::application::risk_governor::DEFAULT_TIMEOUT_SECONDS,
        planned_risk_zar: money::to_zar(request.qty * distance),
        created_at: Utc::now(),
    }
}
