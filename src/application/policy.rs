//! Trade permission policy.
//!
//! Final authority on trade authorization. Evaluation is ordered and
//! short-circuit; once HALT is observed the latch keeps every subsequent
//! evaluation at HALT until an explicit, audited reset. A source that fails
//! to report is evaluated as its most restrictive value.

use crate::domain::audit::AuditRecord;
use crate::domain::events::TradingEvent;
use crate::domain::policy::{
    BudgetSignal, HealthStatus, PolicyContext, PolicyDecision, RiskAssessment, TradePermission,
};
use crate::domain::repositories::AuditLog;
use crate::infrastructure::EventBus;
use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;
use uuid::Uuid;

pub const GATE_KILL_SWITCH: &str = "kill_switch";
pub const GATE_BUDGET: &str = "budget";
pub const GATE_HEALTH: &str = "health";
pub const GATE_RISK: &str = "risk";
pub const GATE_LATCH: &str = "halt_latch";

pub struct PermissionPolicy {
    halt_latched: AtomicBool,
    audit: Arc<dyn AuditLog>,
    bus: EventBus,
}

impl PermissionPolicy {
    pub fn new(audit: Arc<dyn AuditLog>, bus: EventBus) -> Self {
        Self {
            halt_latched: AtomicBool::new(false),
            audit,
            bus,
        }
    }

    pub fn is_latched(&self) -> bool {
        self.halt_latched.load(Ordering::SeqCst)
    }

    /// Evaluate the gates in fixed order. Deterministic for identical inputs
    /// when the latch is clear.
    pub fn evaluate(&self, ctx: &PolicyContext, correlation_id: Uuid) -> PolicyDecision {
        if self.is_latched() {
            return PolicyDecision {
                permission: TradePermission::Halt,
                reason: "HALT latch engaged".to_string(),
                blocking_gate: Some(GATE_LATCH),
                latched: true,
            };
        }

        let decision = Self::evaluate_gates(ctx);

        if decision.permission == TradePermission::Halt {
            self.halt_latched.store(true, Ordering::SeqCst);
            warn!(
                "PermissionPolicy [{correlation_id}]: HALT ({}); latch engaged",
                decision.reason
            );
        }

        decision
    }

    fn evaluate_gates(ctx: &PolicyContext) -> PolicyDecision {
        // 1. Kill switch. Unreported means active.
        if ctx.kill_switch_active.unwrap_or(true) {
            return Self::blocked(TradePermission::Halt, GATE_KILL_SWITCH, "kill switch active");
        }

        // 2. Budget gate. Unreported means HALT.
        let budget = ctx.budget_signal.unwrap_or(BudgetSignal::Halt);
        if budget != BudgetSignal::Allow {
            return Self::blocked(
                TradePermission::Halt,
                GATE_BUDGET,
                "budget gate did not allow",
            );
        }

        // 3. Health. Unreported means RED; anything below GREEN is NEUTRAL.
        let health = ctx.health_status.unwrap_or(HealthStatus::Red);
        if health != HealthStatus::Green {
            return Self::blocked(
                TradePermission::Neutral,
                GATE_HEALTH,
                "system health is not green",
            );
        }

        // 4. Risk assessment. Unreported means CRITICAL.
        let risk = ctx.risk_assessment.unwrap_or(RiskAssessment::Critical);
        if risk == RiskAssessment::Critical {
            return Self::blocked(TradePermission::Halt, GATE_RISK, "risk assessment critical");
        }

        PolicyDecision::allow()
    }

    fn blocked(
        permission: TradePermission,
        gate: &'static str,
        reason: &str,
    ) -> PolicyDecision {
        PolicyDecision {
            permission,
            reason: reason.to_string(),
            blocking_gate: Some(gate),
            latched: false,
        }
    }

    /// Clear the HALT latch. Human-initiated only; always audited.
    pub async fn reset_policy_latch(
        &self,
        actor: &str,
        reason: &str,
        correlation_id: Uuid,
    ) -> Result<()> {
        self.halt_latched.store(false, Ordering::SeqCst);
        self.audit
            .append(
                &AuditRecord::new(correlation_id, actor, "POLICY_LATCH_RESET", "CLEARED")
                    .with_context(serde_json::json!({ "reason": reason })),
            )
            .await?;
        self.bus
            .publish(TradingEvent::PolicyLatchReset {
                actor: actor.to_string(),
                reason: reason.to_string(),
                correlation_id,
            })
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::Database;
    use crate::infrastructure::persistence::repositories::SqliteAuditLog;

    async fn policy() -> PermissionPolicy {
        let db = Database::in_memory().await.unwrap();
        PermissionPolicy::new(Arc::new(SqliteAuditLog::new(db)), EventBus::new())
    }

    fn green_context() -> PolicyContext {
        PolicyContext {
            kill_switch_active: Some(false),
            budget_signal: Some(BudgetSignal::Allow),
            health_status: Some(HealthStatus::Green),
            risk_assessment: Some(RiskAssessment::Low),
        }
    }

    #[tokio::test]
    async fn test_all_green_allows() {
        let p = policy().await;
        let d = p.evaluate(&green_context(), Uuid::new_v4());
        assert_eq!(d.permission, TradePermission::Allow);
        assert!(d.blocking_gate.is_none());
    }

    #[tokio::test]
    async fn test_evaluation_order_and_gates() {
        let p = policy().await;

        let mut ctx = green_context();
        ctx.kill_switch_active = Some(true);
        let d = p.evaluate(&ctx, Uuid::new_v4());
        assert_eq!(d.permission, TradePermission::Halt);
        assert_eq!(d.blocking_gate, Some(GATE_KILL_SWITCH));
        p.reset_policy_latch("test", "next case", Uuid::new_v4())
            .await
            .unwrap();

        let mut ctx = green_context();
        ctx.budget_signal = Some(BudgetSignal::Throttle);
        let d = p.evaluate(&ctx, Uuid::new_v4());
        assert_eq!(d.permission, TradePermission::Halt);
        assert_eq!(d.blocking_gate, Some(GATE_BUDGET));
        p.reset_policy_latch("test", "next case", Uuid::new_v4())
            .await
            .unwrap();

        let mut ctx = green_context();
        ctx.health_status = Some(HealthStatus::Yellow);
        let d = p.evaluate(&ctx, Uuid::new_v4());
        assert_eq!(d.permission, TradePermission::Neutral);
        assert_eq!(d.blocking_gate, Some(GATE_HEALTH));

        let mut ctx = green_context();
        ctx.risk_assessment = Some(RiskAssessment::Critical);
        let d = p.evaluate(&ctx, Uuid::new_v4());
        assert_eq!(d.permission, TradePermission::Halt);
        assert_eq!(d.blocking_gate, Some(GATE_RISK));
    }

    #[tokio::test]
    async fn test_missing_sources_are_most_restrictive() {
        let p = policy().await;
        let d = p.evaluate(&PolicyContext::default(), Uuid::new_v4());
        assert_eq!(d.permission, TradePermission::Halt);
        assert_eq!(d.blocking_gate, Some(GATE_KILL_SWITCH));
    }

    #[tokio::test]
    async fn test_neutral_does_not_latch() {
        let p = policy().await;
        let mut ctx = green_context();
        ctx.health_status = Some(HealthStatus::Yellow);
        assert_eq!(
            p.evaluate(&ctx, Uuid::new_v4()).permission,
            TradePermission::Neutral
        );
        // Health recovers; no latch in the way.
        let d = p.evaluate(&green_context(), Uuid::new_v4());
        assert_eq!(d.permission, TradePermission::Allow);
    }

    #[tokio::test]
    async fn test_halt_latches_until_reset() {
        let p = policy().await;
        let mut ctx = green_context();
        ctx.risk_assessment = Some(RiskAssessment::Critical);
        assert_eq!(
            p.evaluate(&ctx, Uuid::new_v4()).permission,
            TradePermission::Halt
        );

        // Inputs are green again, but the latch holds.
        let d = p.evaluate(&green_context(), Uuid::new_v4());
        assert_eq!(d.permission, TradePermission::Halt);
        assert!(d.latched);
        assert_eq!(d.blocking_gate, Some(GATE_LATCH));

        p.reset_policy_latch("op-a", "incident reviewed", Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(
            p.evaluate(&green_context(), Uuid::new_v4()).permission,
            TradePermission::Allow
        );
    }
}
