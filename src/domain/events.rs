//! Trading events published on the in-process bus.
//!
//! Every event carries the full payload it describes plus the correlation
//! id, so listeners (metrics, Discord, tests) never need a read-back.

use crate::domain::guardian::GuardianLock;
use crate::domain::hitl::{ApprovalRequest, DecisionType};
use crate::domain::orders::Reconciliation;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub enum TradingEvent {
    HitlCreated {
        request: ApprovalRequest,
    },
    HitlDecided {
        request: ApprovalRequest,
        decision: DecisionType,
    },
    HitlExpired {
        request: ApprovalRequest,
    },
    HitlRecovered {
        request: ApprovalRequest,
    },
    HitlAutoApproved {
        request: ApprovalRequest,
    },
    GuardianLocked {
        lock: GuardianLock,
    },
    GuardianUnlocked {
        actor: String,
        reason: String,
        correlation_id: Uuid,
    },
    OrderReconciled {
        reconciliation: Reconciliation,
    },
    PolicyLatchReset {
        actor: String,
        reason: String,
        correlation_id: Uuid,
    },
}

impl TradingEvent {
    /// Stable wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            TradingEvent::HitlCreated { .. } => "hitl.created",
            TradingEvent::HitlDecided { .. } => "hitl.decided",
            TradingEvent::HitlExpired { .. } => "hitl.expired",
            TradingEvent::HitlRecovered { .. } => "hitl.recovered",
            TradingEvent::HitlAutoApproved { .. } => "hitl.auto_approved",
            TradingEvent::GuardianLocked { .. } => "guardian.locked",
            TradingEvent::GuardianUnlocked { .. } => "guardian.unlocked",
            TradingEvent::OrderReconciled { .. } => "order.reconciled",
            TradingEvent::PolicyLatchReset { .. } => "policy.latch_reset",
        }
    }

    pub fn correlation_id(&self) -> Option<Uuid> {
        match self {
            TradingEvent::HitlCreated { request }
            | TradingEvent::HitlDecided { request, .. }
            | TradingEvent::HitlExpired { request }
            | TradingEvent::HitlRecovered { request }
            | TradingEvent::HitlAutoApproved { request } => Some(request.correlation_id),
            TradingEvent::GuardianLocked { lock } => lock.correlation_id,
            TradingEvent::GuardianUnlocked { correlation_id, .. }
            | TradingEvent::PolicyLatchReset { correlation_id, .. } => Some(*correlation_id),
            TradingEvent::OrderReconciled { reconciliation } => {
                Some(reconciliation.correlation_id)
            }
        }
    }
}

/// Synchronous event sink. Implementations must not block: anything slow
/// (HTTP, Discord) spawns its own task.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &TradingEvent);
}

/// Listener that logs every event with its correlation id.
pub struct LoggingListener;

impl EventListener for LoggingListener {
    fn on_event(&self, event: &TradingEvent) {
        tracing::info!(
            event = event.name(),
            correlation_id = ?event.correlation_id(),
            "event published"
        );
    }
}
