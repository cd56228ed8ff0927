//! Trade permission policy context and decisions.
//!
//! Advisory model confidence is deliberately absent from [`PolicyContext`]:
//! confidence is informational and can never authorize a trade. A source
//! that fails to report is represented as `None` and evaluated as its most
//! restrictive value.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Operational budget gate signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BudgetSignal {
    Allow,
    Throttle,
    Halt,
}

/// Coarse system health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Green,
    Yellow,
    Red,
}

/// Risk severity snapshot fed by the vitals loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskAssessment {
    Low,
    Medium,
    High,
    Critical,
}

/// Inputs to one policy evaluation. `None` means the source failed to
/// report in time.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyContext {
    pub kill_switch_active: Option<bool>,
    pub budget_signal: Option<BudgetSignal>,
    pub health_status: Option<HealthStatus>,
    pub risk_assessment: Option<RiskAssessment>,
}

/// The policy verdict domain. Anything other than `Allow` refuses the trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradePermission {
    Allow,
    Neutral,
    Halt,
}

impl fmt::Display for TradePermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TradePermission::Allow => "ALLOW",
            TradePermission::Neutral => "NEUTRAL",
            TradePermission::Halt => "HALT",
        };
        f.write_str(s)
    }
}

/// One policy evaluation result.
#[derive(Debug, Clone)]
pub struct PolicyDecision {
    pub permission: TradePermission,
    pub reason: String,
    /// Name of the gate that blocked, when not `Allow`.
    pub blocking_gate: Option<&'static str>,
    /// True when the decision was forced by the monotonic HALT latch.
    pub latched: bool,
}

impl PolicyDecision {
    pub fn allow() -> Self {
        Self {
            permission: TradePermission::Allow,
            reason: "all gates passed".to_string(),
            blocking_gate: None,
            latched: false,
        }
    }
}
