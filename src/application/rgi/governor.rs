//! Reward-governed intelligence: trust synthesis.
//!
//! Combines advisory confidence with learned trust and system health into an
//! adjusted confidence compared against the execution gate. This is the one
//! subsystem allowed to swallow its own errors: any internal failure, lookup
//! miss or timeout yields the neutral trust of 0.5 so a learning fault can
//! never block (or fail) the caller.

use crate::domain::money::{self, TRUST_SCALE};
use crate::domain::repositories::TrustStateRepository;
use crate::infrastructure::observability::Metrics;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::warn;

/// Returned whenever trust cannot be established.
pub const NEUTRAL_TRUST: Decimal = dec!(0.5);
/// Adjusted confidence below this recommends NEUTRAL.
pub const EXECUTION_GATE: Decimal = dec!(0.95);
/// Trust lookups must answer within this budget or fall back to neutral.
const PREDICT_TIMEOUT_MS: u64 = 50;
/// Golden-Set accuracy below this latches safe mode.
const GOLDEN_SET_MIN_ACCURACY: Decimal = dec!(0.70);

pub struct RewardGovernor {
    trust_repo: Arc<dyn TrustStateRepository>,
    safe_mode: AtomicBool,
    metrics: Metrics,
}

impl RewardGovernor {
    pub fn new(trust_repo: Arc<dyn TrustStateRepository>, metrics: Metrics) -> Self {
        metrics.rgi_safe_mode_active.set(0.0);
        Self {
            trust_repo,
            safe_mode: AtomicBool::new(false),
            metrics,
        }
    }

    pub fn is_safe_mode(&self) -> bool {
        self.safe_mode.load(Ordering::SeqCst)
    }

    /// Learned trust for a strategy under a regime. Never fails; never
    /// exceeds the 50 ms prediction budget.
    pub async fn trust_probability(&self, fingerprint: &str, regime: &str) -> Decimal {
        if self.is_safe_mode() {
            return NEUTRAL_TRUST;
        }

        let lookup = tokio::time::timeout(
            Duration::from_millis(PREDICT_TIMEOUT_MS),
            self.trust_repo.find(fingerprint, regime),
        )
        .await;

        let trust = match lookup {
            Ok(Ok(Some(state))) => {
                self.metrics.rgi_model_loaded.set(1.0);
                state.trust_probability.clamp(Decimal::ZERO, Decimal::ONE)
            }
            Ok(Ok(None)) => NEUTRAL_TRUST,
            Ok(Err(e)) => {
                warn!("RewardGovernor: trust lookup failed ({e}); returning neutral");
                NEUTRAL_TRUST
            }
            Err(_) => {
                warn!(
                    "RewardGovernor: trust lookup exceeded {PREDICT_TIMEOUT_MS}ms; returning neutral"
                );
                NEUTRAL_TRUST
            }
        };

        self.metrics
            .rgi_trust_probability
            .set(trust.to_f64().unwrap_or(0.5));
        trust
    }

    /// adjusted = clamp(confidence x trust x health, 0, 1) at scale 4.
    pub fn adjusted_confidence(
        advisory_confidence: Decimal,
        trust: Decimal,
        health: Decimal,
    ) -> Decimal {
        let adjusted = (advisory_confidence * trust * health)
            .clamp(Decimal::ZERO, Decimal::ONE);
        money::quantize(adjusted, TRUST_SCALE)
    }

    /// True when the adjusted confidence clears the execution gate.
    pub fn gate_passes(&self, adjusted: Decimal) -> bool {
        self.metrics
            .rgi_adjusted_confidence
            .observe(adjusted.to_f64().unwrap_or(0.0));
        adjusted >= EXECUTION_GATE
    }

    /// Latch safe mode when Golden-Set accuracy degrades.
    pub fn evaluate_golden_set(&self, accuracy: Decimal) {
        if accuracy < GOLDEN_SET_MIN_ACCURACY {
            if !self.safe_mode.swap(true, Ordering::SeqCst) {
                warn!(
                    "RewardGovernor: Golden-Set accuracy {accuracy} below {GOLDEN_SET_MIN_ACCURACY}; safe mode engaged"
                );
            }
            self.metrics.rgi_safe_mode_active.set(1.0);
        }
    }

    /// Clear the safe-mode latch after retraining.
    pub fn reset_safe_mode(&self) {
        self.safe_mode.store(false, Ordering::SeqCst);
        self.metrics.rgi_safe_mode_active.set(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trust::TrustState;
    use crate::infrastructure::persistence::Database;
    use crate::infrastructure::persistence::repositories::SqliteTrustStateRepository;
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::Utc;

    async fn governor_with_state(trust: Option<Decimal>) -> RewardGovernor {
        let db = Database::in_memory().await.unwrap();
        let repo = Arc::new(SqliteTrustStateRepository::new(db));
        if let Some(p) = trust {
            repo.upsert(&TrustState {
                strategy_fingerprint: "fp".to_string(),
                regime_tag: "trending".to_string(),
                trust_probability: p,
                training_sample_count: 40,
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
        }
        RewardGovernor::new(repo, Metrics::new().unwrap())
    }

    struct FailingRepo;

    #[async_trait]
    impl TrustStateRepository for FailingRepo {
        async fn upsert(&self, _state: &TrustState) -> Result<()> {
            anyhow::bail!("storage down")
        }
        async fn find(&self, _f: &str, _r: &str) -> Result<Option<TrustState>> {
            anyhow::bail!("storage down")
        }
    }

    struct SlowRepo;

    #[async_trait]
    impl TrustStateRepository for SlowRepo {
        async fn upsert(&self, _state: &TrustState) -> Result<()> {
            Ok(())
        }
        async fn find(&self, _f: &str, _r: &str) -> Result<Option<TrustState>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_known_fingerprint_returns_learned_trust() {
        let g = governor_with_state(Some(dec!(0.8))).await;
        assert_eq!(g.trust_probability("fp", "trending").await, dec!(0.8));
    }

    #[tokio::test]
    async fn test_unknown_fingerprint_is_neutral() {
        let g = governor_with_state(None).await;
        assert_eq!(g.trust_probability("fp", "trending").await, NEUTRAL_TRUST);
    }

    #[tokio::test]
    async fn test_storage_error_is_neutral_never_fails() {
        let g = RewardGovernor::new(Arc::new(FailingRepo), Metrics::new().unwrap());
        assert_eq!(g.trust_probability("fp", "trending").await, NEUTRAL_TRUST);
    }

    #[tokio::test]
    async fn test_slow_lookup_times_out_to_neutral() {
        let g = RewardGovernor::new(Arc::new(SlowRepo), Metrics::new().unwrap());
        let start = std::time::Instant::now();
        assert_eq!(g.trust_probability("fp", "trending").await, NEUTRAL_TRUST);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_safe_mode_forces_neutral() {
        let g = governor_with_state(Some(dec!(0.9))).await;
        g.evaluate_golden_set(dec!(0.65));
        assert!(g.is_safe_mode());
        assert_eq!(g.trust_probability("fp", "trending").await, NEUTRAL_TRUST);

        g.reset_safe_mode();
        assert_eq!(g.trust_probability("fp", "trending").await, dec!(0.9));
    }

    #[tokio::test]
    async fn test_accuracy_at_threshold_keeps_safe_mode_off() {
        let g = governor_with_state(None).await;
        g.evaluate_golden_set(dec!(0.70));
        assert!(!g.is_safe_mode());
    }

    #[test]
    fn test_adjusted_confidence_formula() {
        // 0.98 x 0.97 x 1.0 = 0.9506
        assert_eq!(
            RewardGovernor::adjusted_confidence(dec!(0.98), dec!(0.97), dec!(1.0)),
            dec!(0.9506)
        );
        // Clamped into [0,1]
        assert_eq!(
            RewardGovernor::adjusted_confidence(dec!(2), dec!(1), dec!(1)),
            dec!(1)
        );
    }

    #[tokio::test]
    async fn test_execution_gate() {
        let g = governor_with_state(None).await;
        assert!(g.gate_passes(dec!(0.95)));
        assert!(g.gate_passes(dec!(0.9506)));
        assert!(!g.gate_passes(dec!(0.9499)));
    }
}
