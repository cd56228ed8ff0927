//! Trust aggregation.
//!
//! Recomputes the empirical trust table from persisted learning events:
//! trust = (wins + 1) / (n + 2), a Laplace-smoothed win rate per strategy
//! fingerprint and regime. Also scores the table against the recorded
//! outcomes (the Golden Set) and latches the governor into safe mode when
//! accuracy degrades. Cold path: runs on the vitals cadence, never inside
//! the signal pipeline.

use crate::application::rgi::governor::RewardGovernor;
use crate::domain::money::{self, TRUST_SCALE};
use crate::domain::orders::TradeOutcome;
use crate::domain::repositories::{LearningEventRepository, TrustStateRepository};
use crate::domain::trust::TrustState;
use anyhow::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

pub struct TrustAggregator {
    events: Arc<dyn LearningEventRepository>,
    trust_repo: Arc<dyn TrustStateRepository>,
    governor: Arc<RewardGovernor>,
}

struct Tally {
    wins: u64,
    total: u64,
}

impl TrustAggregator {
    pub fn new(
        events: Arc<dyn LearningEventRepository>,
        trust_repo: Arc<dyn TrustStateRepository>,
        governor: Arc<RewardGovernor>,
    ) -> Self {
        Self {
            events,
            trust_repo,
            governor,
        }
    }

    /// Rebuild the trust table. Returns the number of (fingerprint, regime)
    /// pairs updated.
    pub async fn aggregate(&self) -> Result<usize> {
        let events = self.events.all().await?;
        if events.is_empty() {
            return Ok(0);
        }

        let mut tallies: HashMap<(String, String), Tally> = HashMap::new();
        for event in &events {
            let entry = tallies
                .entry((event.strategy_fingerprint.clone(), event.regime_tag.clone()))
                .or_insert(Tally { wins: 0, total: 0 });
            entry.total += 1;
            if event.outcome == TradeOutcome::Win {
                entry.wins += 1;
            }
        }

        let mut trust_by_key: HashMap<(String, String), Decimal> = HashMap::new();
        let updated = tallies.len();
        for ((fingerprint, regime), tally) in tallies {
            let trust = money::quantize(
                Decimal::from(tally.wins + 1) / Decimal::from(tally.total + 2),
                TRUST_SCALE,
            );
            self.trust_repo
                .upsert(&TrustState {
                    strategy_fingerprint: fingerprint.clone(),
                    regime_tag: regime.clone(),
                    trust_probability: trust,
                    training_sample_count: tally.total,
                    updated_at: Utc::now(),
                })
                .await?;
            trust_by_key.insert((fingerprint, regime), trust);
        }

        // Golden-Set pass: does the table predict the recorded outcomes?
        let mut correct = 0u64;
        for event in &events {
            let key = (
                event.strategy_fingerprint.clone(),
                event.regime_tag.clone(),
            );
            let trust = trust_by_key.get(&key).copied().unwrap_or(dec!(0.5));
            let predicted_win = trust >= dec!(0.5);
            let won = event.outcome == TradeOutcome::Win;
            if predicted_win == won {
                correct += 1;
            }
        }
        let accuracy = money::quantize(
            Decimal::from(correct) / Decimal::from(events.len() as u64),
            TRUST_SCALE,
        );
        self.governor.evaluate_golden_set(accuracy);

        info!(
            "TrustAggregator: updated {updated} trust pairs from {} events (golden-set accuracy {accuracy})",
            events.len()
        );
        Ok(updated)
    }
}
