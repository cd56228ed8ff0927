use crate::domain::hitl::canonical_timestamp;
use crate::domain::money::canonical_string;
use crate::domain::repositories::TrustStateRepository;
use crate::domain::trust::TrustState;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;

use super::{decimal_column, timestamp_column};

pub struct SqliteTrustStateRepository {
    database: Database,
}

impl SqliteTrustStateRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl TrustStateRepository for SqliteTrustStateRepository {
    async fn upsert(&self, state: &TrustState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trust_state (
                strategy_fingerprint, regime_tag, trust_probability,
                training_sample_count, updated_at
            )
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT(strategy_fingerprint, regime_tag) DO UPDATE SET
                trust_probability = excluded.trust_probability,
                training_sample_count = excluded.training_sample_count,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&state.strategy_fingerprint)
        .bind(&state.regime_tag)
        .bind(canonical_string(state.trust_probability))
        .bind(state.training_sample_count as i64)
        .bind(canonical_timestamp(state.updated_at))
        .execute(&self.database.pool)
        .await
        .context("Failed to upsert trust state")?;

        Ok(())
    }

    async fn find(&self, fingerprint: &str, regime: &str) -> Result<Option<TrustState>> {
        let row: Option<(String, String, String, i64, String)> = sqlx::query_as(
            r#"
            SELECT strategy_fingerprint, regime_tag, trust_probability,
                   training_sample_count, updated_at
            FROM trust_state
            WHERE strategy_fingerprint = $1 AND regime_tag = $2
            "#,
        )
        .bind(fingerprint)
        .bind(regime)
        .fetch_optional(&self.database.pool)
        .await
        .context("Failed to load trust state")?;

        let Some((fingerprint, regime_tag, trust, samples, updated_at)) = row else {
            return Ok(None);
        };

        Ok(Some(TrustState {
            strategy_fingerprint: fingerprint,
            regime_tag,
            trust_probability: decimal_column(&trust, "trust_probability")?,
            training_sample_count: samples as u64,
            updated_at: timestamp_column(&updated_at, "updated_at")?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_upsert_overwrites_existing_pair() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteTrustStateRepository::new(db);

        let mut state = TrustState {
            strategy_fingerprint: "breakout:BTCZAR:5m".to_string(),
            regime_tag: "trending".to_string(),
            trust_probability: dec!(0.6),
            training_sample_count: 10,
            updated_at: Utc::now(),
        };
        repo.upsert(&state).await.unwrap();

        state.trust_probability = dec!(0.75);
        state.training_sample_count = 24;
        repo.upsert(&state).await.unwrap();

        let loaded = repo
            .find("breakout:BTCZAR:5m", "trending")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.trust_probability, dec!(0.75));
        assert_eq!(loaded.training_sample_count, 24);

        assert!(repo.find("unknown", "trending").await.unwrap().is_none());
    }
}
