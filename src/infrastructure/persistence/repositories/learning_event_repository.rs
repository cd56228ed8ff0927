use crate::domain::hitl::canonical_timestamp;
use crate::domain::money::canonical_string;
use crate::domain::repositories::LearningEventRepository;
use crate::domain::trust::TradeLearningEvent;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use super::{decimal_column, enum_column, timestamp_column};

pub struct SqliteLearningEventRepository {
    database: Database,
}

impl SqliteLearningEventRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    fn from_row(row: &SqliteRow) -> Result<TradeLearningEvent> {
        let corr: String = row.try_get("correlation_id")?;
        let side: String = row.try_get("side")?;
        let outcome: String = row.try_get("outcome")?;
        let closed_at: String = row.try_get("closed_at")?;

        let atr_pct: String = row.try_get("atr_pct")?;
        let spread_pct: String = row.try_get("spread_pct")?;
        let volume_ratio: String = row.try_get("volume_ratio")?;
        let advisory: String = row.try_get("advisory_confidence")?;
        let consensus: String = row.try_get("consensus_score")?;
        let pnl_zar: String = row.try_get("pnl_zar")?;
        let max_drawdown: String = row.try_get("max_drawdown")?;

        Ok(TradeLearningEvent {
            correlation_id: Uuid::parse_str(&corr)?,
            strategy_fingerprint: row.try_get("strategy_fingerprint")?,
            regime_tag: row.try_get("regime_tag")?,
            symbol: row.try_get("symbol")?,
            side: enum_column(&side, "side")?,
            timeframe: row.try_get("timeframe")?,
            atr_pct: decimal_column(&atr_pct, "atr_pct")?,
            volatility_regime: row.try_get("volatility_regime")?,
            trend_state: row.try_get("trend_state")?,
            spread_pct: decimal_column(&spread_pct, "spread_pct")?,
            volume_ratio: decimal_column(&volume_ratio, "volume_ratio")?,
            advisory_confidence: decimal_column(&advisory, "advisory_confidence")?,
            consensus_score: decimal_column(&consensus, "consensus_score")?,
            pnl_zar: decimal_column(&pnl_zar, "pnl_zar")?,
            max_drawdown: decimal_column(&max_drawdown, "max_drawdown")?,
            outcome: enum_column(&outcome, "outcome")?,
            closed_at: timestamp_column(&closed_at, "closed_at")?,
        })
    }
}

#[async_trait]
impl LearningEventRepository for SqliteLearningEventRepository {
    async fn append(&self, event: &TradeLearningEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trade_learning_events (
                correlation_id, strategy_fingerprint, regime_tag, symbol, side,
                timeframe, atr_pct, volatility_regime, trend_state, spread_pct,
                volume_ratio, advisory_confidence, consensus_score, pnl_zar,
                max_drawdown, outcome, closed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(event.correlation_id.to_string())
        .bind(&event.strategy_fingerprint)
        .bind(&event.regime_tag)
        .bind(&event.symbol)
        .bind(event.side.to_string())
        .bind(&event.timeframe)
        .bind(canonical_string(event.atr_pct))
        .bind(&event.volatility_regime)
        .bind(&event.trend_state)
        .bind(canonical_string(event.spread_pct))
        .bind(canonical_string(event.volume_ratio))
        .bind(canonical_string(event.advisory_confidence))
        .bind(canonical_string(event.consensus_score))
        .bind(canonical_string(event.pnl_zar))
        .bind(canonical_string(event.max_drawdown))
        .bind(event.outcome.to_string())
        .bind(canonical_timestamp(event.closed_at))
        .execute(&self.database.pool)
        .await
        .context("Failed to append learning event")?;

        Ok(())
    }

    async fn all(&self) -> Result<Vec<TradeLearningEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT correlation_id, strategy_fingerprint, regime_tag, symbol, side,
                   timeframe, atr_pct, volatility_regime, trend_state, spread_pct,
                   volume_ratio, advisory_confidence, consensus_score, pnl_zar,
                   max_drawdown, outcome, closed_at
            FROM trade_learning_events
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to query learning events")?;

        rows.iter().map(Self::from_row).collect()
    }
}
