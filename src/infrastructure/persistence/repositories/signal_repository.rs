use crate::domain::hitl::canonical_timestamp;
use crate::domain::money::canonical_string;
use crate::domain::repositories::{SignalInsert, SignalRepository};
use crate::domain::signal::Signal;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use uuid::Uuid;

use super::{decimal_column, enum_column, timestamp_column};

pub struct SqliteSignalRepository {
    database: Database,
}

impl SqliteSignalRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl SignalRepository for SqliteSignalRepository {
    /// Insert once, keyed by (source, external_id). A duplicate leaves the
    /// existing row untouched and returns its correlation id.
    async fn insert(&self, signal: &Signal) -> Result<SignalInsert> {
        let result = sqlx::query(
            r#"
            INSERT INTO signals (
                correlation_id, source, external_id, symbol, side, price,
                stop_price, atr, advisory_confidence, received_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT(source, external_id) DO NOTHING
            "#,
        )
        .bind(signal.correlation_id.to_string())
        .bind(&signal.source)
        .bind(&signal.external_id)
        .bind(&signal.symbol)
        .bind(signal.side.to_string())
        .bind(canonical_string(signal.price))
        .bind(signal.stop_price.map(canonical_string))
        .bind(signal.atr.map(canonical_string))
        .bind(signal.advisory_confidence.map(canonical_string))
        .bind(canonical_timestamp(signal.received_at))
        .execute(&self.database.pool)
        .await
        .context("Failed to insert signal")?;

        if result.rows_affected() == 1 {
            return Ok(SignalInsert::Inserted(signal.correlation_id));
        }

        let existing: (String,) = sqlx::query_as(
            "SELECT correlation_id FROM signals WHERE source = $1 AND external_id = $2",
        )
        .bind(&signal.source)
        .bind(&signal.external_id)
        .fetch_one(&self.database.pool)
        .await
        .context("Failed to load duplicate signal")?;

        let correlation_id = Uuid::parse_str(&existing.0)
            .map_err(|e| anyhow!("invalid correlation id in signals: {e}"))?;
        Ok(SignalInsert::Duplicate(correlation_id))
    }

    async fn find_by_correlation(&self, correlation_id: Uuid) -> Result<Option<Signal>> {
        let row: Option<(
            String,
            String,
            String,
            String,
            String,
            String,
            Option<String>,
            Option<String>,
            Option<String>,
            String,
        )> = sqlx::query_as(
            r#"
            SELECT correlation_id, source, external_id, symbol, side, price,
                   stop_price, atr, advisory_confidence, received_at
            FROM signals
            WHERE correlation_id = $1
            "#,
        )
        .bind(correlation_id.to_string())
        .fetch_optional(&self.database.pool)
        .await
        .context("Failed to load signal")?;

        let Some((corr, source, external_id, symbol, side, price, stop, atr, conf, received)) =
            row
        else {
            return Ok(None);
        };

        Ok(Some(Signal {
            correlation_id: Uuid::parse_str(&corr)?,
            source,
            external_id,
            symbol,
            side: enum_column(&side, "side")?,
            price: decimal_column(&price, "price")?,
            stop_price: stop.as_deref().map(|s| decimal_column(s, "stop_price")).transpose()?,
            atr: atr.as_deref().map(|s| decimal_column(s, "atr")).transpose()?,
            advisory_confidence: conf
                .as_deref()
                .map(|s| decimal_column(s, "advisory_confidence"))
                .transpose()?,
            received_at: timestamp_column(&received, "received_at")?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::orders::OrderSide;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn signal(external_id: &str) -> Signal {
        Signal {
            correlation_id: Uuid::new_v4(),
            source: "tradingview".to_string(),
            external_id: external_id.to_string(),
            symbol: "BTCZAR".to_string(),
            side: OrderSide::Buy,
            price: dec!(1850000.00),
            stop_price: Some(dec!(1830000.00)),
            atr: None,
            advisory_confidence: None,
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_load_round_trip() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteSignalRepository::new(db);

        let s = signal("X-1");
        assert_eq!(
            repo.insert(&s).await.unwrap(),
            SignalInsert::Inserted(s.correlation_id)
        );

        let loaded = repo.find_by_correlation(s.correlation_id).await.unwrap().unwrap();
        assert_eq!(loaded.symbol, "BTCZAR");
        assert_eq!(loaded.price, dec!(1850000));
        assert_eq!(loaded.stop_price, Some(dec!(1830000)));
    }

    #[tokio::test]
    async fn test_duplicate_returns_original_correlation() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteSignalRepository::new(db);

        let first = signal("X-1");
        repo.insert(&first).await.unwrap();

        let second = signal("X-1");
        assert_eq!(
            repo.insert(&second).await.unwrap(),
            SignalInsert::Duplicate(first.correlation_id)
        );
    }
}
