use crate::domain::hitl::canonical_timestamp;
use crate::domain::money::canonical_string;
use crate::domain::orders::ClosedTrade;
use crate::domain::repositories::ClosedTradeRepository;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use uuid::Uuid;

use super::{decimal_column, enum_column, timestamp_column};

pub struct SqliteClosedTradeRepository {
    database: Database,
}

impl SqliteClosedTradeRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

type ClosedTradeRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
);

fn from_row(row: ClosedTradeRow) -> Result<ClosedTrade> {
    let (id, corr, symbol, side, entry, exit, qty, pnl_zar, pnl_pct, outcome, closed_at) = row;
    Ok(ClosedTrade {
        id,
        correlation_id: Uuid::parse_str(&corr)?,
        symbol,
        side: enum_column(&side, "side")?,
        entry_price: decimal_column(&entry, "entry_price")?,
        exit_price: decimal_column(&exit, "exit_price")?,
        quantity: decimal_column(&qty, "quantity")?,
        pnl_zar: decimal_column(&pnl_zar, "pnl_zar")?,
        pnl_pct: decimal_column(&pnl_pct, "pnl_pct")?,
        outcome: enum_column(&outcome, "outcome")?,
        closed_at: timestamp_column(&closed_at, "closed_at")?,
    })
}

const SELECT: &str = r#"
    SELECT id, correlation_id, symbol, side, entry_price, exit_price,
           quantity, pnl_zar, pnl_pct, outcome, closed_at
    FROM closed_trades
"#;

#[async_trait]
impl ClosedTradeRepository for SqliteClosedTradeRepository {
    async fn append(&self, trade: &ClosedTrade) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO closed_trades (
                id, correlation_id, symbol, side, entry_price, exit_price,
                quantity, pnl_zar, pnl_pct, outcome, closed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&trade.id)
        .bind(trade.correlation_id.to_string())
        .bind(&trade.symbol)
        .bind(trade.side.to_string())
        .bind(canonical_string(trade.entry_price))
        .bind(canonical_string(trade.exit_price))
        .bind(canonical_string(trade.quantity))
        .bind(canonical_string(trade.pnl_zar))
        .bind(canonical_string(trade.pnl_pct))
        .bind(trade.outcome.to_string())
        .bind(canonical_timestamp(trade.closed_at))
        .execute(&self.database.pool)
        .await
        .context("Failed to append closed trade")?;

        Ok(())
    }

    async fn closed_on(&self, day: NaiveDate) -> Result<Vec<ClosedTrade>> {
        // Canonical timestamps sort lexicographically, so a UTC day is a
        // half-open string range.
        let start = Utc.from_utc_datetime(&day.and_hms_opt(0, 0, 0).unwrap());
        let end = start + chrono::Duration::days(1);

        let rows: Vec<ClosedTradeRow> = sqlx::query_as(&format!(
            "{SELECT} WHERE closed_at >= $1 AND closed_at < $2 ORDER BY closed_at ASC"
        ))
        .bind(canonical_timestamp(start))
        .bind(canonical_timestamp(end))
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to query closed trades for day")?;

        rows.into_iter().map(from_row).collect()
    }

    async fn most_recent(&self, limit: usize) -> Result<Vec<ClosedTrade>> {
        let rows: Vec<ClosedTradeRow> = sqlx::query_as(&format!(
            "{SELECT} ORDER BY closed_at DESC LIMIT $1"
        ))
        .bind(limit as i64)
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to query recent closed trades")?;

        rows.into_iter().map(from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::orders::{OrderSide, TradeOutcome};
    use rust_decimal_macros::dec;

    fn trade(id: &str, pnl: rust_decimal::Decimal, closed_at: chrono::DateTime<Utc>) -> ClosedTrade {
        ClosedTrade {
            id: id.to_string(),
            correlation_id: Uuid::new_v4(),
            symbol: "BTCZAR".to_string(),
            side: OrderSide::Buy,
            entry_price: dec!(1850000),
            exit_price: dec!(1850000) + pnl,
            quantity: dec!(0.05),
            pnl_zar: pnl,
            pnl_pct: pnl / dec!(100000),
            outcome: ClosedTrade::classify(pnl),
            closed_at,
        }
    }

    #[tokio::test]
    async fn test_closed_on_filters_by_utc_day() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteClosedTradeRepository::new(db);

        let today = Utc::now();
        let yesterday = today - chrono::Duration::days(1);
        repo.append(&trade("a", dec!(-100), today)).await.unwrap();
        repo.append(&trade("b", dec!(50), yesterday)).await.unwrap();

        let todays = repo.closed_on(today.date_naive()).await.unwrap();
        assert_eq!(todays.len(), 1);
        assert_eq!(todays[0].id, "a");
        assert_eq!(todays[0].outcome, TradeOutcome::Loss);
    }

    #[tokio::test]
    async fn test_most_recent_newest_first() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteClosedTradeRepository::new(db);

        let now = Utc::now();
        repo.append(&trade("old", dec!(-1), now - chrono::Duration::hours(3)))
            .await
            .unwrap();
        repo.append(&trade("mid", dec!(-1), now - chrono::Duration::hours(2)))
            .await
            .unwrap();
        repo.append(&trade("new", dec!(-1), now - chrono::Duration::hours(1)))
            .await
            .unwrap();

        let recent = repo.most_recent(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, "new");
        assert_eq!(recent[1].id, "mid");
    }
}
