use crate::domain::hitl::{
    ApprovalRequest, ApprovalStatus, PriceSnapshot, canonical_timestamp,
};
use crate::domain::money::canonical_string;
use crate::domain::repositories::ApprovalRepository;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use super::{decimal_column, enum_column, timestamp_column};

pub struct SqliteApprovalRepository {
    database: Database,
}

impl SqliteApprovalRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    fn from_row(row: &SqliteRow) -> Result<ApprovalRequest> {
        let side: String = row.try_get("side")?;
        let status: String = row.try_get("status")?;
        let created_at: String = row.try_get("created_at")?;
        let expires_at: String = row.try_get("expires_at")?;
        let decided_at: Option<String> = row.try_get("decided_at")?;
        let channel: Option<String> = row.try_get("decision_channel")?;
        let corr: String = row.try_get("correlation_id")?;

        let qty: String = row.try_get("qty")?;
        let request_price: String = row.try_get("request_price")?;
        let snap_price: String = row.try_get("snapshot_price")?;
        let snap_bid: String = row.try_get("snapshot_bid")?;
        let snap_ask: String = row.try_get("snapshot_ask")?;
        let snap_spread: String = row.try_get("snapshot_spread_pct")?;
        let snap_latency: i64 = row.try_get("snapshot_latency_ms")?;
        let ttl: i64 = row.try_get("ttl_seconds")?;

        Ok(ApprovalRequest {
            correlation_id: Uuid::parse_str(&corr)?,
            trade_id: row.try_get("trade_id")?,
            symbol: row.try_get("symbol")?,
            side: enum_column(&side, "side")?,
            qty: decimal_column(&qty, "qty")?,
            request_price: decimal_column(&request_price, "request_price")?,
            snapshot: PriceSnapshot {
                price: decimal_column(&snap_price, "snapshot_price")?,
                bid: decimal_column(&snap_bid, "snapshot_bid")?,
                ask: decimal_column(&snap_ask, "snapshot_ask")?,
                spread_pct: decimal_column(&snap_spread, "snapshot_spread_pct")?,
                latency_ms: snap_latency as u64,
            },
            ttl_seconds: ttl as u64,
            status: enum_column(&status, "status")?,
            created_at: timestamp_column(&created_at, "created_at")?,
            expires_at: timestamp_column(&expires_at, "expires_at")?,
            decided_at: decided_at
                .as_deref()
                .map(|s| timestamp_column(s, "decided_at"))
                .transpose()?,
            decision_channel: channel
                .as_deref()
                .map(|s| enum_column(s, "decision_channel"))
                .transpose()?,
            operator_id: row.try_get("operator_id")?,
            reason: row.try_get("reason")?,
            row_hash: row.try_get("row_hash")?,
        })
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT trade_id, correlation_id, symbol, side, qty, request_price,
           snapshot_price, snapshot_bid, snapshot_ask, snapshot_spread_pct,
           snapshot_latency_ms, ttl_seconds, status, created_at, expires_at,
           decided_at, decision_channel, operator_id, reason, row_hash
    FROM hitl_approvals
"#;

#[async_trait]
impl ApprovalRepository for SqliteApprovalRepository {
    async fn insert(&self, request: &ApprovalRequest) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO hitl_approvals (
                trade_id, correlation_id, symbol, side, qty, request_price,
                snapshot_price, snapshot_bid, snapshot_ask, snapshot_spread_pct,
                snapshot_latency_ms, ttl_seconds, status, created_at, expires_at,
                decided_at, decision_channel, operator_id, reason, row_hash
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            "#,
        )
        .bind(&request.trade_id)
        .bind(request.correlation_id.to_string())
        .bind(&request.symbol)
        .bind(request.side.to_string())
        .bind(canonical_string(request.qty))
        .bind(canonical_string(request.request_price))
        .bind(canonical_string(request.snapshot.price))
        .bind(canonical_string(request.snapshot.bid))
        .bind(canonical_string(request.snapshot.ask))
        .bind(canonical_string(request.snapshot.spread_pct))
        .bind(request.snapshot.latency_ms as i64)
        .bind(request.ttl_seconds as i64)
        .bind(request.status.to_string())
        .bind(canonical_timestamp(request.created_at))
        .bind(canonical_timestamp(request.expires_at))
        .bind(request.decided_at.map(canonical_timestamp))
        .bind(request.decision_channel.map(|c| c.to_string()))
        .bind(&request.operator_id)
        .bind(&request.reason)
        .bind(&request.row_hash)
        .execute(&self.database.pool)
        .await
        .context("Failed to insert approval request")?;

        Ok(())
    }

    async fn find_by_trade_id(&self, trade_id: &str) -> Result<Option<ApprovalRequest>> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE trade_id = $1"))
            .bind(trade_id)
            .fetch_optional(&self.database.pool)
            .await
            .context("Failed to load approval request")?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn awaiting(&self) -> Result<Vec<ApprovalRequest>> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE status = 'AWAITING_APPROVAL' ORDER BY expires_at ASC"
        ))
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to query pending approvals")?;

        rows.iter().map(Self::from_row).collect()
    }

    async fn awaiting_expired(&self, now: DateTime<Utc>) -> Result<Vec<ApprovalRequest>> {
        // Canonical RFC 3339 timestamps sort lexicographically.
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE status = 'AWAITING_APPROVAL' AND expires_at <= $1
             ORDER BY expires_at ASC"
        ))
        .bind(canonical_timestamp(now))
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to query expired approvals")?;

        rows.iter().map(Self::from_row).collect()
    }

    async fn transition(
        &self,
        updated: &ApprovalRequest,
        expected: ApprovalStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE hitl_approvals
            SET status = $1,
                decided_at = $2,
                decision_channel = $3,
                operator_id = $4,
                reason = $5,
                row_hash = $6
            WHERE trade_id = $7 AND status = $8
            "#,
        )
        .bind(updated.status.to_string())
        .bind(updated.decided_at.map(canonical_timestamp))
        .bind(updated.decision_channel.map(|c| c.to_string()))
        .bind(&updated.operator_id)
        .bind(&updated.reason)
        .bind(&updated.row_hash)
        .bind(&updated.trade_id)
        .bind(expected.to_string())
        .execute(&self.database.pool)
        .await
        .context("Failed to transition approval request")?;

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::hitl::DecisionChannel;
    use crate::domain::orders::OrderSide;
    use rust_decimal_macros::dec;

    fn request(trade_id: &str) -> ApprovalRequest {
        ApprovalRequest::new(
            Uuid::new_v4(),
            trade_id.to_string(),
            "BTCZAR".to_string(),
            OrderSide::Buy,
            dec!(0.05),
            dec!(1850000),
            PriceSnapshot {
                price: dec!(1850000),
                bid: dec!(1849990),
                ask: dec!(1850010),
                spread_pct: dec!(0.0011),
                latency_ms: 9,
            },
            300,
        )
    }

    #[tokio::test]
    async fn test_round_trip_preserves_hash() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteApprovalRepository::new(db);

        let r = request("T-1");
        repo.insert(&r).await.unwrap();

        let loaded = repo.find_by_trade_id("T-1").await.unwrap().unwrap();
        assert!(loaded.verify_row_hash());
        assert_eq!(loaded.row_hash, r.row_hash);
    }

    #[tokio::test]
    async fn test_conditional_transition_is_single_winner() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteApprovalRepository::new(db);

        let r = request("T-1");
        repo.insert(&r).await.unwrap();

        let approved = r
            .apply_transition(
                ApprovalStatus::Approved,
                DecisionChannel::Api,
                Some("op-a".to_string()),
                None,
            )
            .unwrap();
        let rejected = r
            .apply_transition(
                ApprovalStatus::Rejected,
                DecisionChannel::System,
                None,
                Some("HITL_TIMEOUT".to_string()),
            )
            .unwrap();

        assert!(repo
            .transition(&approved, ApprovalStatus::AwaitingApproval)
            .await
            .unwrap());
        // The race loser writes nothing.
        assert!(!repo
            .transition(&rejected, ApprovalStatus::AwaitingApproval)
            .await
            .unwrap());

        let loaded = repo.find_by_trade_id("T-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, ApprovalStatus::Approved);
        assert!(loaded.verify_row_hash());
    }

    #[tokio::test]
    async fn test_awaiting_ordered_by_expiry() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteApprovalRepository::new(db);

        let mut early = request("T-early");
        early.expires_at = early.created_at + chrono::Duration::seconds(10);
        early.row_hash = early.compute_row_hash();
        let mut late = request("T-late");
        late.expires_at = late.created_at + chrono::Duration::seconds(500);
        late.row_hash = late.compute_row_hash();

        repo.insert(&late).await.unwrap();
        repo.insert(&early).await.unwrap();

        let pending = repo.awaiting().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].trade_id, "T-early");
        assert_eq!(pending[1].trade_id, "T-late");
    }

    #[tokio::test]
    async fn test_awaiting_expired_filters_by_deadline() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteApprovalRepository::new(db);

        let mut stale = request("T-stale");
        stale.expires_at = Utc::now() - chrono::Duration::seconds(5);
        stale.row_hash = stale.compute_row_hash();
        let fresh = request("T-fresh");

        repo.insert(&stale).await.unwrap();
        repo.insert(&fresh).await.unwrap();

        let expired = repo.awaiting_expired(Utc::now()).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].trade_id, "T-stale");
    }
}
