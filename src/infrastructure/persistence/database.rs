use anyhow::{Context, Result};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Shared database handle. One pool per process, cloned into repositories.
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        // Ensure the directory exists if it's a file path
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal); // Better for concurrency

        // An in-memory database lives and dies with its connection, so it
        // must be pinned to exactly one that never retires.
        let pool_options = if db_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        info!("Connected to database: {}", db_url);

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    /// In-memory database for tests.
    pub async fn in_memory() -> Result<Self> {
        Self::new("sqlite::memory:").await
    }

    /// Initialize the schema. Idempotent; the schema only ever evolves
    /// forward, so every statement is CREATE IF NOT EXISTS.
    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signals (
                correlation_id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                external_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                price TEXT NOT NULL,
                stop_price TEXT,
                atr TEXT,
                advisory_confidence TEXT,
                received_at TEXT NOT NULL,
                UNIQUE (source, external_id)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create signals table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS hitl_approvals (
                trade_id TEXT PRIMARY KEY,
                correlation_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                qty TEXT NOT NULL,
                request_price TEXT NOT NULL,
                snapshot_price TEXT NOT NULL,
                snapshot_bid TEXT NOT NULL,
                snapshot_ask TEXT NOT NULL,
                snapshot_spread_pct TEXT NOT NULL,
                snapshot_latency_ms INTEGER NOT NULL,
                ttl_seconds INTEGER NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                decided_at TEXT,
                decision_channel TEXT,
                operator_id TEXT,
                reason TEXT,
                row_hash TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create hitl_approvals table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_hitl_status_expiry
            ON hitl_approvals (status, expires_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create hitl_approvals index")?;

        // Approval rows are never hard-deleted; tampering is handled by
        // transitioning to REJECTED, not by removal.
        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS hitl_approvals_block_delete
            BEFORE DELETE ON hitl_approvals
            BEGIN
                SELECT RAISE(ABORT, 'hitl_approvals rows cannot be deleted');
            END;
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create hitl_approvals delete trigger")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                correlation_id TEXT NOT NULL,
                actor TEXT NOT NULL,
                action TEXT NOT NULL,
                result TEXT NOT NULL,
                before_hash TEXT,
                after_hash TEXT,
                context_json TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create audit_log table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_audit_correlation
            ON audit_log (correlation_id);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create audit_log index")?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS audit_log_block_delete
            BEFORE DELETE ON audit_log
            BEGIN
                SELECT RAISE(ABORT, 'audit_log is append-only');
            END;
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create audit_log delete trigger")?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS audit_log_block_update
            BEFORE UPDATE ON audit_log
            BEGIN
                SELECT RAISE(ABORT, 'audit_log is append-only');
            END;
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create audit_log update trigger")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS closed_trades (
                id TEXT PRIMARY KEY,
                correlation_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                exit_price TEXT NOT NULL,
                quantity TEXT NOT NULL,
                pnl_zar TEXT NOT NULL,
                pnl_pct TEXT NOT NULL,
                outcome TEXT NOT NULL,
                closed_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create closed_trades table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_closed_trades_closed_at
            ON closed_trades (closed_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create closed_trades index")?;

        // Single-row table: the hard stop either exists or it does not.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS guardian_lock (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                lock_id TEXT NOT NULL,
                locked_at TEXT NOT NULL,
                reason TEXT NOT NULL,
                daily_loss_zar TEXT NOT NULL,
                daily_loss_pct TEXT NOT NULL,
                correlation_id TEXT
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create guardian_lock table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trust_state (
                strategy_fingerprint TEXT NOT NULL,
                regime_tag TEXT NOT NULL,
                trust_probability TEXT NOT NULL,
                training_sample_count INTEGER NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (strategy_fingerprint, regime_tag)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create trust_state table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_learning_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                correlation_id TEXT NOT NULL,
                strategy_fingerprint TEXT NOT NULL,
                regime_tag TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                atr_pct TEXT NOT NULL,
                volatility_regime TEXT NOT NULL,
                trend_state TEXT NOT NULL,
                spread_pct TEXT NOT NULL,
                volume_ratio TEXT NOT NULL,
                advisory_confidence TEXT NOT NULL,
                consensus_score TEXT NOT NULL,
                pnl_zar TEXT NOT NULL,
                max_drawdown TEXT NOT NULL,
                outcome TEXT NOT NULL,
                closed_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create trade_learning_events table")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let db = Database::in_memory().await.unwrap();
        db.init().await.unwrap();
        db.init().await.unwrap();
    }

    #[tokio::test]
    async fn test_audit_log_blocks_delete_and_update() {
        let db = Database::in_memory().await.unwrap();

        sqlx::query(
            "INSERT INTO audit_log (correlation_id, actor, action, result, context_json, timestamp)
             VALUES ('c', 'a', 'CREATE', 'OK', 'null', 't')",
        )
        .execute(&db.pool)
        .await
        .unwrap();

        assert!(sqlx::query("DELETE FROM audit_log")
            .execute(&db.pool)
            .await
            .is_err());
        assert!(sqlx::query("UPDATE audit_log SET result = 'TAMPERED'")
            .execute(&db.pool)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_hitl_approvals_blocks_delete() {
        let db = Database::in_memory().await.unwrap();

        sqlx::query(
            "INSERT INTO hitl_approvals (
                trade_id, correlation_id, symbol, side, qty, request_price,
                snapshot_price, snapshot_bid, snapshot_ask, snapshot_spread_pct,
                snapshot_latency_ms, ttl_seconds, status, created_at, expires_at, row_hash
             ) VALUES ('t', 'c', 'BTCZAR', 'BUY', '1', '100', '100', '99', '101', '2',
                       5, 300, 'AWAITING_APPROVAL', 'now', 'later', 'h')",
        )
        .execute(&db.pool)
        .await
        .unwrap();

        assert!(sqlx::query("DELETE FROM hitl_approvals")
            .execute(&db.pool)
            .await
            .is_err());
    }
}
