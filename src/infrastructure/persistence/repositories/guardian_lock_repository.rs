use crate::domain::guardian::GuardianLock;
use crate::domain::hitl::canonical_timestamp;
use crate::domain::money::canonical_string;
use crate::domain::repositories::GuardianLockRepository;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use uuid::Uuid;

use super::{decimal_column, enum_column, timestamp_column};

pub struct SqliteGuardianLockRepository {
    database: Database,
}

impl SqliteGuardianLockRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl GuardianLockRepository for SqliteGuardianLockRepository {
    /// Save the lock record (upsert of the single row).
    async fn save(&self, lock: &GuardianLock) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO guardian_lock (
                id, lock_id, locked_at, reason, daily_loss_zar, daily_loss_pct, correlation_id
            )
            VALUES (1, $1, $2, $3, $4, $5, $6)
            ON CONFLICT(id) DO UPDATE SET
                lock_id = excluded.lock_id,
                locked_at = excluded.locked_at,
                reason = excluded.reason,
                daily_loss_zar = excluded.daily_loss_zar,
                daily_loss_pct = excluded.daily_loss_pct,
                correlation_id = excluded.correlation_id
            "#,
        )
        .bind(lock.lock_id.to_string())
        .bind(canonical_timestamp(lock.locked_at))
        .bind(lock.reason.to_string())
        .bind(canonical_string(lock.daily_loss_zar))
        .bind(canonical_string(lock.daily_loss_pct))
        .bind(lock.correlation_id.map(|c| c.to_string()))
        .execute(&self.database.pool)
        .await
        .context("Failed to save guardian lock")?;

        Ok(())
    }

    async fn load(&self) -> Result<Option<GuardianLock>> {
        let row: Option<(String, String, String, String, String, Option<String>)> =
            sqlx::query_as(
                r#"
                SELECT lock_id, locked_at, reason, daily_loss_zar, daily_loss_pct, correlation_id
                FROM guardian_lock
                WHERE id = 1
                "#,
            )
            .fetch_optional(&self.database.pool)
            .await
            .context("Failed to load guardian lock")?;

        let Some((lock_id, locked_at, reason, loss_zar, loss_pct, corr)) = row else {
            return Ok(None);
        };

        Ok(Some(GuardianLock {
            lock_id: Uuid::parse_str(&lock_id)?,
            locked_at: timestamp_column(&locked_at, "locked_at")?,
            reason: enum_column(&reason, "reason")?,
            daily_loss_zar: decimal_column(&loss_zar, "daily_loss_zar")?,
            daily_loss_pct: decimal_column(&loss_pct, "daily_loss_pct")?,
            correlation_id: corr.as_deref().map(Uuid::parse_str).transpose()?,
        }))
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM guardian_lock WHERE id = 1")
            .execute(&self.database.pool)
            .await
            .context("Failed to clear guardian lock")?;
        Ok(())
    }
}
