use crate::domain::audit::AuditRecord;
use crate::domain::hitl::canonical_timestamp;
use crate::domain::repositories::AuditLog;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use uuid::Uuid;

use super::timestamp_column;

pub struct SqliteAuditLog {
    database: Database,
}

impl SqliteAuditLog {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl AuditLog for SqliteAuditLog {
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (
                correlation_id, actor, action, result,
                before_hash, after_hash, context_json, timestamp
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.correlation_id.to_string())
        .bind(&record.actor)
        .bind(&record.action)
        .bind(&record.result)
        .bind(&record.before_hash)
        .bind(&record.after_hash)
        .bind(record.context.to_string())
        .bind(canonical_timestamp(record.timestamp))
        .execute(&self.database.pool)
        .await
        .context("Failed to append audit record")?;

        Ok(())
    }

    async fn find_by_correlation(&self, correlation_id: Uuid) -> Result<Vec<AuditRecord>> {
        let rows: Vec<(
            String,
            String,
            String,
            String,
            Option<String>,
            Option<String>,
            String,
            String,
        )> = sqlx::query_as(
            r#"
            SELECT correlation_id, actor, action, result,
                   before_hash, after_hash, context_json, timestamp
            FROM audit_log
            WHERE correlation_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(correlation_id.to_string())
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to query audit log")?;

        rows.into_iter()
            .map(|(corr, actor, action, result, before, after, context, ts)| {
                Ok(AuditRecord {
                    correlation_id: Uuid::parse_str(&corr)?,
                    actor,
                    action,
                    result,
                    before_hash: before,
                    after_hash: after,
                    context: serde_json::from_str(&context)
                        .context("invalid audit context json")?,
                    timestamp: timestamp_column(&ts, "timestamp")?,
                })
            })
            .collect()
    }
}
