use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One append-only audit entry. Rows are never updated or deleted; the
/// storage layer enforces this with triggers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub correlation_id: Uuid,
    pub actor: String,
    pub action: String,
    pub result: String,
    pub before_hash: Option<String>,
    pub after_hash: Option<String>,
    pub context: Value,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(
        correlation_id: Uuid,
        actor: impl Into<String>,
        action: impl Into<String>,
        result: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id,
            actor: actor.into(),
            action: action.into(),
            result: result.into(),
            before_hash: None,
            after_hash: None,
            context: Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn with_hashes(
        mut self,
        before: Option<String>,
        after: Option<String>,
    ) -> Self {
        self.before_hash = before;
        self.after_hash = after;
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }
}
