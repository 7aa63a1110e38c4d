//! Audit records and sinks.
//!
//! Every mediated operation emits exactly one audit record, on success and
//! on failure. Failures to persist audit are logged and never mask the
//! operation's outcome.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single audit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Record identifier.
    pub id: Uuid,
    /// Instant the operation completed.
    pub timestamp: DateTime<Utc>,
    /// Actor identifier.
    pub actor_id: String,
    /// Actor role at the time of the operation.
    pub actor_role: String,
    /// Operation name (get_object, query_objects, traverse_link, ...).
    pub operation: String,
    /// Target type (object/link/action name, or a composite).
    pub target_type: String,
    /// Target identifier, when the operation addressed a single row.
    pub target_id: Option<String>,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Error message for failed operations (operator-facing detail).
    pub error_message: Option<String>,
    /// Wall-clock duration of the operation.
    pub execution_time_ms: i64,
}

impl AuditRecord {
    /// Create a record stamped with the current instant.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        actor_id: impl Into<String>,
        actor_role: impl Into<String>,
        operation: impl Into<String>,
        target_type: impl Into<String>,
        target_id: Option<String>,
        success: bool,
        error_message: Option<String>,
        execution_time_ms: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            actor_id: actor_id.into(),
            actor_role: actor_role.into(),
            operation: operation.into(),
            target_type: target_type.into(),
            target_id,
            success,
            error_message,
            execution_time_ms,
        }
    }
}

/// Error type for audit sinks.
#[derive(Debug, thiserror::Error)]
#[error("Audit write failed: {0}")]
pub struct AuditError(
    /// Underlying failure message.
    pub String,
);

/// Destination for audit records.
///
/// Implementations must be safe to call concurrently.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Persist a record.
    async fn record(&self, record: AuditRecord) -> Result<(), AuditError>;
}

/// In-memory audit sink for tests and local development.
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    records: parking_lot::Mutex<Vec<AuditRecord>>,
}

impl InMemoryAuditSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded entries.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    /// Entries matching an operation name.
    pub fn records_for_operation(&self, operation: &str) -> Vec<AuditRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.operation == operation)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn record(&self, record: AuditRecord) -> Result<(), AuditError> {
        self.records.lock().push(record);
        Ok(())
    }
}

/// SQL schema for the audit table (PostgreSQL).
pub const AUDIT_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS oms.audit_log (
    id UUID PRIMARY KEY,
    timestamp TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    actor_id TEXT NOT NULL,
    actor_role TEXT NOT NULL,
    operation TEXT NOT NULL,
    target_type TEXT NOT NULL,
    target_id TEXT,
    success BOOLEAN NOT NULL,
    error_message TEXT,
    execution_time_ms BIGINT
);

CREATE INDEX IF NOT EXISTS ix_audit_timestamp_actor
    ON oms.audit_log(timestamp, actor_id);
CREATE INDEX IF NOT EXISTS ix_audit_operation_success
    ON oms.audit_log(operation, success);
CREATE INDEX IF NOT EXISTS ix_audit_target
    ON oms.audit_log(target_type, target_id);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_sink_records() {
        let sink = InMemoryAuditSink::new();
        sink.record(AuditRecord::new(
            "u-1",
            "scout",
            "get_object",
            "Player",
            Some("P1".into()),
            true,
            None,
            12,
        ))
        .await
        .unwrap();

        let records = sink.records_for_operation("get_object");
        assert_eq!(records.len(), 1);
        assert!(records[0].success);
        assert_eq!(records[0].target_id.as_deref(), Some("P1"));
    }
}
