//! Security audit records for writes to storage locations.
//!
//! Storage locations emit one [`AuditRecord`] per write attempt through an
//! [`AuditLogger`]; the engine never calls the logger directly.

use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of an audited operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditResult {
    /// The operation succeeded.
    Success,
    /// The operation failed.
    Failure,
}

impl fmt::Display for AuditResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
        }
    }
}

/// One audited operation against a storage location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// When the operation finished.
    pub timestamp: DateTime<Utc>,
    /// Who performed the operation.
    pub identity: String,
    /// What was touched, as `store/name`.
    pub resource: String,
    /// The operation, e.g. `set-secret`.
    pub operation: String,
    /// How it went.
    pub result: AuditResult,
}

impl AuditRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(
        identity: impl Into<String>,
        resource: impl Into<String>,
        operation: impl Into<String>,
        result: AuditResult,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            identity: identity.into(),
            resource: resource.into(),
            operation: operation.into(),
            result,
        }
    }
}

/// Destination for audit records.
pub trait AuditLogger: Send + Sync {
    /// Records one operation.
    fn log(&self, record: &AuditRecord);
}

/// Writes audit records through `tracing` under the `secret_manager::audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLogger;

impl AuditLogger for TracingAuditLogger {
    fn log(&self, record: &AuditRecord) {
        let json = serde_json::to_string(record).unwrap_or_else(|_| "{}".to_string());
        match record.result {
            AuditResult::Success => tracing::info!(
                target: "secret_manager::audit",
                event_id = %record.event_id,
                identity = %record.identity,
                resource = %record.resource,
                operation = %record.operation,
                result = %record.result,
                event_json = %json,
                "[AUDIT] {}", record.operation
            ),
            AuditResult::Failure => tracing::warn!(
                target: "secret_manager::audit",
                event_id = %record.event_id,
                identity = %record.identity,
                resource = %record.resource,
                operation = %record.operation,
                result = %record.result,
                event_json = %json,
                "[AUDIT] {}", record.operation
            ),
        }
    }
}

/// Discards every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditLogger;

impl AuditLogger for NoopAuditLogger {
    fn log(&self, _record: &AuditRecord) {}
}

/// Keeps records in memory so tests can inspect them.
#[derive(Debug, Default)]
pub struct MemoryAuditLogger {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditLogger {
    /// Creates an empty logger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything logged so far.
    #[must_use]
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }
}

impl AuditLogger for MemoryAuditLogger {
    fn log(&self, record: &AuditRecord) {
        self.records.lock().push(record.clone());
    }
}
