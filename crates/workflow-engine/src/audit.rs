//! Audit records for orchestration decisions and handler calls
//!
//! The orchestrator emits one immutable record per routing decision,
//! handler invocation and handler outcome. Records for one session are
//! emitted in causal order; records across sessions may interleave but
//! each carries its own timestamp and session id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Trait for consuming audit records
///
/// This abstracts over the destination (collector, log shipper, span
/// exporter) so the engine can run in different contexts.
pub trait AuditSink: Send + Sync {
    /// Consume one record
    ///
    /// Returns an error if the record could not be accepted; the
    /// orchestrator logs such errors and never fails a workflow on them.
    fn record(&self, record: AuditRecord) -> Result<(), AuditError>;
}

/// Error when recording to a sink fails
#[derive(Debug, Clone)]
pub struct AuditError {
    pub message: String,
}

impl std::fmt::Display for AuditError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Audit error: {}", self.message)
    }
}

impl std::error::Error for AuditError {}

impl AuditError {
    pub fn sink_closed() -> Self {
        Self {
            message: "Sink closed".to_string(),
        }
    }
}

/// Actor name used for records the orchestrator emits about itself
pub const ORCHESTRATOR_ACTOR: &str = "orchestrator";

/// What an audit record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Request classified to a workflow
    WorkflowRouted,
    /// Request rejected at classification
    RequestRejected,
    /// Request payload merged into session context
    ContextSeeded,
    /// Handler invocation dispatched
    HandlerStarted,
    /// Handler reached a successful outcome
    HandlerSucceeded,
    /// Handler reached a failed outcome
    HandlerFailed,
    /// Failed invocation scheduled for another attempt
    HandlerRetrying,
    /// Continue policy substituted fallback values into context
    FallbackApplied,
    /// Halt policy stopped the workflow
    WorkflowHalted,
    /// All steps completed
    WorkflowCompleted,
}

/// One immutable entry in the audit stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    /// `"orchestrator"` or the handler kind that the record is about
    pub actor: String,
    pub action: AuditAction,
    pub session_id: String,
    /// Structured detail payload; stays in the audit stream, never
    /// replayed into caller-facing responses
    #[serde(default)]
    pub details: serde_json::Value,
}

impl AuditRecord {
    /// A record about an orchestration decision
    pub fn orchestrator(
        action: AuditAction,
        session_id: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            actor: ORCHESTRATOR_ACTOR.to_string(),
            action,
            session_id: session_id.into(),
            details,
        }
    }

    /// A record about one handler's invocation or outcome
    pub fn handler(
        handler: impl Into<String>,
        action: AuditAction,
        session_id: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            actor: handler.into(),
            action,
            session_id: session_id.into(),
            details,
        }
    }
}

/// A no-op sink that discards all records
///
/// Useful when auditing isn't wired up.
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _record: AuditRecord) -> Result<(), AuditError> {
        Ok(())
    }
}

/// A collecting sink backed by a vector
///
/// Useful in tests to verify emission order and content.
#[derive(Default)]
pub struct MemoryAuditSink {
    records: parking_lot::Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All collected records, in emission order
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    /// Collected records for one session, in emission order
    pub fn records_for(&self, session_id: &str) -> Vec<AuditRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect()
    }

    /// Clear all collected records
    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: AuditRecord) -> Result<(), AuditError> {
        self.records.lock().push(record);
        Ok(())
    }
}
