//! Shared request, outcome and response types
//!
//! These are the values that cross the engine boundary: the request a
//! caller submits, the per-binding outcomes the orchestrator collects,
//! and the aggregated response it returns.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Named fields flowing through a workflow (request payload, handler
/// outputs, session context snapshots)
pub type FieldMap = HashMap<String, serde_json::Value>;

/// Mint a short prefixed identifier, e.g. `APT_3F9C2A41`
///
/// Eight uppercase hex characters of a v4 UUID; used for request,
/// session and domain record identifiers.
pub fn tag_id(prefix: &str) -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, hex[..8].to_uppercase())
}

/// An inbound request to execute one workflow
///
/// Immutable once received. The payload is seeded into Session Context
/// before the first step runs, so definitions may require payload fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRequest {
    /// Workflow selector, resolved by the catalog
    pub request_type: String,
    /// Session to execute under; minted by the orchestrator when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Domain-specific payload fields
    #[serde(default)]
    pub payload: FieldMap,
}

impl WorkflowRequest {
    pub fn new(request_type: impl Into<String>) -> Self {
        Self {
            request_type: request_type.into(),
            session_id: None,
            payload: FieldMap::new(),
        }
    }

    /// Pin the request to an existing session
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Add one payload field
    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    /// Replace the whole payload
    pub fn with_payload(mut self, payload: FieldMap) -> Self {
        self.payload = payload;
        self
    }
}

/// Terminal result of one handler binding: success payload or failure,
/// never both
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepResult {
    Succeeded { output: FieldMap },
    Failed { kind: String, message: String },
}

impl StepResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

/// One executed handler binding: where it ran, how it ended, and whether
/// recovery was involved
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    /// Step the binding belongs to
    pub step: String,
    /// Handler kind that ran
    pub handler: String,
    /// Action dispatched within the handler, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(flatten)]
    pub result: StepResult,
    /// Invocation attempts consumed (1 unless the Retry policy fired)
    pub attempts: u32,
    /// True when a Continue policy substituted fallback values
    pub degraded: bool,
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_success()
    }

    /// Failure kind, if the binding failed
    pub fn failure_kind(&self) -> Option<&str> {
        match &self.result {
            StepResult::Failed { kind, .. } => Some(kind),
            StepResult::Succeeded { .. } => None,
        }
    }

    /// A field from the success payload
    pub fn output(&self, key: &str) -> Option<&serde_json::Value> {
        match &self.result {
            StepResult::Succeeded { output } => output.get(key),
            StepResult::Failed { .. } => None,
        }
    }
}

/// Overall disposition of one workflow execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Every step completed normally
    Succeeded,
    /// Every step ran, but at least one completed through a fallback
    Degraded,
    /// Rejected at classification, or halted by policy
    Failed,
}

/// Caller-facing failure detail: enough to identify the failing step and
/// handler, without replaying audit payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseError {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
    pub message: String,
}

/// The orchestrator's final output for one request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedResponse {
    pub request_id: String,
    pub session_id: String,
    /// Workflow that ran; absent when classification rejected the request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,
    pub status: WorkflowStatus,
    /// One outcome per handler binding executed, in declaration order
    pub steps: Vec<StepOutcome>,
    /// Final Session Context snapshot
    pub context: FieldMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl AggregatedResponse {
    pub fn is_success(&self) -> bool {
        matches!(
            self.status,
            WorkflowStatus::Succeeded | WorkflowStatus::Degraded
        )
    }

    /// First outcome recorded for a handler kind
    pub fn outcome(&self, handler: &str) -> Option<&StepOutcome> {
        self.steps.iter().find(|o| o.handler == handler)
    }

    /// Context field as a string slice, if present and a string
    pub fn context_str(&self, key: &str) -> Option<&str> {
        self.context.get(key).and_then(|v| v.as_str())
    }
}
