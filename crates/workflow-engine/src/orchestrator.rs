//! Workflow execution
//!
//! The orchestrator is the coordinating flow for one request: classify,
//! resolve the session, then walk the definition's steps in declared
//! order. Parallel group members fan out on a `FuturesUnordered` and are
//! always awaited to a terminal outcome before policy is applied; a Halt
//! decision skips steps that have not started, never steps in flight.
//!
//! Handlers never write Session Context themselves. The orchestrator
//! merges each successful binding's declared `produces` fields, which
//! keeps all writes behind the store's per-session critical section.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use serde_json::json;

use crate::audit::{AuditAction, AuditRecord, AuditSink, NullAuditSink};
use crate::catalog::WorkflowCatalog;
use crate::definition::{HandlerBinding, StepDefinition, StepKind};
use crate::error::EngineError;
use crate::policy::{FailureDisposition, PolicyTable};
use crate::registry::{
    failure_kinds, Handler, HandlerFailure, HandlerInput, HandlerRegistry, HandlerResult,
};
use crate::session::{SessionContext, SessionStore};
use crate::types::{
    tag_id, AggregatedResponse, FieldMap, ResponseError, StepOutcome, StepResult, WorkflowRequest,
    WorkflowStatus,
};

/// Response error kind for a request whose type maps to no workflow
pub const UNKNOWN_WORKFLOW_KIND: &str = "unknown_workflow";
/// Response error kind for a request with an empty type
pub const EMPTY_REQUEST_TYPE_KIND: &str = "empty_request_type";

const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30);

/// Coordinates workflow execution across the catalog, registry, session
/// store and policy table
///
/// `execute` is infallible: every path, including rejection and halt,
/// terminates in an [`AggregatedResponse`].
pub struct Orchestrator {
    catalog: Arc<WorkflowCatalog>,
    registry: Arc<HandlerRegistry>,
    sessions: Arc<SessionStore>,
    policies: PolicyTable,
    audit: Arc<dyn AuditSink>,
    step_timeout: Duration,
}

impl Orchestrator {
    /// Create an orchestrator with a fresh session store, an empty policy
    /// table (every failure halts) and no audit sink
    pub fn new(catalog: Arc<WorkflowCatalog>, registry: Arc<HandlerRegistry>) -> Self {
        Self {
            catalog,
            registry,
            sessions: Arc::new(SessionStore::new()),
            policies: PolicyTable::new(),
            audit: Arc::new(NullAuditSink),
            step_timeout: DEFAULT_STEP_TIMEOUT,
        }
    }

    /// Use a shared session store
    pub fn with_sessions(mut self, sessions: Arc<SessionStore>) -> Self {
        self.sessions = sessions;
        self
    }

    /// Use a configured policy table
    pub fn with_policies(mut self, policies: PolicyTable) -> Self {
        self.policies = policies;
        self
    }

    /// Attach an audit sink
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = sink;
        self
    }

    /// Override the per-invocation watchdog timeout (default 30s)
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// The session store backing this orchestrator
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Execute one request to completion
    pub async fn execute(&self, request: WorkflowRequest) -> AggregatedResponse {
        let request_id = tag_id("REQ");

        let workflow = match self.catalog.classify(&request.request_type) {
            Ok(workflow) => workflow,
            Err(error) => return self.reject(request_id, &request, &error),
        };

        let session_id = self.resolve_session_id(&request);
        let context = self.sessions.open(&session_id);

        self.record(AuditRecord::orchestrator(
            AuditAction::WorkflowRouted,
            &session_id,
            json!({
                "request_id": request_id,
                "request_type": request.request_type,
                "workflow": workflow.id,
            }),
        ));
        log::info!(
            "Request {} routed to workflow '{}' (session {})",
            request_id,
            workflow.id,
            session_id
        );

        if !request.payload.is_empty() {
            let mut seeded: Vec<&String> = request.payload.keys().collect();
            seeded.sort();
            self.record(AuditRecord::orchestrator(
                AuditAction::ContextSeeded,
                &session_id,
                json!({ "request_id": request_id, "fields": seeded }),
            ));
            context.merge(request.payload.clone());
        }

        let mut outcomes: Vec<StepOutcome> = Vec::with_capacity(workflow.binding_count());
        let mut degraded = false;

        for step in &workflow.steps {
            let mut halt: Option<ResponseError> = None;

            for outcome in self.run_step(step, &context).await {
                match &outcome.result {
                    StepResult::Succeeded { .. } => outcomes.push(outcome),
                    StepResult::Failed { kind, message } => {
                        let rule = self.policies.resolve(&outcome.handler, kind);
                        match rule.disposition {
                            FailureDisposition::Continue => {
                                if !rule.fallback.is_empty() {
                                    context.merge(rule.fallback.clone());
                                }
                                self.record(AuditRecord::orchestrator(
                                    AuditAction::FallbackApplied,
                                    &session_id,
                                    json!({
                                        "request_id": request_id,
                                        "step": outcome.step,
                                        "handler": outcome.handler,
                                        "kind": kind,
                                        "fallback_fields": sorted_keys(&rule.fallback),
                                    }),
                                ));
                                log::info!(
                                    "Handler '{}' on step '{}' continued with fallback ({})",
                                    outcome.handler,
                                    outcome.step,
                                    kind
                                );
                                degraded = true;
                                let mut outcome = outcome;
                                outcome.degraded = true;
                                outcomes.push(outcome);
                            }
                            FailureDisposition::Halt => {
                                if halt.is_none() {
                                    halt = Some(ResponseError {
                                        kind: kind.clone(),
                                        step: Some(outcome.step.clone()),
                                        handler: Some(outcome.handler.clone()),
                                        message: message.clone(),
                                    });
                                }
                                outcomes.push(outcome);
                            }
                        }
                    }
                }
            }

            if let Some(error) = halt {
                self.record(AuditRecord::orchestrator(
                    AuditAction::WorkflowHalted,
                    &session_id,
                    json!({
                        "request_id": request_id,
                        "step": error.step,
                        "handler": error.handler,
                        "kind": error.kind,
                    }),
                ));
                log::warn!(
                    "Workflow '{}' halted at step '{}': {}",
                    workflow.id,
                    error.step.as_deref().unwrap_or("?"),
                    error.message
                );
                return AggregatedResponse {
                    request_id,
                    session_id: session_id.clone(),
                    workflow: Some(workflow.id.clone()),
                    status: WorkflowStatus::Failed,
                    steps: outcomes,
                    context: context.snapshot(),
                    error: Some(error),
                };
            }
        }

        let status = if degraded {
            WorkflowStatus::Degraded
        } else {
            WorkflowStatus::Succeeded
        };
        self.record(AuditRecord::orchestrator(
            AuditAction::WorkflowCompleted,
            &session_id,
            json!({ "request_id": request_id, "status": status }),
        ));
        log::info!(
            "Workflow '{}' completed for request {} ({:?})",
            workflow.id,
            request_id,
            status
        );

        AggregatedResponse {
            request_id,
            session_id,
            workflow: Some(workflow.id.clone()),
            status,
            steps: outcomes,
            context: context.snapshot(),
            error: None,
        }
    }

    /// Run one step's bindings to terminal outcomes, in declaration order
    ///
    /// Inputs for every member bind from one snapshot taken before the
    /// step starts; a member never sees a sibling's output.
    async fn run_step(&self, step: &StepDefinition, context: &SessionContext) -> Vec<StepOutcome> {
        let snapshot = context.snapshot();
        match step.kind {
            StepKind::Sequential => {
                let mut outcomes = Vec::with_capacity(step.bindings.len());
                for binding in &step.bindings {
                    outcomes.push(self.run_binding(step, binding, &snapshot, context).await);
                }
                outcomes
            }
            StepKind::Parallel => {
                let mut pending = FuturesUnordered::new();
                for (index, binding) in step.bindings.iter().enumerate() {
                    let member = self.run_binding(step, binding, &snapshot, context);
                    pending.push(async move { (index, member.await) });
                }
                let mut collected: Vec<(usize, StepOutcome)> =
                    Vec::with_capacity(step.bindings.len());
                while let Some(done) = pending.next().await {
                    collected.push(done);
                }
                collected.sort_by_key(|(index, _)| *index);
                collected.into_iter().map(|(_, outcome)| outcome).collect()
            }
        }
    }

    /// Drive one handler binding to a terminal outcome, retrying per the
    /// policy table, and merge its declared produces on success
    async fn run_binding(
        &self,
        step: &StepDefinition,
        binding: &HandlerBinding,
        snapshot: &FieldMap,
        context: &SessionContext,
    ) -> StepOutcome {
        let session_id = context.session_id();

        let mut fields = FieldMap::new();
        let mut missing: Vec<&str> = Vec::new();
        for name in &binding.requires {
            match snapshot.get(name) {
                Some(value) => {
                    fields.insert(name.clone(), value.clone());
                }
                None => missing.push(name),
            }
        }
        if !missing.is_empty() {
            let failure = HandlerFailure::new(
                failure_kinds::MISSING_CONTEXT_FIELD,
                format!("Required context field(s) missing: {}", missing.join(", ")),
            );
            return self.fail_without_invoking(step, binding, session_id, failure);
        }
        for (key, value) in &binding.params {
            fields.insert(key.clone(), value.clone());
        }

        let Some(handler) = self.registry.get_handler(&binding.handler) else {
            let failure = HandlerFailure::new(
                failure_kinds::HANDLER_UNAVAILABLE,
                format!("No live instance registered for '{}'", binding.handler),
            );
            return self.fail_without_invoking(step, binding, session_id, failure);
        };

        let input = HandlerInput {
            session_id: session_id.to_string(),
            action: binding.action.clone(),
            fields,
        };

        self.record(AuditRecord::handler(
            &binding.handler,
            AuditAction::HandlerStarted,
            session_id,
            json!({ "step": step.name, "action": binding.action }),
        ));
        log::debug!(
            "Invoking handler '{}' for step '{}' (session {})",
            binding.handler,
            step.name,
            session_id
        );

        let mut attempts: u32 = 0;
        let result = loop {
            attempts += 1;
            match self.invoke(handler.as_ref(), input.clone()).await {
                Ok(output) => break Ok(output),
                Err(failure) => {
                    let rule = self.policies.resolve(&binding.handler, &failure.kind);
                    if attempts >= rule.max_attempts() {
                        break Err(failure);
                    }
                    let delay = rule
                        .retry
                        .map(|retry| retry.delay_for(attempts))
                        .unwrap_or_default();
                    self.record(AuditRecord::handler(
                        &binding.handler,
                        AuditAction::HandlerRetrying,
                        session_id,
                        json!({
                            "step": step.name,
                            "kind": failure.kind,
                            "attempt": attempts,
                            "next_delay_ms": delay.as_millis() as u64,
                        }),
                    ));
                    log::debug!(
                        "Handler '{}' failed attempt {} ({}), retrying in {:?}",
                        binding.handler,
                        attempts,
                        failure.kind,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        };

        match result {
            Ok(output) => {
                let mut produced = FieldMap::new();
                for name in &binding.produces {
                    if let Some(value) = output.get(name) {
                        produced.insert(name.clone(), value.clone());
                    }
                }
                context.merge(produced);
                self.record(AuditRecord::handler(
                    &binding.handler,
                    AuditAction::HandlerSucceeded,
                    session_id,
                    json!({ "step": step.name, "attempts": attempts }),
                ));
                log::debug!(
                    "Handler '{}' succeeded on step '{}' after {} attempt(s)",
                    binding.handler,
                    step.name,
                    attempts
                );
                StepOutcome {
                    step: step.name.clone(),
                    handler: binding.handler.clone(),
                    action: binding.action.clone(),
                    result: StepResult::Succeeded { output },
                    attempts,
                    degraded: false,
                }
            }
            Err(failure) => {
                self.record(AuditRecord::handler(
                    &binding.handler,
                    AuditAction::HandlerFailed,
                    session_id,
                    json!({
                        "step": step.name,
                        "kind": failure.kind,
                        "message": failure.message,
                        "attempts": attempts,
                    }),
                ));
                log::warn!(
                    "Handler '{}' failed on step '{}' after {} attempt(s): {}",
                    binding.handler,
                    step.name,
                    attempts,
                    failure
                );
                StepOutcome {
                    step: step.name.clone(),
                    handler: binding.handler.clone(),
                    action: binding.action.clone(),
                    result: StepResult::Failed {
                        kind: failure.kind,
                        message: failure.message,
                    },
                    attempts,
                    degraded: false,
                }
            }
        }
    }

    /// One invocation attempt under the watchdog timeout
    async fn invoke(&self, handler: &dyn Handler, input: HandlerInput) -> HandlerResult {
        match tokio::time::timeout(self.step_timeout, handler.execute(input)).await {
            Ok(result) => result,
            Err(_) => Err(HandlerFailure::new(
                failure_kinds::TIMEOUT,
                format!("No outcome within {}ms", self.step_timeout.as_millis()),
            )),
        }
    }

    /// Terminal failure raised by the engine before the handler ran
    fn fail_without_invoking(
        &self,
        step: &StepDefinition,
        binding: &HandlerBinding,
        session_id: &str,
        failure: HandlerFailure,
    ) -> StepOutcome {
        self.record(AuditRecord::handler(
            &binding.handler,
            AuditAction::HandlerFailed,
            session_id,
            json!({
                "step": step.name,
                "kind": failure.kind,
                "message": failure.message,
                "attempts": 0,
            }),
        ));
        log::warn!(
            "Binding '{}' on step '{}' not invoked: {}",
            binding.handler,
            step.name,
            failure
        );
        StepOutcome {
            step: step.name.clone(),
            handler: binding.handler.clone(),
            action: binding.action.clone(),
            result: StepResult::Failed {
                kind: failure.kind,
                message: failure.message,
            },
            attempts: 0,
            degraded: false,
        }
    }

    /// Build the failed response for a request rejected at classification
    ///
    /// No steps execute and no session is created; the response carries
    /// the provided session id, if any, unchanged.
    fn reject(
        &self,
        request_id: String,
        request: &WorkflowRequest,
        error: &EngineError,
    ) -> AggregatedResponse {
        let session_id = request.session_id.clone().unwrap_or_default();
        let kind = match error {
            EngineError::EmptyRequestType => EMPTY_REQUEST_TYPE_KIND,
            _ => UNKNOWN_WORKFLOW_KIND,
        };
        self.record(AuditRecord::orchestrator(
            AuditAction::RequestRejected,
            &session_id,
            json!({
                "request_id": request_id,
                "request_type": request.request_type,
                "supported": self.catalog.supported_types(),
            }),
        ));
        log::warn!("Rejected request {}: {}", request_id, error);
        AggregatedResponse {
            request_id,
            session_id: session_id.clone(),
            workflow: None,
            status: WorkflowStatus::Failed,
            steps: Vec::new(),
            context: self.sessions.snapshot(&session_id),
            error: Some(ResponseError {
                kind: kind.to_string(),
                step: None,
                handler: None,
                message: error.to_string(),
            }),
        }
    }

    fn resolve_session_id(&self, request: &WorkflowRequest) -> String {
        if let Some(id) = &request.session_id {
            return id.clone();
        }
        loop {
            let id = tag_id("SES");
            if !self.sessions.contains(&id) {
                return id;
            }
        }
    }

    fn record(&self, record: AuditRecord) {
        if let Err(error) = self.audit.record(record) {
            log::warn!("Audit sink rejected a record: {}", error);
        }
    }
}

fn sorted_keys(fields: &FieldMap) -> Vec<&String> {
    let mut keys: Vec<&String> = fields.keys().collect();
    keys.sort();
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::builder::WorkflowBuilder;
    use crate::descriptor::HandlerMetadata;
    use crate::policy::{FailureRule, RetryPolicy};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn metadata(kind: &str, produces: &[&str]) -> HandlerMetadata {
        HandlerMetadata::new(kind, kind, "test handler").with_produces(produces.iter().copied())
    }

    fn single_step_catalog(registry: &HandlerRegistry) -> Arc<WorkflowCatalog> {
        let definition = WorkflowBuilder::new("echo_flow", "Echo Flow")
            .input("value")
            .sequential(
                "echo",
                HandlerBinding::new("echo")
                    .requires(["value"])
                    .produces(["echoed"]),
            )
            .build();
        let mut catalog = WorkflowCatalog::new();
        catalog.register(definition, Some(registry)).unwrap();
        Arc::new(catalog)
    }

    fn echo_registry() -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry.register_callback(metadata("echo", &["echoed"]), |input| async move {
            let value = input.field("value").cloned().unwrap_or_default();
            let mut output = FieldMap::new();
            output.insert("echoed".to_string(), value);
            Ok(output)
        });
        registry
    }

    #[tokio::test]
    async fn test_single_step_success() {
        let registry = Arc::new(echo_registry());
        let catalog = single_step_catalog(&registry);
        let orchestrator = Orchestrator::new(catalog, registry);

        let response = orchestrator
            .execute(WorkflowRequest::new("echo_flow").with_field("value", json!("hello")))
            .await;

        assert_eq!(response.status, WorkflowStatus::Succeeded);
        assert_eq!(response.steps.len(), 1);
        assert_eq!(response.steps[0].attempts, 1);
        assert_eq!(response.context["echoed"], json!("hello"));
        assert!(response.session_id.starts_with("SES_"));
        assert!(response.request_id.starts_with("REQ_"));
    }

    #[tokio::test]
    async fn test_unknown_request_type_rejected() {
        let registry = Arc::new(echo_registry());
        let catalog = single_step_catalog(&registry);
        let sink = Arc::new(MemoryAuditSink::new());
        let orchestrator =
            Orchestrator::new(catalog, registry).with_audit_sink(sink.clone());

        let response = orchestrator
            .execute(WorkflowRequest::new("no_such_flow"))
            .await;

        assert_eq!(response.status, WorkflowStatus::Failed);
        assert!(response.steps.is_empty());
        let error = response.error.unwrap();
        assert_eq!(error.kind, UNKNOWN_WORKFLOW_KIND);

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, AuditAction::RequestRejected);
        assert_eq!(records[0].details["supported"], json!(["echo_flow"]));
    }

    #[tokio::test]
    async fn test_payload_seeded_before_first_step() {
        let registry = Arc::new(echo_registry());
        let catalog = single_step_catalog(&registry);
        let sink = Arc::new(MemoryAuditSink::new());
        let orchestrator =
            Orchestrator::new(catalog, registry).with_audit_sink(sink.clone());

        let response = orchestrator
            .execute(
                WorkflowRequest::new("echo_flow")
                    .with_session("SES_SEED0001")
                    .with_field("value", json!(42)),
            )
            .await;

        assert_eq!(response.status, WorkflowStatus::Succeeded);
        let actions: Vec<AuditAction> = sink
            .records_for("SES_SEED0001")
            .iter()
            .map(|r| r.action)
            .collect();
        assert_eq!(
            actions,
            vec![
                AuditAction::WorkflowRouted,
                AuditAction::ContextSeeded,
                AuditAction::HandlerStarted,
                AuditAction::HandlerSucceeded,
                AuditAction::WorkflowCompleted,
            ]
        );
    }

    #[tokio::test]
    async fn test_halt_skips_remaining_steps() {
        let mut registry = HandlerRegistry::new();
        registry.register_callback(metadata("first", &["a"]), |_| async move {
            Err(HandlerFailure::new("validation_failed", "bad form"))
        });
        registry.register_callback(metadata("second", &["b"]), |_| async move {
            Ok(FieldMap::new())
        });
        let registry = Arc::new(registry);

        let definition = WorkflowBuilder::new("two_step", "Two Step")
            .sequential("one", HandlerBinding::new("first").produces(["a"]))
            .sequential("two", HandlerBinding::new("second").produces(["b"]))
            .build();
        let mut catalog = WorkflowCatalog::new();
        catalog.register(definition, Some(&registry)).unwrap();

        let orchestrator = Orchestrator::new(Arc::new(catalog), registry);
        let response = orchestrator.execute(WorkflowRequest::new("two_step")).await;

        assert_eq!(response.status, WorkflowStatus::Failed);
        assert_eq!(response.steps.len(), 1);
        let error = response.error.unwrap();
        assert_eq!(error.kind, "validation_failed");
        assert_eq!(error.step.as_deref(), Some("one"));
        assert_eq!(error.handler.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_continue_policy_merges_fallback_and_degrades() {
        let mut registry = HandlerRegistry::new();
        registry.register_callback(metadata("flaky", &["status"]), |_| async move {
            Err(HandlerFailure::new("upstream_down", "no answer"))
        });
        let registry = Arc::new(registry);

        let definition = WorkflowBuilder::new("tolerant", "Tolerant")
            .sequential("check", HandlerBinding::new("flaky").produces(["status"]))
            .build();
        let mut catalog = WorkflowCatalog::new();
        catalog.register(definition, Some(&registry)).unwrap();

        let mut fallback = FieldMap::new();
        fallback.insert("status".to_string(), json!("pending"));
        let policies = PolicyTable::new().rule(
            "flaky",
            "upstream_down",
            FailureRule::continue_with(fallback),
        );

        let orchestrator =
            Orchestrator::new(Arc::new(catalog), registry).with_policies(policies);
        let response = orchestrator.execute(WorkflowRequest::new("tolerant")).await;

        assert_eq!(response.status, WorkflowStatus::Degraded);
        assert!(response.is_success());
        assert!(response.error.is_none());
        assert_eq!(response.steps.len(), 1);
        assert!(response.steps[0].degraded);
        assert_eq!(response.context["status"], json!("pending"));
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        let mut registry = HandlerRegistry::new();
        registry.register_callback(metadata("wobbly", &["done"]), move |_| {
            let seen = seen.clone();
            async move {
                if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(HandlerFailure::new("upstream_down", "try again"))
                } else {
                    let mut output = FieldMap::new();
                    output.insert("done".to_string(), json!(true));
                    Ok(output)
                }
            }
        });
        let registry = Arc::new(registry);

        let definition = WorkflowBuilder::new("retrying", "Retrying")
            .sequential("only", HandlerBinding::new("wobbly").produces(["done"]))
            .build();
        let mut catalog = WorkflowCatalog::new();
        catalog.register(definition, Some(&registry)).unwrap();

        let policies = PolicyTable::new().rule(
            "wobbly",
            "upstream_down",
            FailureRule::halt().with_retry(RetryPolicy::new(3, 1, 10)),
        );
        let sink = Arc::new(MemoryAuditSink::new());
        let orchestrator = Orchestrator::new(Arc::new(catalog), registry)
            .with_policies(policies)
            .with_audit_sink(sink.clone());

        let response = orchestrator.execute(WorkflowRequest::new("retrying")).await;

        assert_eq!(response.status, WorkflowStatus::Succeeded);
        assert_eq!(response.steps[0].attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let retries = sink
            .records()
            .iter()
            .filter(|r| r.action == AuditAction::HandlerRetrying)
            .count();
        assert_eq!(retries, 2);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_falls_through_to_disposition() {
        let mut registry = HandlerRegistry::new();
        registry.register_callback(metadata("wobbly", &["done"]), |_| async move {
            Err(HandlerFailure::new("upstream_down", "still down"))
        });
        let registry = Arc::new(registry);

        let definition = WorkflowBuilder::new("retrying", "Retrying")
            .sequential("only", HandlerBinding::new("wobbly").produces(["done"]))
            .build();
        let mut catalog = WorkflowCatalog::new();
        catalog.register(definition, Some(&registry)).unwrap();

        let policies = PolicyTable::new().rule(
            "wobbly",
            "upstream_down",
            FailureRule::halt().with_retry(RetryPolicy::new(2, 1, 10)),
        );
        let orchestrator =
            Orchestrator::new(Arc::new(catalog), registry).with_policies(policies);

        let response = orchestrator.execute(WorkflowRequest::new("retrying")).await;

        assert_eq!(response.status, WorkflowStatus::Failed);
        assert_eq!(response.steps[0].attempts, 2);
        assert_eq!(response.error.unwrap().kind, "upstream_down");
    }

    #[tokio::test]
    async fn test_parallel_group_awaits_all_members() {
        let mut registry = HandlerRegistry::new();
        registry.register_callback(metadata("fast_fail", &["a"]), |_| async move {
            Err(HandlerFailure::new("boom", "failed fast"))
        });
        registry.register_callback(metadata("slow_ok", &["b"]), |_| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let mut output = FieldMap::new();
            output.insert("b".to_string(), json!("done"));
            Ok(output)
        });
        let registry = Arc::new(registry);

        let definition = WorkflowBuilder::new("fanout", "Fanout")
            .parallel(
                "pair",
                vec![
                    HandlerBinding::new("fast_fail").produces(["a"]),
                    HandlerBinding::new("slow_ok").produces(["b"]),
                ],
            )
            .build();
        let mut catalog = WorkflowCatalog::new();
        catalog.register(definition, Some(&registry)).unwrap();

        let orchestrator = Orchestrator::new(Arc::new(catalog), registry);
        let response = orchestrator.execute(WorkflowRequest::new("fanout")).await;

        // Halt applies only after the slow member finished; both outcomes
        // are recorded in declaration order.
        assert_eq!(response.status, WorkflowStatus::Failed);
        assert_eq!(response.steps.len(), 2);
        assert_eq!(response.steps[0].handler, "fast_fail");
        assert_eq!(response.steps[1].handler, "slow_ok");
        assert!(response.steps[1].is_success());
        assert_eq!(response.context["b"], json!("done"));
    }

    #[tokio::test]
    async fn test_parallel_halt_dominates_continue() {
        let mut registry = HandlerRegistry::new();
        registry.register_callback(metadata("tolerated", &["a"]), |_| async move {
            Err(HandlerFailure::new("soft", "tolerable"))
        });
        registry.register_callback(metadata("fatal", &["b"]), |_| async move {
            Err(HandlerFailure::new("hard", "fatal"))
        });
        let registry = Arc::new(registry);

        let definition = WorkflowBuilder::new("mixed", "Mixed")
            .parallel(
                "pair",
                vec![
                    HandlerBinding::new("tolerated").produces(["a"]),
                    HandlerBinding::new("fatal").produces(["b"]),
                ],
            )
            .sequential("after", HandlerBinding::new("tolerated").produces(["c"]))
            .build();
        let mut catalog = WorkflowCatalog::new();
        // "after" reuses a kind whose descriptor declares only "a"; skip
        // registry checks for this shape-only test.
        catalog.register(definition, None).unwrap();

        let mut fallback = FieldMap::new();
        fallback.insert("a".to_string(), json!("fallback"));
        let policies = PolicyTable::new().rule(
            "tolerated",
            "soft",
            FailureRule::continue_with(fallback),
        );

        let orchestrator =
            Orchestrator::new(Arc::new(catalog), registry).with_policies(policies);
        let response = orchestrator.execute(WorkflowRequest::new("mixed")).await;

        // Both failures recorded; the halting member decides the workflow.
        assert_eq!(response.status, WorkflowStatus::Failed);
        assert_eq!(response.steps.len(), 2);
        assert!(response.steps[0].degraded);
        assert_eq!(response.context["a"], json!("fallback"));
        let error = response.error.unwrap();
        assert_eq!(error.kind, "hard");
        assert_eq!(error.handler.as_deref(), Some("fatal"));
    }

    #[tokio::test]
    async fn test_parallel_members_overlap_in_time() {
        let mut registry = HandlerRegistry::new();
        registry.register_callback(metadata("left", &["a"]), |_| async move {
            tokio::time::sleep(Duration::from_millis(80)).await;
            let mut output = FieldMap::new();
            output.insert("a".to_string(), json!("done"));
            Ok(output)
        });
        registry.register_callback(metadata("right", &["b"]), |_| async move {
            tokio::time::sleep(Duration::from_millis(80)).await;
            let mut output = FieldMap::new();
            output.insert("b".to_string(), json!("done"));
            Ok(output)
        });
        let registry = Arc::new(registry);

        let definition = WorkflowBuilder::new("overlap", "Overlap")
            .parallel(
                "pair",
                vec![
                    HandlerBinding::new("left").produces(["a"]),
                    HandlerBinding::new("right").produces(["b"]),
                ],
            )
            .build();
        let mut catalog = WorkflowCatalog::new();
        catalog.register(definition, Some(&registry)).unwrap();

        let orchestrator = Orchestrator::new(Arc::new(catalog), registry);
        let started = std::time::Instant::now();
        let response = orchestrator.execute(WorkflowRequest::new("overlap")).await;

        // Sequential members would need 160ms of timer alone.
        assert_eq!(response.status, WorkflowStatus::Succeeded);
        assert!(started.elapsed() < Duration::from_millis(150));
        assert_eq!(response.context["a"], json!("done"));
        assert_eq!(response.context["b"], json!("done"));
    }

    #[tokio::test]
    async fn test_timeout_produces_timeout_kind() {
        let mut registry = HandlerRegistry::new();
        registry.register_callback(metadata("sleepy", &["a"]), |_| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(FieldMap::new())
        });
        let registry = Arc::new(registry);

        let definition = WorkflowBuilder::new("slow", "Slow")
            .sequential("nap", HandlerBinding::new("sleepy").produces(["a"]))
            .build();
        let mut catalog = WorkflowCatalog::new();
        catalog.register(definition, Some(&registry)).unwrap();

        let orchestrator = Orchestrator::new(Arc::new(catalog), registry)
            .with_step_timeout(Duration::from_millis(10));
        let response = orchestrator.execute(WorkflowRequest::new("slow")).await;

        assert_eq!(response.status, WorkflowStatus::Failed);
        assert_eq!(
            response.steps[0].failure_kind(),
            Some(failure_kinds::TIMEOUT)
        );
    }

    #[tokio::test]
    async fn test_missing_context_field_fails_without_invoking() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        let mut registry = HandlerRegistry::new();
        registry.register_callback(metadata("needs_input", &["out"]), move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            async move { Ok(FieldMap::new()) }
        });
        let registry = Arc::new(registry);

        // Built directly, bypassing catalog validation, to exercise the
        // runtime guard.
        let definition = WorkflowBuilder::new("unchecked", "Unchecked")
            .sequential(
                "only",
                HandlerBinding::new("needs_input")
                    .requires(["absent_field"])
                    .produces(["out"]),
            )
            .build();
        let mut catalog = WorkflowCatalog::new();
        catalog.register(definition, None).unwrap_err();

        // Register a permissive variant so classification succeeds.
        let loose = WorkflowBuilder::new("unchecked", "Unchecked")
            .input("absent_field")
            .sequential(
                "only",
                HandlerBinding::new("needs_input")
                    .requires(["absent_field"])
                    .produces(["out"]),
            )
            .build();
        catalog.register(loose, None).unwrap();

        let orchestrator = Orchestrator::new(Arc::new(catalog), registry);
        // The declared input is not actually supplied.
        let response = orchestrator.execute(WorkflowRequest::new("unchecked")).await;

        assert_eq!(response.status, WorkflowStatus::Failed);
        assert_eq!(
            response.steps[0].failure_kind(),
            Some(failure_kinds::MISSING_CONTEXT_FIELD)
        );
        assert_eq!(response.steps[0].attempts, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sessions_persist_across_requests() {
        let registry = Arc::new(echo_registry());
        let catalog = single_step_catalog(&registry);
        let orchestrator = Orchestrator::new(catalog, registry);

        let first = orchestrator
            .execute(WorkflowRequest::new("echo_flow").with_field("value", json!("one")))
            .await;
        let session_id = first.session_id.clone();

        let second = orchestrator
            .execute(
                WorkflowRequest::new("echo_flow")
                    .with_session(&session_id)
                    .with_field("value", json!("two")),
            )
            .await;

        assert_eq!(second.session_id, session_id);
        assert_eq!(second.context["echoed"], json!("two"));
        assert_eq!(orchestrator.sessions().len(), 1);
    }

    #[tokio::test]
    async fn test_sessions_isolated_between_requests() {
        let registry = Arc::new(echo_registry());
        let catalog = single_step_catalog(&registry);
        let orchestrator = Orchestrator::new(catalog, registry);

        let a = orchestrator
            .execute(WorkflowRequest::new("echo_flow").with_field("value", json!("a")))
            .await;
        let b = orchestrator
            .execute(WorkflowRequest::new("echo_flow").with_field("value", json!("b")))
            .await;

        assert_ne!(a.session_id, b.session_id);
        assert_eq!(a.context["echoed"], json!("a"));
        assert_eq!(b.context["echoed"], json!("b"));
    }
}
