//! Triage Service
//!
//! The assembled front-office system: the four built-in care handlers
//! wired into a handler registry, the default workflow catalog and
//! failure policies, and one orchestrator behind a small façade.
//! Callers submit a `WorkflowRequest` and get an `AggregatedResponse`;
//! everything between is the engine's job.
//!
//! # Example
//!
//! ```ignore
//! use serde_json::json;
//! use triage_service::{TriageService, WorkflowRequest};
//!
//! let service = TriageService::new()?;
//! let response = service
//!     .submit(
//!         WorkflowRequest::new("verify_insurance")
//!             .with_field("patient_id", json!("PAT_12345678"))
//!             .with_field("insurance_provider", json!("Aetna"))
//!             .with_field("insurance_id", json!("AET900100")),
//!     )
//!     .await;
//! assert!(response.is_success());
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use workflow_engine::{HandlerDescriptor, HandlerRegistry, Orchestrator, WorkflowCatalog};

pub mod policies;
pub mod workflows;

pub use policies::default_policies;
pub use workflows::{builtin_workflows, default_catalog};

// Re-export the handler types and the engine surface embedders touch,
// so depending on this crate alone is enough.
pub use care_handlers::{FollowupHandler, IntakeHandler, SchedulingHandler, VerificationHandler};
pub use workflow_engine::{
    AggregatedResponse, AuditAction, AuditRecord, AuditSink, EngineError, FailureRule, FieldMap,
    HandlerBinding, HandlerMetadata, MemoryAuditSink, PolicyTable, Result, RetryPolicy,
    SessionStore, StepOutcome, StepResult, WorkflowBuilder, WorkflowDefinition, WorkflowRequest,
    WorkflowStatus,
};

/// The four live task-domain handlers the service wires into its
/// registry
///
/// The set stays reachable after assembly so tests and the embedding
/// application can get at the handlers' stores (filed patients, booked
/// appointments, queued reminders) and failure injection hooks.
pub struct HandlerSet {
    pub intake: Arc<IntakeHandler>,
    pub scheduling: Arc<SchedulingHandler>,
    pub verification: Arc<VerificationHandler>,
    pub followup: Arc<FollowupHandler>,
}

impl Default for HandlerSet {
    fn default() -> Self {
        Self {
            intake: Arc::new(IntakeHandler::new()),
            scheduling: Arc::new(SchedulingHandler::new()),
            verification: Arc::new(VerificationHandler::new()),
            followup: Arc::new(FollowupHandler::new()),
        }
    }
}

impl HandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in a differently constructed verification handler, e.g. one
    /// simulating a payer outage
    pub fn with_verification(mut self, handler: VerificationHandler) -> Self {
        self.verification = Arc::new(handler);
        self
    }

    /// Register all four instances against their descriptors
    fn register_into(&self, registry: &mut HandlerRegistry) {
        registry.register_shared(IntakeHandler::descriptor(), self.intake.clone());
        registry.register_shared(SchedulingHandler::descriptor(), self.scheduling.clone());
        registry.register_shared(VerificationHandler::descriptor(), self.verification.clone());
        registry.register_shared(FollowupHandler::descriptor(), self.followup.clone());
    }
}

/// Fluent assembly of a [`TriageService`]
///
/// Defaults: fresh handlers, the five built-in workflows, the default
/// policy table, a fresh session store and no audit sink.
pub struct TriageServiceBuilder {
    handlers: HandlerSet,
    policies: PolicyTable,
    audit: Option<Arc<dyn AuditSink>>,
    sessions: Option<Arc<SessionStore>>,
    step_timeout: Option<Duration>,
    extra_workflows: Vec<WorkflowDefinition>,
    workflows_dir: Option<PathBuf>,
}

impl Default for TriageServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TriageServiceBuilder {
    pub fn new() -> Self {
        Self {
            handlers: HandlerSet::default(),
            policies: default_policies(),
            audit: None,
            sessions: None,
            step_timeout: None,
            extra_workflows: Vec::new(),
            workflows_dir: None,
        }
    }

    /// Use a prepared handler set instead of the defaults
    pub fn handlers(mut self, handlers: HandlerSet) -> Self {
        self.handlers = handlers;
        self
    }

    /// Replace the default policy table
    pub fn policies(mut self, policies: PolicyTable) -> Self {
        self.policies = policies;
        self
    }

    /// Attach an audit sink for the orchestrator's record stream
    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Share a session store with another service instance
    pub fn sessions(mut self, sessions: Arc<SessionStore>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Override the per-invocation watchdog timeout
    pub fn step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = Some(timeout);
        self
    }

    /// Register an additional workflow beside the built-ins
    pub fn workflow(mut self, definition: WorkflowDefinition) -> Self {
        self.extra_workflows.push(definition);
        self
    }

    /// Also load definition JSON files from a directory at build time
    pub fn workflows_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.workflows_dir = Some(path.into());
        self
    }

    /// Assemble the service
    ///
    /// Fails if any workflow definition (built-in, extra or loaded from
    /// the directory) does not validate against the handler registry.
    pub fn build(self) -> Result<TriageService> {
        let mut registry = HandlerRegistry::with_builtins();
        self.handlers.register_into(&mut registry);

        let mut catalog = workflows::default_catalog(&registry)?;
        for definition in self.extra_workflows {
            catalog.register(definition, Some(&registry))?;
        }
        if let Some(dir) = &self.workflows_dir {
            let loaded = catalog.load_from_dir(dir, Some(&registry))?;
            log::info!("Loaded {} workflow definition(s) from {:?}", loaded, dir);
        }

        let registry = Arc::new(registry);
        let catalog = Arc::new(catalog);
        let sessions = self
            .sessions
            .unwrap_or_else(|| Arc::new(SessionStore::new()));

        let mut orchestrator = Orchestrator::new(catalog.clone(), registry.clone())
            .with_sessions(sessions)
            .with_policies(self.policies);
        if let Some(sink) = self.audit {
            orchestrator = orchestrator.with_audit_sink(sink);
        }
        if let Some(timeout) = self.step_timeout {
            orchestrator = orchestrator.with_step_timeout(timeout);
        }

        log::info!(
            "Triage service ready: {} workflows over {} handler kinds",
            catalog.len(),
            registry.handler_kinds().len()
        );

        Ok(TriageService {
            handlers: self.handlers,
            registry,
            catalog,
            orchestrator,
        })
    }
}

/// The assembled triage system behind one façade
pub struct TriageService {
    handlers: HandlerSet,
    registry: Arc<HandlerRegistry>,
    catalog: Arc<WorkflowCatalog>,
    orchestrator: Orchestrator,
}

impl std::fmt::Debug for TriageService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriageService")
            .field("workflows", &self.catalog.len())
            .field("handler_kinds", &self.registry.handler_kinds().len())
            .finish_non_exhaustive()
    }
}

impl TriageService {
    /// Assemble the service with defaults everywhere
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    pub fn builder() -> TriageServiceBuilder {
        TriageServiceBuilder::new()
    }

    /// Execute one request to completion
    pub async fn submit(&self, request: WorkflowRequest) -> AggregatedResponse {
        self.orchestrator.execute(request).await
    }

    /// The live handler instances behind the registry
    pub fn handlers(&self) -> &HandlerSet {
        &self.handlers
    }

    /// The session store backing the orchestrator
    pub fn sessions(&self) -> &Arc<SessionStore> {
        self.orchestrator.sessions()
    }

    /// Request types the classifier accepts, sorted
    pub fn supported_request_types(&self) -> Vec<&str> {
        self.catalog.supported_types()
    }

    /// Capability metadata for every registered handler kind
    pub fn handler_catalog(&self) -> Vec<&HandlerMetadata> {
        self.registry.all_metadata()
    }
}
