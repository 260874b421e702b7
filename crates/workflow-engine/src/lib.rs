//! Workflow Engine - Session-aware orchestration over task handlers
//!
//! This crate provides the coordination core for multi-step
//! administrative workflows. It classifies each inbound request to a
//! static workflow definition, walks the definition's steps in declared
//! order, and folds handler outcomes back into one aggregated response.
//! It supports:
//!
//! - Static request classification over a validated workflow catalog
//! - Session context with last-writer-wins merges and per-session locking
//! - Sequential steps and all-must-complete parallel groups
//! - Policy-driven failure handling (halt, continue with fallback, retry
//!   with exponential backoff)
//! - An audit stream covering every routing decision and handler outcome
//!
//! # Architecture
//!
//! The engine stays domain-agnostic: handlers are registered capability
//! units behind the `Handler` trait, and the definitions wiring them
//! together are plain data.
//!
//! - `WorkflowCatalog`: request type to definition mapping; validates at
//!   registration, never at request time
//! - `SessionStore`: per-session context arena; handlers never write it,
//!   the orchestrator merges completed outputs on their behalf
//! - `HandlerRegistry`: handler kind to metadata and live instance,
//!   populated through link-time descriptor submission (`inventory`)
//! - `Orchestrator`: the coordinating flow for one request
//! - `PolicyTable`: failure kind to halt/continue/retry resolution
//! - `AuditSink`: generic record streaming (not tied to any collector)
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use workflow_engine::{
//!     HandlerBinding, HandlerRegistry, Orchestrator, WorkflowBuilder,
//!     WorkflowCatalog, WorkflowRequest,
//! };
//!
//! let mut registry = HandlerRegistry::with_builtins();
//! // register live handler instances here
//! let registry = Arc::new(registry);
//!
//! let mut catalog = WorkflowCatalog::new();
//! catalog.register(
//!     WorkflowBuilder::new("verify_insurance", "Verify Insurance")
//!         .input("insurance_provider")
//!         .sequential(
//!             "verification",
//!             HandlerBinding::new("verification")
//!                 .requires(["insurance_provider"])
//!                 .produces(["coverage_status"]),
//!         )
//!         .build(),
//!     Some(&registry),
//! )?;
//!
//! let orchestrator = Orchestrator::new(Arc::new(catalog), registry);
//! let response = orchestrator
//!     .execute(WorkflowRequest::new("verify_insurance"))
//!     .await;
//! ```

pub mod audit;
pub mod builder;
pub mod catalog;
pub mod definition;
pub mod descriptor;
pub mod error;
pub mod orchestrator;
pub mod policy;
pub mod registry;
pub mod session;
pub mod types;
pub mod validation;

// Re-export key types
pub use audit::{AuditAction, AuditRecord, AuditSink, MemoryAuditSink, NullAuditSink};
pub use builder::WorkflowBuilder;
pub use catalog::WorkflowCatalog;
pub use definition::{HandlerBinding, StepDefinition, StepKind, WorkflowDefinition};
pub use descriptor::{HandlerDescriptor, HandlerMetadata};
pub use error::{DefinitionError, EngineError, Result};
pub use orchestrator::Orchestrator;
pub use policy::{FailureDisposition, FailureRule, PolicyTable, RetryPolicy};
pub use registry::{
    failure_kinds, DescriptorFn, Handler, HandlerFactory, HandlerFailure, HandlerInput,
    HandlerOutput, HandlerRegistry, HandlerResult,
};
pub use session::{SessionContext, SessionStore};
pub use types::{
    tag_id, AggregatedResponse, FieldMap, ResponseError, StepOutcome, StepResult, WorkflowRequest,
    WorkflowStatus,
};
pub use validation::validate_definition;
