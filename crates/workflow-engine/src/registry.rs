//! Handler registry for dynamic capability resolution
//!
//! This module provides the registry that maps handler kind strings to
//! live handler instances and metadata. It replaces hardcoded
//! match-statement dispatch with a lookup table built at startup.
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use workflow_engine::{HandlerRegistry, HandlerDescriptor};
//!
//! let mut registry = HandlerRegistry::with_builtins();
//! registry.register_shared(IntakeHandler::descriptor(), Arc::new(IntakeHandler::new()));
//! ```

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::descriptor::HandlerMetadata;
use crate::types::FieldMap;

/// Failure kinds raised by the engine itself
///
/// Handler crates publish their own kind constants next to the handlers
/// that raise them.
pub mod failure_kinds {
    /// Handler invocation exceeded the orchestrator's watchdog timeout
    pub const TIMEOUT: &str = "timeout";
    /// A required context field was absent at bind time (definition
    /// skipped validation)
    pub const MISSING_CONTEXT_FIELD: &str = "missing_context_field";
    /// The registry holds metadata for the kind but no live instance
    pub const HANDLER_UNAVAILABLE: &str = "handler_unavailable";
}

/// Structured failure returned by a handler
///
/// `kind` is the key failure rules resolve on; `message` is
/// human-readable detail.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct HandlerFailure {
    pub kind: String,
    pub message: String,
}

impl HandlerFailure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// Input payload for one handler invocation
///
/// `fields` holds the bound required context fields overlaid with the
/// binding's static params; `action` selects behavior within the
/// handler's task domain.
#[derive(Debug, Clone)]
pub struct HandlerInput {
    pub session_id: String,
    pub action: Option<String>,
    pub fields: FieldMap,
}

impl HandlerInput {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            action: None,
            fields: FieldMap::new(),
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn field(&self, key: &str) -> Option<&serde_json::Value> {
        self.fields.get(key)
    }

    /// Field as a string slice, if present and a string
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(|v| v.as_str())
    }
}

/// Output fields produced by a successful handler invocation
pub type HandlerOutput = FieldMap;

/// Result of one handler invocation: success payload or structured failure
pub type HandlerResult = std::result::Result<HandlerOutput, HandlerFailure>;

/// The capability contract every task-domain handler implements
///
/// Handlers are external collaborators: stateless aside from their own
/// embedded stores, never touching Session Context directly. They return
/// outputs which the orchestrator merges. Implementations must be safe to
/// re-invoke (the Retry policy assumes no unintended double side effects).
#[async_trait]
pub trait Handler: Send + Sync {
    /// Execute one invocation and terminate with a structured outcome
    async fn execute(&self, input: HandlerInput) -> HandlerResult;
}

/// Factory for creating or returning a shared Handler
pub trait HandlerFactory: Send + Sync {
    fn create_handler(&self) -> Arc<dyn Handler>;
}

/// A registration entry combining metadata with an optional handler factory
struct RegistryEntry {
    metadata: HandlerMetadata,
    factory: Option<Arc<dyn HandlerFactory>>,
}

/// Link-time handler descriptor registration
///
/// Handler crates submit their descriptor functions with
/// `inventory::submit!(workflow_engine::DescriptorFn(MyHandler::descriptor));`
/// and `HandlerRegistry::with_builtins()` collects them.
pub struct DescriptorFn(pub fn() -> HandlerMetadata);

inventory::collect!(DescriptorFn);

/// Registry of handler kinds with their metadata and live instances
///
/// The central lookup table mapping kind strings to:
/// 1. Metadata (actions, producible fields) from HandlerDescriptor
/// 2. Factories returning the handler instance to invoke
///
/// # Composability
///
/// Registries can be composed by merging:
/// ```ignore
/// let mut registry = HandlerRegistry::with_builtins();
/// registry.merge(plugin_registry);
/// ```
pub struct HandlerRegistry {
    entries: HashMap<String, RegistryEntry>,
}

impl HandlerRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Create a registry pre-populated with every descriptor submitted
    /// through `inventory` (metadata only; instances are registered by
    /// the embedding application)
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for descriptor in inventory::iter::<DescriptorFn> {
            registry.register_metadata((descriptor.0)());
        }
        registry
    }

    /// Register a handler kind with metadata and a factory
    pub fn register(&mut self, metadata: HandlerMetadata, factory: Arc<dyn HandlerFactory>) {
        self.entries.insert(
            metadata.kind.clone(),
            RegistryEntry {
                metadata,
                factory: Some(factory),
            },
        );
    }

    /// Register a handler kind backed by a shared instance
    ///
    /// The usual path for long-lived handlers that carry their own
    /// collaborator state.
    pub fn register_shared(&mut self, metadata: HandlerMetadata, handler: Arc<dyn Handler>) {
        self.register(metadata, Arc::new(SharedHandlerFactory { handler }));
    }

    /// Register a handler kind backed by an async callback
    ///
    /// The callback receives the invocation input and returns its result;
    /// handy for test doubles.
    pub fn register_callback<F, Fut>(&mut self, metadata: HandlerMetadata, callback: F)
    where
        F: Fn(HandlerInput) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = HandlerResult> + Send + 'static,
    {
        let handler = Arc::new(CallbackHandler {
            callback: Box::new(move |input| Box::pin(callback(input))),
        });
        self.register_shared(metadata, handler);
    }

    /// Register a handler kind with metadata only (no instance)
    ///
    /// Used for capability listing before the application wires live
    /// handlers in.
    pub fn register_metadata(&mut self, metadata: HandlerMetadata) {
        self.entries.insert(
            metadata.kind.clone(),
            RegistryEntry {
                metadata,
                factory: None,
            },
        );
    }

    /// Get metadata for a handler kind
    pub fn get_metadata(&self, kind: &str) -> Option<&HandlerMetadata> {
        self.entries.get(kind).map(|e| &e.metadata)
    }

    /// Get all registered metadata
    pub fn all_metadata(&self) -> Vec<&HandlerMetadata> {
        self.entries.values().map(|e| &e.metadata).collect()
    }

    /// Get the live handler for a kind
    pub fn get_handler(&self, kind: &str) -> Option<Arc<dyn Handler>> {
        self.entries
            .get(kind)
            .and_then(|e| e.factory.as_ref())
            .map(|f| f.create_handler())
    }

    /// Check if a handler kind is registered
    pub fn has_handler(&self, kind: &str) -> bool {
        self.entries.contains_key(kind)
    }

    /// List all registered kind strings
    pub fn handler_kinds(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }

    /// Merge another registry into this one
    ///
    /// Entries from `other` override entries in `self` if they share a kind.
    pub fn merge(&mut self, other: HandlerRegistry) {
        self.entries.extend(other.entries);
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Async callback-based Handler
///
/// Wraps an async closure as a Handler; the engine's own tests lean on
/// this for scripted outcomes.
pub struct CallbackHandler {
    callback: Box<
        dyn Fn(HandlerInput) -> Pin<Box<dyn std::future::Future<Output = HandlerResult> + Send>>
            + Send
            + Sync,
    >,
}

#[async_trait]
impl Handler for CallbackHandler {
    async fn execute(&self, input: HandlerInput) -> HandlerResult {
        (self.callback)(input).await
    }
}

/// Factory that returns a shared handler instance
struct SharedHandlerFactory {
    handler: Arc<dyn Handler>,
}

impl HandlerFactory for SharedHandlerFactory {
    fn create_handler(&self) -> Arc<dyn Handler> {
        self.handler.clone()
    }
}
