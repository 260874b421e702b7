//! Error types for the workflow engine

use thiserror::Error;

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur in the workflow engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Request carried an empty request type
    #[error("Empty request type")]
    EmptyRequestType,

    /// No workflow is registered for the request type
    #[error("Unknown workflow for request type '{0}'")]
    UnknownWorkflow(String),

    /// A workflow definition failed validation at registration
    #[error("Workflow definition '{workflow}' is invalid ({} error(s))", .errors.len())]
    InvalidDefinition {
        workflow: String,
        errors: Vec<DefinitionError>,
    },

    /// A workflow id was registered twice
    #[error("Workflow '{0}' is already registered")]
    DuplicateWorkflow(String),

    /// No handler instance is registered for a kind
    #[error("No handler registered for kind '{0}'")]
    HandlerUnavailable(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Create an invalid-definition error from accumulated validation findings
    pub fn invalid_definition(workflow: impl Into<String>, errors: Vec<DefinitionError>) -> Self {
        Self::InvalidDefinition {
            workflow: workflow.into(),
            errors,
        }
    }
}

/// A single defect found while validating a workflow definition
///
/// Validation accumulates every defect it finds; registration is rejected
/// if the list is non-empty. These never surface at request time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    /// Workflow has no steps
    #[error("Workflow '{workflow}' declares no steps")]
    EmptyWorkflow { workflow: String },

    /// Step has no handler bindings
    #[error("Step '{step}' declares no handler bindings")]
    EmptyStep { step: String },

    /// Sequential step must carry exactly one binding
    #[error("Sequential step '{step}' declares {count} bindings, expected exactly 1")]
    SequentialArity { step: String, count: usize },

    /// Two steps share a name
    #[error("Duplicate step name '{step}'")]
    DuplicateStepName { step: String },

    /// A required field is never produced by any earlier step or workflow input
    #[error("Step '{step}' handler '{handler}' requires '{field}' which no earlier step produces")]
    RequirementUnsatisfied {
        step: String,
        handler: String,
        field: String,
    },

    /// Two members of one parallel group produce the same field
    #[error("Parallel step '{step}' has multiple bindings producing '{field}'")]
    ConflictingProduces { step: String, field: String },

    /// Binding references a handler kind the registry does not know
    #[error("Step '{step}' references unknown handler kind '{handler}'")]
    UnknownHandler { step: String, handler: String },

    /// Binding names an action the handler does not support
    #[error("Step '{step}' handler '{handler}' does not support action '{action}'")]
    UnknownAction {
        step: String,
        handler: String,
        action: String,
    },

    /// Handler dispatches on actions but the binding names none
    #[error("Step '{step}' handler '{handler}' requires an action")]
    MissingAction { step: String, handler: String },

    /// Binding claims an output the handler never produces
    #[error("Step '{step}' handler '{handler}' cannot produce declared field '{field}'")]
    UndeclaredProduce {
        step: String,
        handler: String,
        field: String,
    },
}
