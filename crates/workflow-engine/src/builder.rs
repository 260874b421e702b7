//! Fluent builder for workflow definitions
//!
//! Provides a type-safe, fluent API for constructing definitions
//! programmatically; the usual alternative is loading serde JSON through
//! the catalog.

use crate::definition::{HandlerBinding, StepDefinition, WorkflowDefinition};

/// Fluent builder for constructing workflow definitions
///
/// # Example
///
/// ```ignore
/// let definition = WorkflowBuilder::new("verify_insurance", "Verify Insurance")
///     .input("patient_id")
///     .input("insurance_provider")
///     .sequential(
///         "verification",
///         HandlerBinding::new("verification")
///             .requires(["patient_id", "insurance_provider"])
///             .produces(["coverage_status"]),
///     )
///     .build();
/// ```
pub struct WorkflowBuilder {
    id: String,
    name: String,
    version: u32,
    inputs: Vec<String>,
    steps: Vec<StepDefinition>,
}

impl WorkflowBuilder {
    /// Create a new definition builder
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: 1,
            inputs: Vec::new(),
            steps: Vec::new(),
        }
    }

    /// Set the plan version
    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Declare one payload field the request is expected to provide
    pub fn input(mut self, field: impl Into<String>) -> Self {
        self.inputs.push(field.into());
        self
    }

    /// Append a sequential step with a single handler binding
    pub fn sequential(mut self, name: impl Into<String>, binding: HandlerBinding) -> Self {
        self.steps.push(StepDefinition::sequential(name, binding));
        self
    }

    /// Append a parallel group step
    pub fn parallel(mut self, name: impl Into<String>, bindings: Vec<HandlerBinding>) -> Self {
        self.steps.push(StepDefinition::parallel(name, bindings));
        self
    }

    /// Build the definition without validation
    ///
    /// Validation runs when the definition is registered with a catalog.
    pub fn build(self) -> WorkflowDefinition {
        WorkflowDefinition {
            id: self.id,
            name: self.name,
            version: self.version,
            inputs: self.inputs,
            steps: self.steps,
        }
    }
}
