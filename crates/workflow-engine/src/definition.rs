//! Workflow definition types
//!
//! A definition is the fixed, versioned plan for one classified request
//! type: an ordered sequence of steps, each a single handler binding or a
//! parallel group of bindings. Definitions are plain serde data and may be
//! built in code (see `builder`) or loaded from JSON by the catalog.

use serde::{Deserialize, Serialize};

use crate::types::FieldMap;

/// Whether a step runs one handler or fans out to a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Exactly one handler binding, awaited before the next step
    Sequential,
    /// Several bindings run concurrently; all must reach a terminal
    /// outcome before the next step
    Parallel,
}

/// One handler invocation within a step
///
/// `requires` are the context fields bound into the input payload;
/// `produces` are the output fields merged back into context on success.
/// `params` are static values overlaid on the input at invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerBinding {
    /// Handler kind to invoke
    pub handler: String,
    /// Action dispatched within the handler, if it has several
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub produces: Vec<String>,
    #[serde(default, skip_serializing_if = "FieldMap::is_empty")]
    pub params: FieldMap,
}

impl HandlerBinding {
    pub fn new(handler: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            action: None,
            requires: Vec::new(),
            produces: Vec::new(),
            params: FieldMap::new(),
        }
    }

    /// Select a named action within the handler
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Declare the context fields bound into the input
    pub fn requires<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requires = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Declare the output fields merged into context on success
    pub fn produces<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.produces = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Add one static parameter overlaid on the invocation input
    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

/// One unit of execution within a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Step name, unique within the workflow
    pub name: String,
    pub kind: StepKind,
    pub bindings: Vec<HandlerBinding>,
}

impl StepDefinition {
    /// A step invoking a single handler
    pub fn sequential(name: impl Into<String>, binding: HandlerBinding) -> Self {
        Self {
            name: name.into(),
            kind: StepKind::Sequential,
            bindings: vec![binding],
        }
    }

    /// A step fanning out to a group of handlers
    pub fn parallel(name: impl Into<String>, bindings: Vec<HandlerBinding>) -> Self {
        Self {
            name: name.into(),
            kind: StepKind::Parallel,
            bindings,
        }
    }

    /// Union of the fields this step's bindings require
    pub fn required_fields(&self) -> Vec<&str> {
        self.bindings
            .iter()
            .flat_map(|b| b.requires.iter().map(|f| f.as_str()))
            .collect()
    }

    /// Union of the fields this step's bindings produce
    pub fn produced_fields(&self) -> Vec<&str> {
        self.bindings
            .iter()
            .flat_map(|b| b.produces.iter().map(|f| f.as_str()))
            .collect()
    }
}

/// The static ordered plan for one classified request type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow identifier; doubles as the classifier's request type key
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Plan version, bumped when the step sequence changes
    #[serde(default = "default_version")]
    pub version: u32,
    /// Payload fields the request is expected to provide
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<String>,
    pub steps: Vec<StepDefinition>,
}

fn default_version() -> u32 {
    1
}

impl WorkflowDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: 1,
            inputs: Vec::new(),
            steps: Vec::new(),
        }
    }

    /// Find a step by name
    pub fn find_step(&self, name: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Total handler bindings across all steps (the number of step
    /// outcomes a run of this workflow yields)
    pub fn binding_count(&self) -> usize {
        self.steps.iter().map(|s| s.bindings.len()).sum()
    }
}
