//! Handler descriptor trait and metadata types
//!
//! This module provides the `HandlerDescriptor` trait that allows handler
//! implementations to self-describe their capabilities (kind, supported
//! actions, producible output fields).
//!
//! This creates a single source of truth: the handler implementation
//! defines both its behavior AND the metadata the catalog validates
//! workflow definitions against.

use serde::{Deserialize, Serialize};

/// Trait for handlers that can describe their capabilities
///
/// Implementing this trait allows a handler kind to publish its metadata
/// for registry listing and definition validation without a separate
/// registration table.
///
/// # Example
///
/// ```ignore
/// use workflow_engine::{HandlerDescriptor, HandlerMetadata};
///
/// impl HandlerDescriptor for IntakeHandler {
///     fn descriptor() -> HandlerMetadata {
///         HandlerMetadata::new("intake", "Patient Intake", "Validates registration forms")
///             .with_produces(["patient_id", "patient_name"])
///     }
/// }
/// ```
pub trait HandlerDescriptor {
    /// Get the static metadata for this handler kind
    fn descriptor() -> HandlerMetadata
    where
        Self: Sized;
}

/// Capability metadata for one handler kind
///
/// `actions` is empty for single-behavior handlers; `produces` lists every
/// output field the handler can emit across its actions, which definition
/// validation checks declared `produces` against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerMetadata {
    /// Unique kind identifier (e.g., "scheduling")
    pub kind: String,
    /// Human-readable label
    pub label: String,
    /// Description of the task domain the handler covers
    pub description: String,
    /// Named actions the handler dispatches on; empty for single-behavior
    pub actions: Vec<String>,
    /// Output fields the handler can produce
    pub produces: Vec<String>,
}

impl HandlerMetadata {
    pub fn new(
        kind: impl Into<String>,
        label: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            label: label.into(),
            description: description.into(),
            actions: Vec::new(),
            produces: Vec::new(),
        }
    }

    /// Declare the handler's named actions
    pub fn with_actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actions = actions.into_iter().map(Into::into).collect();
        self
    }

    /// Declare the output fields the handler can produce
    pub fn with_produces<I, S>(mut self, produces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.produces = produces.into_iter().map(Into::into).collect();
        self
    }

    /// Whether a binding's action selection is valid for this handler
    ///
    /// Single-behavior handlers take no action; handlers with actions
    /// require one of their declared names.
    pub fn supports_action(&self, action: Option<&str>) -> bool {
        match action {
            None => self.actions.is_empty(),
            Some(name) => self.actions.iter().any(|a| a == name),
        }
    }

    /// Whether the handler can emit the named output field
    pub fn can_produce(&self, field: &str) -> bool {
        self.produces.iter().any(|f| f == field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduling_metadata() -> HandlerMetadata {
        HandlerMetadata::new("scheduling", "Scheduling", "Books and maintains appointments")
            .with_actions(["book", "reschedule", "cancel"])
            .with_produces(["appointment_id", "appointment_datetime"])
    }

    #[test]
    fn test_supports_action_named() {
        let metadata = scheduling_metadata();
        assert!(metadata.supports_action(Some("book")));
        assert!(!metadata.supports_action(Some("erase")));
        assert!(!metadata.supports_action(None));
    }

    #[test]
    fn test_supports_action_single_behavior() {
        let metadata = HandlerMetadata::new("intake", "Intake", "Registration forms");
        assert!(metadata.supports_action(None));
        assert!(!metadata.supports_action(Some("book")));
    }

    #[test]
    fn test_can_produce() {
        let metadata = scheduling_metadata();
        assert!(metadata.can_produce("appointment_id"));
        assert!(!metadata.can_produce("patient_id"));
    }
}
