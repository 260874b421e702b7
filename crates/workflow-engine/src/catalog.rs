//! Workflow catalog: the request classifier's lookup table
//!
//! The catalog owns every admitted workflow definition, keyed by request
//! type. Registration is the definition-load boundary: validation runs
//! here and invalid definitions never become classifiable. Classification
//! itself is a static lookup, no fuzzy matching, no side effects.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::definition::WorkflowDefinition;
use crate::error::{EngineError, Result};
use crate::registry::HandlerRegistry;
use crate::validation::validate_definition;

/// Registry of validated workflow definitions, keyed by request type
///
/// # Example
///
/// ```ignore
/// use workflow_engine::WorkflowCatalog;
///
/// let mut catalog = WorkflowCatalog::new();
/// catalog.register(definition, Some(&registry))?;
/// let workflow = catalog.classify("new_patient_appointment")?;
/// ```
#[derive(Default)]
pub struct WorkflowCatalog {
    definitions: HashMap<String, Arc<WorkflowDefinition>>,
}

impl WorkflowCatalog {
    /// Create a new empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and admit a workflow definition
    ///
    /// Pass a registry to also check handler kinds, actions and
    /// producible fields. Rejects duplicates and any definition with
    /// validation defects; a rejected definition is never classifiable.
    pub fn register(
        &mut self,
        definition: WorkflowDefinition,
        registry: Option<&HandlerRegistry>,
    ) -> Result<()> {
        if self.definitions.contains_key(&definition.id) {
            return Err(EngineError::DuplicateWorkflow(definition.id));
        }

        let errors = validate_definition(&definition, registry);
        if !errors.is_empty() {
            log::warn!(
                "Rejecting workflow definition '{}': {} validation error(s)",
                definition.id,
                errors.len()
            );
            return Err(EngineError::invalid_definition(definition.id, errors));
        }

        log::info!(
            "Registered workflow '{}' v{} ({} steps, {} bindings)",
            definition.id,
            definition.version,
            definition.steps.len(),
            definition.binding_count()
        );
        self.definitions
            .insert(definition.id.clone(), Arc::new(definition));
        Ok(())
    }

    /// Load definition JSON files from a directory
    ///
    /// Every `.json` file must parse and validate; the first defective
    /// file fails the load. Returns the number of definitions admitted.
    pub fn load_from_dir(
        &mut self,
        path: impl AsRef<Path>,
        registry: Option<&HandlerRegistry>,
    ) -> Result<usize> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(0);
        }

        let mut count = 0;
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let file_path = entry.path();

            if file_path.extension().is_some_and(|e| e == "json") {
                let content = std::fs::read_to_string(&file_path)?;
                let definition: WorkflowDefinition = serde_json::from_str(&content)?;
                log::info!("Loaded workflow '{}' from {:?}", definition.id, file_path);
                self.register(definition, registry)?;
                count += 1;
            }
        }
        Ok(count)
    }

    /// Resolve a request type to its workflow definition
    ///
    /// Empty or unknown request types are fatal for the request; no
    /// partial execution is attempted.
    pub fn classify(&self, request_type: &str) -> Result<Arc<WorkflowDefinition>> {
        if request_type.is_empty() {
            return Err(EngineError::EmptyRequestType);
        }
        self.definitions
            .get(request_type)
            .cloned()
            .ok_or_else(|| EngineError::UnknownWorkflow(request_type.to_string()))
    }

    /// Get a definition without classifying (inspection/listing)
    pub fn get(&self, id: &str) -> Option<&WorkflowDefinition> {
        self.definitions.get(id).map(|d| d.as_ref())
    }

    /// Check if a request type is classifiable
    pub fn contains(&self, request_type: &str) -> bool {
        self.definitions.contains_key(request_type)
    }

    /// All classifiable request types, sorted
    pub fn supported_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.definitions.keys().map(|s| s.as_str()).collect();
        types.sort_unstable();
        types
    }

    /// Number of admitted definitions
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::WorkflowBuilder;
    use crate::definition::HandlerBinding;
    use crate::error::DefinitionError;
    use tempfile::TempDir;

    fn reminder_definition(id: &str) -> WorkflowDefinition {
        WorkflowBuilder::new(id, "Reminders")
            .input("appointment_id")
            .sequential(
                "reminders",
                HandlerBinding::new("followup")
                    .with_action("schedule_reminders")
                    .requires(["appointment_id"])
                    .produces(["reminder_ids"]),
            )
            .build()
    }

    #[test]
    fn test_register_and_classify() {
        let mut catalog = WorkflowCatalog::new();
        catalog.register(reminder_definition("send_reminder"), None).unwrap();

        let workflow = catalog.classify("send_reminder").unwrap();
        assert_eq!(workflow.id, "send_reminder");
        assert!(catalog.contains("send_reminder"));
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_classify_unknown_type() {
        let catalog = WorkflowCatalog::new();
        let err = catalog.classify("teleportation").unwrap_err();
        assert!(matches!(err, EngineError::UnknownWorkflow(t) if t == "teleportation"));
    }

    #[test]
    fn test_classify_empty_type() {
        let catalog = WorkflowCatalog::new();
        assert!(matches!(
            catalog.classify("").unwrap_err(),
            EngineError::EmptyRequestType
        ));
    }

    #[test]
    fn test_invalid_definition_rejected() {
        let broken = WorkflowBuilder::new("broken", "Broken")
            .sequential(
                "verification",
                HandlerBinding::new("verification").requires(["patient_id"]),
            )
            .build();

        let mut catalog = WorkflowCatalog::new();
        let err = catalog.register(broken, None).unwrap_err();
        match err {
            EngineError::InvalidDefinition { workflow, errors } => {
                assert_eq!(workflow, "broken");
                assert!(matches!(
                    errors[0],
                    DefinitionError::RequirementUnsatisfied { .. }
                ));
            }
            other => panic!("expected InvalidDefinition, got {other:?}"),
        }
        assert!(!catalog.contains("broken"));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut catalog = WorkflowCatalog::new();
        catalog.register(reminder_definition("send_reminder"), None).unwrap();

        let err = catalog
            .register(reminder_definition("send_reminder"), None)
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateWorkflow(_)));
    }

    #[test]
    fn test_supported_types_sorted() {
        let mut catalog = WorkflowCatalog::new();
        catalog.register(reminder_definition("send_reminder"), None).unwrap();
        catalog.register(reminder_definition("cancel_visit"), None).unwrap();

        assert_eq!(catalog.supported_types(), vec!["cancel_visit", "send_reminder"]);
    }

    #[test]
    fn test_load_from_dir() {
        let temp_dir = TempDir::new().unwrap();
        let definition = reminder_definition("send_reminder");
        let content = serde_json::to_string_pretty(&definition).unwrap();
        std::fs::write(temp_dir.path().join("send_reminder.json"), content).unwrap();
        std::fs::write(temp_dir.path().join("notes.txt"), "not a definition").unwrap();

        let mut catalog = WorkflowCatalog::new();
        let count = catalog.load_from_dir(temp_dir.path(), None).unwrap();
        assert_eq!(count, 1);
        assert!(catalog.contains("send_reminder"));
    }

    #[test]
    fn test_load_from_dir_rejects_invalid() {
        let temp_dir = TempDir::new().unwrap();
        let broken = WorkflowBuilder::new("broken", "Broken")
            .sequential("step", HandlerBinding::new("x").requires(["missing"]))
            .build();
        let content = serde_json::to_string_pretty(&broken).unwrap();
        std::fs::write(temp_dir.path().join("broken.json"), content).unwrap();

        let mut catalog = WorkflowCatalog::new();
        assert!(catalog.load_from_dir(temp_dir.path(), None).is_err());
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_load_from_missing_dir() {
        let mut catalog = WorkflowCatalog::new();
        let count = catalog.load_from_dir("/nonexistent/workflows", None).unwrap();
        assert_eq!(count, 0);
    }
}
