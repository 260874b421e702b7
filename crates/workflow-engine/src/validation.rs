//! Workflow definition validation
//!
//! Checks plan shape and dataflow topology before a definition is
//! admitted to the catalog. A definition that passes can never hit a
//! missing required field at request time.

use std::collections::{HashMap, HashSet};

use crate::definition::{StepKind, WorkflowDefinition};
use crate::error::DefinitionError;
use crate::registry::HandlerRegistry;

/// Validate a workflow definition
///
/// Returns all defects found (not just the first). Pass a registry to
/// additionally check handler kinds, actions and producible fields.
pub fn validate_definition(
    definition: &WorkflowDefinition,
    registry: Option<&HandlerRegistry>,
) -> Vec<DefinitionError> {
    let mut errors = Vec::new();

    validate_shape(definition, &mut errors);
    validate_dataflow(definition, &mut errors);

    if let Some(reg) = registry {
        validate_against_registry(definition, reg, &mut errors);
    }

    errors
}

/// Step shape: non-empty plan, non-empty steps, sequential arity, unique
/// step names, no conflicting produces within a group
fn validate_shape(definition: &WorkflowDefinition, errors: &mut Vec<DefinitionError>) {
    if definition.steps.is_empty() {
        errors.push(DefinitionError::EmptyWorkflow {
            workflow: definition.id.clone(),
        });
    }

    let mut seen_names: HashSet<&str> = HashSet::new();
    for step in &definition.steps {
        if !seen_names.insert(step.name.as_str()) {
            errors.push(DefinitionError::DuplicateStepName {
                step: step.name.clone(),
            });
        }

        if step.bindings.is_empty() {
            errors.push(DefinitionError::EmptyStep {
                step: step.name.clone(),
            });
            continue;
        }

        if step.kind == StepKind::Sequential && step.bindings.len() != 1 {
            errors.push(DefinitionError::SequentialArity {
                step: step.name.clone(),
                count: step.bindings.len(),
            });
        }

        if step.kind == StepKind::Parallel {
            // Unordered siblings writing the same field would make the
            // final value nondeterministic under last-writer-wins.
            let mut produce_counts: HashMap<&str, usize> = HashMap::new();
            for binding in &step.bindings {
                for field in &binding.produces {
                    *produce_counts.entry(field.as_str()).or_default() += 1;
                }
            }
            for (field, count) in produce_counts {
                if count > 1 {
                    errors.push(DefinitionError::ConflictingProduces {
                        step: step.name.clone(),
                        field: field.to_string(),
                    });
                }
            }
        }
    }
}

/// Dataflow topology: every required field must come from the workflow
/// inputs or a strictly earlier step
///
/// Parallel siblings do not count as "earlier": no ordering exists among
/// members of one group, so a member cannot depend on a sibling's output.
fn validate_dataflow(definition: &WorkflowDefinition, errors: &mut Vec<DefinitionError>) {
    let mut available: HashSet<&str> = definition.inputs.iter().map(|f| f.as_str()).collect();

    for step in &definition.steps {
        for binding in &step.bindings {
            for field in &binding.requires {
                if !available.contains(field.as_str()) {
                    errors.push(DefinitionError::RequirementUnsatisfied {
                        step: step.name.clone(),
                        handler: binding.handler.clone(),
                        field: field.clone(),
                    });
                }
            }
        }
        // Outputs become visible only after the whole step completes.
        for binding in &step.bindings {
            available.extend(binding.produces.iter().map(|f| f.as_str()));
        }
    }
}

/// Registry checks: handler kinds exist, actions are supported, declared
/// produces are within the handler's capability
fn validate_against_registry(
    definition: &WorkflowDefinition,
    registry: &HandlerRegistry,
    errors: &mut Vec<DefinitionError>,
) {
    for step in &definition.steps {
        for binding in &step.bindings {
            let Some(metadata) = registry.get_metadata(&binding.handler) else {
                errors.push(DefinitionError::UnknownHandler {
                    step: step.name.clone(),
                    handler: binding.handler.clone(),
                });
                continue;
            };

            match binding.action.as_deref() {
                Some(action) if !metadata.supports_action(Some(action)) => {
                    errors.push(DefinitionError::UnknownAction {
                        step: step.name.clone(),
                        handler: binding.handler.clone(),
                        action: action.to_string(),
                    });
                }
                None if !metadata.actions.is_empty() => {
                    errors.push(DefinitionError::MissingAction {
                        step: step.name.clone(),
                        handler: binding.handler.clone(),
                    });
                }
                _ => {}
            }

            for field in &binding.produces {
                if !metadata.can_produce(field) {
                    errors.push(DefinitionError::UndeclaredProduce {
                        step: step.name.clone(),
                        handler: binding.handler.clone(),
                        field: field.clone(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::WorkflowBuilder;
    use crate::definition::HandlerBinding;
    use crate::descriptor::HandlerMetadata;

    fn valid_definition() -> WorkflowDefinition {
        WorkflowBuilder::new("new_patient_appointment", "New Patient")
            .input("patient")
            .input("preferred_date")
            .parallel(
                "registration",
                vec![
                    HandlerBinding::new("intake").requires(["patient"]).produces(["patient_id"]),
                    HandlerBinding::new("scheduling")
                        .with_action("book")
                        .requires(["preferred_date"])
                        .produces(["appointment_id"]),
                ],
            )
            .sequential(
                "verification",
                HandlerBinding::new("verification")
                    .requires(["patient_id"])
                    .produces(["coverage_status"]),
            )
            .build()
    }

    fn test_registry() -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry.register_metadata(
            HandlerMetadata::new("intake", "Intake", "Registration").with_produces(["patient_id"]),
        );
        registry.register_metadata(
            HandlerMetadata::new("scheduling", "Scheduling", "Appointments")
                .with_actions(["book", "reschedule", "cancel"])
                .with_produces(["appointment_id"]),
        );
        registry.register_metadata(
            HandlerMetadata::new("verification", "Verification", "Insurance")
                .with_produces(["coverage_status"]),
        );
        registry
    }

    #[test]
    fn test_valid_definition_passes() {
        let errors = validate_definition(&valid_definition(), Some(&test_registry()));
        assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
    }

    #[test]
    fn test_empty_workflow_rejected() {
        let definition = WorkflowBuilder::new("empty", "Empty").build();
        let errors = validate_definition(&definition, None);
        assert!(matches!(errors[0], DefinitionError::EmptyWorkflow { .. }));
    }

    #[test]
    fn test_unsatisfied_requirement_rejected() {
        let definition = WorkflowBuilder::new("broken", "Broken")
            .sequential(
                "verification",
                HandlerBinding::new("verification").requires(["patient_id"]),
            )
            .build();

        let errors = validate_definition(&definition, None);
        assert!(errors.iter().any(|e| matches!(
            e,
            DefinitionError::RequirementUnsatisfied { field, .. } if field == "patient_id"
        )));
    }

    #[test]
    fn test_sibling_output_not_visible_within_group() {
        // scheduling depends on intake's output, but both sit in one
        // parallel group with no ordering between them.
        let definition = WorkflowBuilder::new("broken", "Broken")
            .input("patient")
            .parallel(
                "registration",
                vec![
                    HandlerBinding::new("intake").requires(["patient"]).produces(["patient_id"]),
                    HandlerBinding::new("scheduling")
                        .with_action("book")
                        .requires(["patient_id"]),
                ],
            )
            .build();

        let errors = validate_definition(&definition, None);
        assert!(errors.iter().any(|e| matches!(
            e,
            DefinitionError::RequirementUnsatisfied { handler, field, .. }
                if handler == "scheduling" && field == "patient_id"
        )));
    }

    #[test]
    fn test_later_step_sees_group_outputs() {
        let errors = validate_definition(&valid_definition(), None);
        assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
    }

    #[test]
    fn test_sequential_arity_rejected() {
        let mut definition = valid_definition();
        definition.steps[1].bindings.push(HandlerBinding::new("intake"));

        let errors = validate_definition(&definition, None);
        assert!(errors
            .iter()
            .any(|e| matches!(e, DefinitionError::SequentialArity { count: 2, .. })));
    }

    #[test]
    fn test_duplicate_step_name_rejected() {
        let definition = WorkflowBuilder::new("dup", "Dup")
            .sequential("a", HandlerBinding::new("intake"))
            .sequential("a", HandlerBinding::new("intake"))
            .build();

        let errors = validate_definition(&definition, None);
        assert!(errors
            .iter()
            .any(|e| matches!(e, DefinitionError::DuplicateStepName { .. })));
    }

    #[test]
    fn test_conflicting_group_produces_rejected() {
        let definition = WorkflowBuilder::new("conflict", "Conflict")
            .parallel(
                "group",
                vec![
                    HandlerBinding::new("intake").produces(["patient_id"]),
                    HandlerBinding::new("verification").produces(["patient_id"]),
                ],
            )
            .build();

        let errors = validate_definition(&definition, None);
        assert!(errors.iter().any(|e| matches!(
            e,
            DefinitionError::ConflictingProduces { field, .. } if field == "patient_id"
        )));
    }

    #[test]
    fn test_unknown_handler_rejected() {
        let definition = WorkflowBuilder::new("ghost", "Ghost")
            .sequential("step", HandlerBinding::new("billing"))
            .build();

        let errors = validate_definition(&definition, Some(&test_registry()));
        assert!(errors.iter().any(|e| matches!(
            e,
            DefinitionError::UnknownHandler { handler, .. } if handler == "billing"
        )));
    }

    #[test]
    fn test_unknown_action_rejected() {
        let definition = WorkflowBuilder::new("bad-action", "Bad Action")
            .sequential(
                "step",
                HandlerBinding::new("scheduling").with_action("erase"),
            )
            .build();

        let errors = validate_definition(&definition, Some(&test_registry()));
        assert!(errors
            .iter()
            .any(|e| matches!(e, DefinitionError::UnknownAction { action, .. } if action == "erase")));
    }

    #[test]
    fn test_missing_action_rejected() {
        let definition = WorkflowBuilder::new("no-action", "No Action")
            .sequential("step", HandlerBinding::new("scheduling"))
            .build();

        let errors = validate_definition(&definition, Some(&test_registry()));
        assert!(errors
            .iter()
            .any(|e| matches!(e, DefinitionError::MissingAction { .. })));
    }

    #[test]
    fn test_undeclared_produce_rejected() {
        let definition = WorkflowBuilder::new("over-produce", "Over Produce")
            .sequential(
                "step",
                HandlerBinding::new("intake").produces(["patient_id", "invoice_total"]),
            )
            .build();

        let errors = validate_definition(&definition, Some(&test_registry()));
        assert!(errors.iter().any(|e| matches!(
            e,
            DefinitionError::UndeclaredProduce { field, .. } if field == "invoice_total"
        )));
    }

    #[test]
    fn test_errors_accumulate() {
        // Step name duplication + unknown handler + bad dataflow in one
        // pass.
        let definition = WorkflowBuilder::new("multi", "Multi")
            .sequential("a", HandlerBinding::new("billing").requires(["nothing"]))
            .sequential("a", HandlerBinding::new("intake"))
            .build();

        let errors = validate_definition(&definition, Some(&test_registry()));
        assert!(errors.len() >= 3);
    }
}
