//! Built-in workflow definitions
//!
//! The five front-office workflows the service registers at assembly,
//! one per supported request type. Definition ids double as the
//! classifier's request types. Field names here line up with the
//! handler output fields; the catalog validates that against the
//! handler descriptors at registration.

use workflow_engine::{
    HandlerBinding, HandlerRegistry, Result, WorkflowBuilder, WorkflowCatalog, WorkflowDefinition,
};

/// `new_patient_appointment`: intake and booking run as a parallel
/// group, then coverage verification, then the reminder pair
///
/// The four bindings yield four step outcomes across three steps.
pub fn new_patient_appointment() -> WorkflowDefinition {
    WorkflowBuilder::new("new_patient_appointment", "New Patient Appointment")
        .input("patient")
        .input("preferred_date")
        .parallel(
            "registration",
            vec![
                HandlerBinding::new("intake").requires(["patient"]).produces([
                    "patient_id",
                    "patient_name",
                    "patient_email",
                    "insurance_provider",
                    "insurance_id",
                    "critical_flags",
                    "requires_attention",
                ]),
                HandlerBinding::new("scheduling")
                    .with_action("book")
                    .requires(["preferred_date"])
                    .produces([
                        "appointment_id",
                        "appointment_datetime",
                        "provider_name",
                        "location",
                        "confirmation_token",
                        "appointment_status",
                    ]),
            ],
        )
        .sequential(
            "verification",
            HandlerBinding::new("verification")
                .requires(["patient_id", "insurance_provider", "insurance_id"])
                .produces(["coverage_status", "insurance_provider", "estimated_visit_cost"]),
        )
        .sequential(
            "reminders",
            HandlerBinding::new("followup")
                .with_action("schedule_reminders")
                .requires(["appointment_id", "appointment_datetime"])
                .produces(["reminder_ids", "reminders_scheduled"]),
        )
        .build()
}

/// `schedule_appointment`: book a visit for an existing patient, then
/// queue its reminders
pub fn schedule_appointment() -> WorkflowDefinition {
    WorkflowBuilder::new("schedule_appointment", "Schedule Appointment")
        .input("patient_id")
        .input("preferred_date")
        .sequential(
            "booking",
            HandlerBinding::new("scheduling")
                .with_action("book")
                .requires(["patient_id", "preferred_date"])
                .produces([
                    "appointment_id",
                    "appointment_datetime",
                    "provider_name",
                    "location",
                    "confirmation_token",
                    "appointment_status",
                ]),
        )
        .sequential(
            "reminders",
            HandlerBinding::new("followup")
                .with_action("schedule_reminders")
                .requires(["appointment_id", "appointment_datetime"])
                .produces(["reminder_ids", "reminders_scheduled"]),
        )
        .build()
}

/// `reschedule_appointment`: move the visit, drop the stale reminder
/// pair, queue a fresh pair against the new datetime
///
/// `appointment_id` may arrive in the request payload or already sit in
/// the session context from the booking request.
pub fn reschedule_appointment() -> WorkflowDefinition {
    WorkflowBuilder::new("reschedule_appointment", "Reschedule Appointment")
        .input("appointment_id")
        .input("new_datetime")
        .sequential(
            "rebooking",
            HandlerBinding::new("scheduling")
                .with_action("reschedule")
                .requires(["appointment_id", "new_datetime"])
                .produces(["appointment_datetime", "previous_datetime", "appointment_status"]),
        )
        .sequential(
            "cancel_old_reminders",
            HandlerBinding::new("followup")
                .with_action("cancel_reminders")
                .requires(["appointment_id"])
                .produces(["reminders_cancelled"]),
        )
        .sequential(
            "schedule_new_reminders",
            HandlerBinding::new("followup")
                .with_action("schedule_reminders")
                .requires(["appointment_id", "appointment_datetime"])
                .produces(["reminder_ids", "reminders_scheduled"]),
        )
        .build()
}

/// `record_no_show`: clear pending reminders, then record the miss and
/// queue outreach
pub fn record_no_show() -> WorkflowDefinition {
    WorkflowBuilder::new("record_no_show", "Record No-Show")
        .input("appointment_id")
        .sequential(
            "cancel_reminders",
            HandlerBinding::new("followup")
                .with_action("cancel_reminders")
                .requires(["appointment_id"])
                .produces(["reminders_cancelled"]),
        )
        .sequential(
            "outreach",
            HandlerBinding::new("followup")
                .with_action("process_no_show")
                .requires(["appointment_id"])
                .produces(["no_show_recorded", "followup_actions"]),
        )
        .build()
}

/// `verify_insurance`: standalone coverage check for a known patient
pub fn verify_insurance() -> WorkflowDefinition {
    WorkflowBuilder::new("verify_insurance", "Verify Insurance")
        .input("patient_id")
        .input("insurance_provider")
        .input("insurance_id")
        .sequential(
            "verification",
            HandlerBinding::new("verification")
                .requires(["patient_id", "insurance_provider", "insurance_id"])
                .produces(["coverage_status", "insurance_provider", "estimated_visit_cost"]),
        )
        .build()
}

/// Every built-in workflow definition, in registration order
pub fn builtin_workflows() -> Vec<WorkflowDefinition> {
    vec![
        new_patient_appointment(),
        schedule_appointment(),
        reschedule_appointment(),
        record_no_show(),
        verify_insurance(),
    ]
}

/// A catalog holding the built-in workflows, validated against the
/// given registry
pub fn default_catalog(registry: &HandlerRegistry) -> Result<WorkflowCatalog> {
    let mut catalog = WorkflowCatalog::new();
    for definition in builtin_workflows() {
        catalog.register(definition, Some(registry))?;
    }
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use workflow_engine::{validate_definition, StepKind};

    #[test]
    fn test_builtins_validate_against_handler_descriptors() {
        // care-handlers submits all four descriptors through inventory
        let registry = HandlerRegistry::with_builtins();
        for definition in builtin_workflows() {
            let errors = validate_definition(&definition, Some(&registry));
            assert!(
                errors.is_empty(),
                "workflow '{}' has defects: {:?}",
                definition.id,
                errors
            );
        }
    }

    #[test]
    fn test_new_patient_shape() {
        let definition = new_patient_appointment();
        assert_eq!(definition.steps.len(), 3);
        assert_eq!(definition.binding_count(), 4);
        assert_eq!(definition.steps[0].kind, StepKind::Parallel);
        assert_eq!(definition.steps[0].bindings.len(), 2);

        let verification = definition.find_step("verification").unwrap();
        assert!(verification
            .required_fields()
            .contains(&"patient_id"));
    }

    #[test]
    fn test_default_catalog_supported_types() {
        let registry = HandlerRegistry::with_builtins();
        let catalog = default_catalog(&registry).unwrap();
        assert_eq!(
            catalog.supported_types(),
            vec![
                "new_patient_appointment",
                "record_no_show",
                "reschedule_appointment",
                "schedule_appointment",
                "verify_insurance",
            ]
        );
    }

    #[test]
    fn test_definitions_round_trip_as_json() {
        for definition in builtin_workflows() {
            let json = serde_json::to_string_pretty(&definition).unwrap();
            let back: WorkflowDefinition = serde_json::from_str(&json).unwrap();
            assert_eq!(back.id, definition.id);
            assert_eq!(back.binding_count(), definition.binding_count());
        }
    }
}
