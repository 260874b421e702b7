//! Patient Intake Handler
//!
//! Validates registration forms, normalizes the demographic fields,
//! flags critical health information and files the patient record in
//! the embedded store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use workflow_engine::{
    tag_id, Handler, HandlerDescriptor, HandlerFailure, HandlerInput, HandlerMetadata,
    HandlerOutput, HandlerResult,
};

use crate::failure_kinds;

/// A filed patient record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientRecord {
    pub patient_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub date_of_birth: String,
    pub insurance_provider: String,
    pub insurance_id: String,
    pub allergies: Vec<String>,
    pub medical_history: String,
    pub critical_flags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Patient Intake Handler
///
/// Accepts a registration form under the `patient` input field, checks
/// the required fields and mints a `PAT_` patient id on success.
/// Allergies and history entries matching the high-risk lists are
/// surfaced as critical flags so downstream staff see them without
/// opening the record. Single-behavior: the handler takes no action
/// name.
///
/// # Inputs
/// - `patient` (required) - registration form object
///
/// # Outputs
/// - `patient_id`, `patient_name`, `patient_email`
/// - `insurance_provider`, `insurance_id` (normalized, for verification)
/// - `critical_flags`, `requires_attention`
#[derive(Default)]
pub struct IntakeHandler {
    records: Mutex<HashMap<String, PatientRecord>>,
}

impl IntakeHandler {
    /// Input field carrying the registration form
    pub const FIELD_PATIENT: &'static str = "patient";
    /// Output field for the minted patient id
    pub const FIELD_PATIENT_ID: &'static str = "patient_id";
    pub const FIELD_PATIENT_NAME: &'static str = "patient_name";
    pub const FIELD_PATIENT_EMAIL: &'static str = "patient_email";
    pub const FIELD_INSURANCE_PROVIDER: &'static str = "insurance_provider";
    pub const FIELD_INSURANCE_ID: &'static str = "insurance_id";
    pub const FIELD_CRITICAL_FLAGS: &'static str = "critical_flags";
    pub const FIELD_REQUIRES_ATTENTION: &'static str = "requires_attention";

    /// Form fields a registration cannot be filed without
    const REQUIRED_FORM_FIELDS: &'static [&'static str] = &[
        "first_name",
        "last_name",
        "email",
        "phone",
        "date_of_birth",
        "insurance_provider",
        "insurance_id",
    ];
    /// Allergy substrings that flag a record for attention
    const HIGH_RISK_ALLERGIES: &'static [&'static str] = &["penicillin", "latex", "severe"];
    /// History substrings that flag a record for attention
    const HIGH_RISK_CONDITIONS: &'static [&'static str] =
        &["diabetes", "heart", "cancer", "asthma"];

    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a filed record by patient id
    pub fn record(&self, patient_id: &str) -> Option<PatientRecord> {
        self.records.lock().get(patient_id).cloned()
    }

    /// Number of filed patient records
    pub fn record_count(&self) -> usize {
        self.records.lock().len()
    }

    /// Required form fields that are absent, null or blank
    fn missing_fields(form: &Map<String, Value>) -> Vec<String> {
        Self::REQUIRED_FORM_FIELDS
            .iter()
            .copied()
            .filter(|field| match form.get(*field) {
                None | Some(Value::Null) => true,
                Some(Value::String(s)) => s.trim().is_empty(),
                Some(_) => false,
            })
            .map(str::to_string)
            .collect()
    }

    /// Critical-info flags for the allergy list and history text
    fn critical_flags(allergies: &[String], medical_history: &str) -> Vec<String> {
        let mut flags = Vec::new();
        for allergy in allergies {
            let lowered = allergy.to_lowercase();
            if Self::HIGH_RISK_ALLERGIES
                .iter()
                .any(|risk| lowered.contains(risk))
            {
                flags.push(format!("CRITICAL ALLERGY: {}", allergy));
            }
        }
        let history = medical_history.to_lowercase();
        for condition in Self::HIGH_RISK_CONDITIONS {
            if history.contains(condition) {
                flags.push(format!("SIGNIFICANT CONDITION: {}", condition));
            }
        }
        flags
    }

    fn str_entry(form: &Map<String, Value>, key: &str) -> String {
        form.get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string()
    }

    fn allergy_list(form: &Map<String, Value>) -> Vec<String> {
        form.get("allergies")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl HandlerDescriptor for IntakeHandler {
    fn descriptor() -> HandlerMetadata {
        HandlerMetadata::new(
            "intake",
            "Patient Intake",
            "Validates registration forms and files patient records",
        )
        .with_produces([
            Self::FIELD_PATIENT_ID,
            Self::FIELD_PATIENT_NAME,
            Self::FIELD_PATIENT_EMAIL,
            Self::FIELD_INSURANCE_PROVIDER,
            Self::FIELD_INSURANCE_ID,
            Self::FIELD_CRITICAL_FLAGS,
            Self::FIELD_REQUIRES_ATTENTION,
        ])
    }
}

inventory::submit!(workflow_engine::DescriptorFn(IntakeHandler::descriptor));

#[async_trait]
impl Handler for IntakeHandler {
    async fn execute(&self, input: HandlerInput) -> HandlerResult {
        let form = match input.field(Self::FIELD_PATIENT) {
            Some(Value::Object(form)) => form,
            Some(_) => {
                return Err(HandlerFailure::new(
                    failure_kinds::VALIDATION_FAILED,
                    "patient must be a registration form object",
                ))
            }
            None => {
                return Err(HandlerFailure::new(
                    failure_kinds::VALIDATION_FAILED,
                    "patient registration form is required",
                ))
            }
        };

        log::debug!(
            "IntakeHandler: processing registration for session {}",
            input.session_id
        );

        let missing = Self::missing_fields(form);
        if !missing.is_empty() {
            return Err(HandlerFailure::new(
                failure_kinds::VALIDATION_FAILED,
                format!("Missing required fields: {}", missing.join(", ")),
            ));
        }

        let first_name = Self::str_entry(form, "first_name");
        let last_name = Self::str_entry(form, "last_name");
        let email = Self::str_entry(form, "email").to_lowercase();
        let allergies = Self::allergy_list(form);
        let medical_history = Self::str_entry(form, "medical_history");
        let critical_flags = Self::critical_flags(&allergies, &medical_history);

        let record = PatientRecord {
            patient_id: tag_id("PAT"),
            first_name: first_name.clone(),
            last_name: last_name.clone(),
            email: email.clone(),
            phone: Self::str_entry(form, "phone"),
            date_of_birth: Self::str_entry(form, "date_of_birth"),
            insurance_provider: Self::str_entry(form, "insurance_provider"),
            insurance_id: Self::str_entry(form, "insurance_id"),
            allergies,
            medical_history,
            critical_flags: critical_flags.clone(),
            created_at: Utc::now(),
        };

        log::debug!(
            "IntakeHandler: filed {} for {} {} ({} critical flags)",
            record.patient_id,
            record.first_name,
            record.last_name,
            critical_flags.len()
        );

        let mut output = HandlerOutput::new();
        output.insert(Self::FIELD_PATIENT_ID.to_string(), json!(record.patient_id));
        output.insert(
            Self::FIELD_PATIENT_NAME.to_string(),
            json!(format!("{} {}", first_name, last_name)),
        );
        output.insert(Self::FIELD_PATIENT_EMAIL.to_string(), json!(email));
        output.insert(
            Self::FIELD_INSURANCE_PROVIDER.to_string(),
            json!(record.insurance_provider),
        );
        output.insert(
            Self::FIELD_INSURANCE_ID.to_string(),
            json!(record.insurance_id),
        );
        output.insert(
            Self::FIELD_CRITICAL_FLAGS.to_string(),
            json!(critical_flags),
        );
        output.insert(
            Self::FIELD_REQUIRES_ATTENTION.to_string(),
            json!(!critical_flags.is_empty()),
        );

        self.records
            .lock()
            .insert(record.patient_id.clone(), record);

        Ok(output)
    }
}
