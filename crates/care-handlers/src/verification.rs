//! Insurance Verification Handler
//!
//! Checks coverage eligibility against an embedded payer table and
//! estimates the visit cost from the matched plan terms. The handler
//! can be constructed with a simulated upstream outage so the Continue
//! policy path is exercisable end to end.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use workflow_engine::{
    Handler, HandlerDescriptor, HandlerFailure, HandlerInput, HandlerMetadata, HandlerOutput,
    HandlerResult,
};

use crate::{failure_kinds, required_str};

/// Plan terms for one payer in the network table
#[derive(Debug, Clone, Copy)]
pub struct PlanTerms {
    pub insurer: &'static str,
    pub copay: u32,
    pub specialist_copay: u32,
    pub rx_copay: u32,
    pub emergency_copay: u32,
    pub coinsurance_percent: u32,
    pub annual_deductible: u32,
    pub deductible_met: u32,
    pub out_of_pocket_max: u32,
}

/// The payer network (mock data), keyed by normalized payer name
const PLAN_TABLE: &[(&str, PlanTerms)] = &[
    (
        "BLUE SHIELD",
        PlanTerms {
            insurer: "Blue Shield of California",
            copay: 30,
            specialist_copay: 50,
            rx_copay: 10,
            emergency_copay: 250,
            coinsurance_percent: 20,
            annual_deductible: 1000,
            deductible_met: 500,
            out_of_pocket_max: 5000,
        },
    ),
    (
        "AETNA",
        PlanTerms {
            insurer: "Aetna Health",
            copay: 25,
            specialist_copay: 45,
            rx_copay: 15,
            emergency_copay: 300,
            coinsurance_percent: 15,
            annual_deductible: 750,
            deductible_met: 400,
            out_of_pocket_max: 4500,
        },
    ),
    (
        "UNITED",
        PlanTerms {
            insurer: "UnitedHealth Group",
            copay: 35,
            specialist_copay: 60,
            rx_copay: 20,
            emergency_copay: 350,
            coinsurance_percent: 25,
            annual_deductible: 1200,
            deductible_met: 600,
            out_of_pocket_max: 5500,
        },
    ),
    (
        "CIGNA",
        PlanTerms {
            insurer: "Cigna Health",
            copay: 28,
            specialist_copay: 48,
            rx_copay: 12,
            emergency_copay: 280,
            coinsurance_percent: 18,
            annual_deductible: 950,
            deductible_met: 550,
            out_of_pocket_max: 4800,
        },
    ),
];

/// One completed eligibility check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub patient_id: Option<String>,
    pub insurance_provider: String,
    pub insurance_id: String,
    pub coverage_status: String,
    pub verified_at: DateTime<Utc>,
}

/// Insurance Verification Handler
///
/// Single-behavior. Eligibility requires the payer to match the network
/// table, a member id of at least six characters, and the member id to
/// hash into an active bucket (90% of ids). Everything else is
/// `coverage_ineligible`; a simulated outage for the matched payer is
/// `insurance_provider_unavailable` instead.
///
/// # Inputs
/// - `insurance_provider`, `insurance_id` (required)
/// - `patient_id` (optional, attached to the stored record)
///
/// # Outputs
/// - `coverage_status = "active"`, normalized `insurance_provider`
/// - plan terms and `estimated_visit_cost`
#[derive(Default)]
pub struct VerificationHandler {
    verifications: Mutex<HashMap<String, VerificationRecord>>,
    outage: Option<String>,
}

impl VerificationHandler {
    pub const FIELD_INSURANCE_PROVIDER: &'static str = "insurance_provider";
    pub const FIELD_INSURANCE_ID: &'static str = "insurance_id";
    pub const FIELD_PATIENT_ID: &'static str = "patient_id";
    pub const FIELD_COVERAGE_STATUS: &'static str = "coverage_status";
    pub const FIELD_ESTIMATED_VISIT_COST: &'static str = "estimated_visit_cost";

    /// Charge a routine visit is estimated against
    const BASE_VISIT_CHARGE: u32 = 150;
    /// Member ids hash into 100 buckets; this many count as active
    const ACTIVE_BUCKETS: u64 = 90;
    const MIN_MEMBER_ID_LEN: usize = 6;
    const VALID_THROUGH: &'static str = "2026-12-31";

    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an upstream outage for payers matching `insurer`
    pub fn with_outage(insurer: impl Into<String>) -> Self {
        Self {
            verifications: Mutex::new(HashMap::new()),
            outage: Some(insurer.into().trim().to_uppercase()),
        }
    }

    /// Look up the recorded check for a member id
    pub fn verification(&self, insurance_id: &str) -> Option<VerificationRecord> {
        self.verifications.lock().get(insurance_id).cloned()
    }

    /// Match a payer name against the network table, exact key first
    /// then by containment ("Blue Shield of California" matches
    /// "BLUE SHIELD")
    fn match_plan(provider: &str) -> Option<&'static (&'static str, PlanTerms)> {
        let normalized = provider.trim().to_uppercase();
        PLAN_TABLE
            .iter()
            .find(|(key, _)| *key == normalized)
            .or_else(|| PLAN_TABLE.iter().find(|(key, _)| normalized.contains(key)))
    }

    fn member_id_bucket(insurance_id: &str) -> u64 {
        let hash = insurance_id
            .bytes()
            .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(u64::from(b)));
        hash % 100
    }

    /// Copay plus a rough coinsurance share while the deductible is unmet
    fn estimated_visit_cost(terms: &PlanTerms) -> u32 {
        if terms.deductible_met < terms.annual_deductible {
            terms.copay + Self::BASE_VISIT_CHARGE * terms.coinsurance_percent / 100
        } else {
            terms.copay
        }
    }
}

impl HandlerDescriptor for VerificationHandler {
    fn descriptor() -> HandlerMetadata {
        HandlerMetadata::new(
            "verification",
            "Insurance Verification",
            "Checks coverage eligibility against the payer network",
        )
        .with_produces([
            Self::FIELD_COVERAGE_STATUS,
            Self::FIELD_INSURANCE_PROVIDER,
            "copay",
            "specialist_copay",
            "coinsurance_percent",
            "annual_deductible",
            "deductible_met",
            "out_of_pocket_max",
            Self::FIELD_ESTIMATED_VISIT_COST,
            "valid_through",
        ])
    }
}

inventory::submit!(workflow_engine::DescriptorFn(VerificationHandler::descriptor));

#[async_trait]
impl Handler for VerificationHandler {
    async fn execute(&self, input: HandlerInput) -> HandlerResult {
        let provider = required_str(&input, Self::FIELD_INSURANCE_PROVIDER)?;
        let insurance_id = required_str(&input, Self::FIELD_INSURANCE_ID)?;
        let normalized = provider.trim().to_uppercase();

        log::debug!(
            "VerificationHandler: eligibility check for {} in session {}",
            provider,
            input.session_id
        );

        if let Some(outage) = &self.outage {
            if normalized.contains(outage.as_str()) {
                return Err(HandlerFailure::new(
                    failure_kinds::INSURANCE_PROVIDER_UNAVAILABLE,
                    format!("{} verification service is not responding", provider),
                ));
            }
        }

        let Some((_, terms)) = Self::match_plan(provider) else {
            return Err(HandlerFailure::new(
                failure_kinds::COVERAGE_INELIGIBLE,
                format!(
                    "Insurance provider '{}' is not in the payer network",
                    provider
                ),
            ));
        };
        if insurance_id.len() < Self::MIN_MEMBER_ID_LEN {
            return Err(HandlerFailure::new(
                failure_kinds::COVERAGE_INELIGIBLE,
                format!(
                    "Member id must be at least {} characters",
                    Self::MIN_MEMBER_ID_LEN
                ),
            ));
        }
        if Self::member_id_bucket(insurance_id) >= Self::ACTIVE_BUCKETS {
            return Err(HandlerFailure::new(
                failure_kinds::COVERAGE_INELIGIBLE,
                "Coverage is inactive or expired",
            ));
        }

        let estimated = Self::estimated_visit_cost(terms);
        let record = VerificationRecord {
            patient_id: input.str_field(Self::FIELD_PATIENT_ID).map(str::to_string),
            insurance_provider: terms.insurer.to_string(),
            insurance_id: insurance_id.to_string(),
            coverage_status: "active".to_string(),
            verified_at: Utc::now(),
        };
        self.verifications
            .lock()
            .insert(insurance_id.to_string(), record);

        log::debug!(
            "VerificationHandler: {} member active, estimated visit cost {}",
            terms.insurer,
            estimated
        );

        let mut output = HandlerOutput::new();
        output.insert(Self::FIELD_COVERAGE_STATUS.to_string(), json!("active"));
        output.insert(
            Self::FIELD_INSURANCE_PROVIDER.to_string(),
            json!(terms.insurer),
        );
        output.insert("copay".to_string(), json!(terms.copay));
        output.insert(
            "specialist_copay".to_string(),
            json!(terms.specialist_copay),
        );
        output.insert(
            "coinsurance_percent".to_string(),
            json!(terms.coinsurance_percent),
        );
        output.insert(
            "annual_deductible".to_string(),
            json!(terms.annual_deductible),
        );
        output.insert("deductible_met".to_string(), json!(terms.deductible_met));
        output.insert(
            "out_of_pocket_max".to_string(),
            json!(terms.out_of_pocket_max),
        );
        output.insert(
            Self::FIELD_ESTIMATED_VISIT_COST.to_string(),
            json!(estimated),
        );
        output.insert("valid_through".to_string(), json!(Self::VALID_THROUGH));
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_input(provider: &str, member_id: &str) -> HandlerInput {
        HandlerInput::new("SES_TEST")
            .with_field(
                VerificationHandler::FIELD_INSURANCE_PROVIDER,
                json!(provider),
            )
            .with_field(VerificationHandler::FIELD_INSURANCE_ID, json!(member_id))
    }

    #[test]
    fn test_descriptor() {
        let meta = VerificationHandler::descriptor();
        assert_eq!(meta.kind, "verification");
        assert!(meta.actions.is_empty());
        assert!(meta.can_produce("coverage_status"));
        assert!(meta.can_produce("estimated_visit_cost"));
    }

    #[test]
    fn test_member_id_bucket() {
        assert_eq!(VerificationHandler::member_id_bucket("BSC123456"), 5);
        assert_eq!(VerificationHandler::member_id_bucket("XYZ789012"), 42);
        assert_eq!(VerificationHandler::member_id_bucket("MEM900"), 96);
    }

    #[test]
    fn test_match_plan_by_containment() {
        let (key, terms) = VerificationHandler::match_plan("Blue Shield of California").unwrap();
        assert_eq!(*key, "BLUE SHIELD");
        assert_eq!(terms.copay, 30);

        let (key, _) = VerificationHandler::match_plan("aetna").unwrap();
        assert_eq!(*key, "AETNA");

        assert!(VerificationHandler::match_plan("Kaiser Permanente").is_none());
    }

    #[test]
    fn test_estimated_visit_cost() {
        let (_, terms) = VerificationHandler::match_plan("BLUE SHIELD").unwrap();
        assert_eq!(VerificationHandler::estimated_visit_cost(terms), 60);

        let met = PlanTerms {
            deductible_met: 1000,
            annual_deductible: 1000,
            ..*terms
        };
        assert_eq!(VerificationHandler::estimated_visit_cost(&met), 30);
    }

    #[tokio::test]
    async fn test_active_coverage() {
        let handler = VerificationHandler::new();
        let output = handler
            .execute(check_input("Blue Shield of California", "BSC123456"))
            .await
            .unwrap();

        assert_eq!(output["coverage_status"], json!("active"));
        assert_eq!(
            output["insurance_provider"],
            json!("Blue Shield of California")
        );
        assert_eq!(output["copay"], json!(30));
        assert_eq!(output["estimated_visit_cost"], json!(60));
        assert_eq!(output["out_of_pocket_max"], json!(5000));

        let record = handler.verification("BSC123456").unwrap();
        assert_eq!(record.coverage_status, "active");
    }

    #[tokio::test]
    async fn test_unknown_payer_ineligible() {
        let handler = VerificationHandler::new();
        let failure = handler
            .execute(check_input("Kaiser Permanente", "KP1234567"))
            .await
            .unwrap_err();
        assert_eq!(failure.kind, failure_kinds::COVERAGE_INELIGIBLE);
        assert!(failure.message.contains("Kaiser Permanente"));
    }

    #[tokio::test]
    async fn test_short_member_id_ineligible() {
        let handler = VerificationHandler::new();
        let failure = handler
            .execute(check_input("Aetna", "A12"))
            .await
            .unwrap_err();
        assert_eq!(failure.kind, failure_kinds::COVERAGE_INELIGIBLE);
        assert!(failure.message.contains("6 characters"));
    }

    #[tokio::test]
    async fn test_inactive_bucket_ineligible() {
        let handler = VerificationHandler::new();
        let failure = handler
            .execute(check_input("Cigna Health", "MEM900"))
            .await
            .unwrap_err();
        assert_eq!(failure.kind, failure_kinds::COVERAGE_INELIGIBLE);
        assert!(failure.message.contains("inactive"));
    }

    #[tokio::test]
    async fn test_outage_only_hits_matching_payer() {
        let handler = VerificationHandler::with_outage("Blue Shield");

        let failure = handler
            .execute(check_input("Blue Shield of California", "BSC123456"))
            .await
            .unwrap_err();
        assert_eq!(failure.kind, failure_kinds::INSURANCE_PROVIDER_UNAVAILABLE);

        let output = handler
            .execute(check_input("Aetna Health", "XYZ789012"))
            .await
            .unwrap();
        assert_eq!(output["coverage_status"], json!("active"));
    }
}
