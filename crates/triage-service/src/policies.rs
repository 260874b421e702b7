//! Default failure policy table
//!
//! How the assembled service resolves each anticipated handler failure.
//! Registration and booking defects invalidate everything downstream,
//! so they halt. Coverage problems degrade to a status the front desk
//! resolves at arrival. Reminder gateway blips get a short retry before
//! the visit proceeds without reminders. Anything unanticipated falls
//! to the table default and halts.

use serde_json::{json, Value};
use workflow_engine::{FailureRule, FieldMap, PolicyTable, RetryPolicy};

use care_handlers::failure_kinds;

/// Attempts per reminder send before degrading
const REMINDER_RETRY_ATTEMPTS: u32 = 3;
/// Base backoff between reminder retry attempts
const REMINDER_RETRY_BASE_MS: u64 = 50;
/// Backoff cap between reminder retry attempts
const REMINDER_RETRY_MAX_MS: u64 = 1000;

fn fallback(pairs: &[(&str, Value)]) -> FieldMap {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

/// The policy table the service assembles with by default
pub fn default_policies() -> PolicyTable {
    PolicyTable::new()
        // No patient record or booking means nothing downstream can run
        .rule(
            "intake",
            failure_kinds::VALIDATION_FAILED,
            FailureRule::halt(),
        )
        .rule(
            "scheduling",
            failure_kinds::VALIDATION_FAILED,
            FailureRule::halt(),
        )
        .rule(
            "scheduling",
            failure_kinds::APPOINTMENT_NOT_FOUND,
            FailureRule::halt(),
        )
        // The visit stands while coverage is unresolved
        .rule(
            "verification",
            failure_kinds::INSURANCE_PROVIDER_UNAVAILABLE,
            FailureRule::continue_with(fallback(&[("coverage_status", json!("pending"))])),
        )
        .rule(
            "verification",
            failure_kinds::COVERAGE_INELIGIBLE,
            FailureRule::continue_with(fallback(&[("coverage_status", json!("inactive"))])),
        )
        // Gateway blips are worth a few attempts; the visit stands
        // either way
        .rule(
            "followup",
            failure_kinds::NOTIFICATION_UNAVAILABLE,
            FailureRule::continue_with(fallback(&[
                ("reminders_scheduled", json!(0)),
                ("reminder_ids", json!([])),
            ]))
            .with_retry(RetryPolicy::new(
                REMINDER_RETRY_ATTEMPTS,
                REMINDER_RETRY_BASE_MS,
                REMINDER_RETRY_MAX_MS,
            )),
        )
        .rule(
            "followup",
            failure_kinds::REMINDERS_NOT_FOUND,
            FailureRule::continue_with(fallback(&[("reminders_cancelled", json!(0))])),
        )
}
