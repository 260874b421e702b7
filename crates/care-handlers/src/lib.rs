//! Care Handlers
//!
//! Task-domain handler implementations for the Triage workflow engine.
//! Each handler owns one administrative task domain behind the engine's
//! `Handler` contract and keeps its own embedded mock store:
//!
//! - **intake**: patient registration forms
//! - **scheduling**: appointment booking and maintenance
//! - **verification**: insurance coverage eligibility
//! - **followup**: reminders, cancellations and no-show outreach
//!
//! Every handler submits its descriptor through `inventory`, so
//! `HandlerRegistry::with_builtins()` sees all four kinds.

use workflow_engine::{HandlerFailure, HandlerInput};

pub mod followup;
pub mod intake;
pub mod scheduling;
pub mod verification;

// Re-export all handlers for convenience
pub use followup::*;
pub use intake::*;
pub use scheduling::*;
pub use verification::*;

/// Failure kinds raised by the care handlers (policy keys)
pub mod failure_kinds {
    /// A required input field was absent or malformed
    pub const VALIDATION_FAILED: &str = "validation_failed";
    /// The appointment id does not match a booked appointment
    pub const APPOINTMENT_NOT_FOUND: &str = "appointment_not_found";
    /// The member's coverage could not be confirmed as active
    pub const COVERAGE_INELIGIBLE: &str = "coverage_ineligible";
    /// The payer's verification service is not responding
    pub const INSURANCE_PROVIDER_UNAVAILABLE: &str = "insurance_provider_unavailable";
    /// The notification gateway refused a reminder send
    pub const NOTIFICATION_UNAVAILABLE: &str = "notification_unavailable";
    /// No reminders are queued for the appointment
    pub const REMINDERS_NOT_FOUND: &str = "reminders_not_found";
}

/// A required string input field, or a `validation_failed` failure
/// naming the missing field
pub(crate) fn required_str<'a>(
    input: &'a HandlerInput,
    field: &str,
) -> Result<&'a str, HandlerFailure> {
    input
        .str_field(field)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| {
            HandlerFailure::new(
                failure_kinds::VALIDATION_FAILED,
                format!("{} is required", field),
            )
        })
}
