//! Appointment Scheduling Handler
//!
//! Books, reschedules and cancels appointments against an embedded
//! provider directory, and lists open slots around a preferred date.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Timelike, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use workflow_engine::{
    tag_id, Handler, HandlerDescriptor, HandlerFailure, HandlerInput, HandlerMetadata,
    HandlerOutput, HandlerResult,
};

use crate::{failure_kinds, required_str};

/// One provider the clinic can book against
struct Provider {
    id: &'static str,
    name: &'static str,
    specialty: &'static str,
    location: &'static str,
}

/// The clinic's provider directory (mock data)
const PROVIDER_DIRECTORY: &[Provider] = &[
    Provider {
        id: "PROV_001",
        name: "Dr. Jane Smith",
        specialty: "General Practice",
        location: "Downtown Clinic",
    },
    Provider {
        id: "PROV_002",
        name: "Dr. John Martinez",
        specialty: "Cardiology",
        location: "Medical Plaza",
    },
    Provider {
        id: "PROV_003",
        name: "Dr. Sarah Chen",
        specialty: "Dermatology",
        location: "Downtown Clinic",
    },
];

/// A booked appointment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentRecord {
    pub appointment_id: String,
    pub patient_id: Option<String>,
    pub provider_id: String,
    pub appointment_type: String,
    pub datetime: String,
    pub previous_datetime: Option<String>,
    pub duration_minutes: u32,
    pub status: String,
    pub booked_at: DateTime<Utc>,
}

/// Appointment Scheduling Handler
///
/// Dispatches on the binding's action name. Appointments live in an
/// embedded store keyed by `APT_` id; the provider directory is fixed
/// mock data.
///
/// # Actions
/// - `book`: schedule `preferred_date` with a provider (default
///   `PROV_001`), minting `appointment_id` and `confirmation_token`
/// - `check_availability`: five candidate slots around `preferred_date`
/// - `reschedule`: move an appointment to `new_datetime`, keeping the
///   prior value as `previous_datetime`
/// - `cancel`: mark an appointment cancelled
#[derive(Default)]
pub struct SchedulingHandler {
    appointments: Mutex<HashMap<String, AppointmentRecord>>,
}

impl SchedulingHandler {
    pub const ACTION_BOOK: &'static str = "book";
    pub const ACTION_CHECK_AVAILABILITY: &'static str = "check_availability";
    pub const ACTION_RESCHEDULE: &'static str = "reschedule";
    pub const ACTION_CANCEL: &'static str = "cancel";

    pub const FIELD_APPOINTMENT_ID: &'static str = "appointment_id";
    pub const FIELD_APPOINTMENT_DATETIME: &'static str = "appointment_datetime";
    pub const FIELD_PREFERRED_DATE: &'static str = "preferred_date";
    pub const FIELD_NEW_DATETIME: &'static str = "new_datetime";
    pub const FIELD_PREVIOUS_DATETIME: &'static str = "previous_datetime";
    pub const FIELD_APPOINTMENT_STATUS: &'static str = "appointment_status";
    pub const FIELD_CONFIRMATION_TOKEN: &'static str = "confirmation_token";
    pub const FIELD_AVAILABLE_SLOTS: &'static str = "available_slots";
    pub const FIELD_TOTAL_SLOTS: &'static str = "total_slots";

    const DEFAULT_PROVIDER_ID: &'static str = "PROV_001";
    const DEFAULT_APPOINTMENT_TYPE: &'static str = "checkup";
    const DEFAULT_DURATION_MINUTES: u32 = 30;
    const AVAILABILITY_WINDOW_DAYS: usize = 5;
    const APPOINTMENT_TYPES: &'static [&'static str] =
        &["checkup", "followup", "consultation", "procedure", "urgent"];

    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a booked appointment by id
    pub fn appointment(&self, appointment_id: &str) -> Option<AppointmentRecord> {
        self.appointments.lock().get(appointment_id).cloned()
    }

    /// Number of appointments in the store
    pub fn appointment_count(&self) -> usize {
        self.appointments.lock().len()
    }

    fn find_provider(provider_id: &str) -> Option<&'static Provider> {
        PROVIDER_DIRECTORY.iter().find(|p| p.id == provider_id)
    }

    fn book(&self, input: &HandlerInput) -> HandlerResult {
        let preferred = required_str(input, Self::FIELD_PREFERRED_DATE)?;
        let provider_id = input
            .str_field("provider_id")
            .unwrap_or(Self::DEFAULT_PROVIDER_ID);
        let Some(provider) = Self::find_provider(provider_id) else {
            return Err(HandlerFailure::new(
                failure_kinds::VALIDATION_FAILED,
                format!("Unknown provider: {}", provider_id),
            ));
        };
        let appointment_type = input
            .str_field("appointment_type")
            .unwrap_or(Self::DEFAULT_APPOINTMENT_TYPE);
        if !Self::APPOINTMENT_TYPES.contains(&appointment_type) {
            return Err(HandlerFailure::new(
                failure_kinds::VALIDATION_FAILED,
                format!("Unknown appointment type: {}", appointment_type),
            ));
        }

        let record = AppointmentRecord {
            appointment_id: tag_id("APT"),
            patient_id: input.str_field("patient_id").map(str::to_string),
            provider_id: provider.id.to_string(),
            appointment_type: appointment_type.to_string(),
            datetime: preferred.to_string(),
            previous_datetime: None,
            duration_minutes: Self::DEFAULT_DURATION_MINUTES,
            status: "scheduled".to_string(),
            booked_at: Utc::now(),
        };
        let confirmation_token = format!("CONF_{}", record.appointment_id);

        log::debug!(
            "SchedulingHandler: booked {} with {} at {}",
            record.appointment_id,
            provider.name,
            record.datetime
        );

        let mut output = HandlerOutput::new();
        output.insert(
            Self::FIELD_APPOINTMENT_ID.to_string(),
            json!(record.appointment_id),
        );
        output.insert(
            Self::FIELD_APPOINTMENT_DATETIME.to_string(),
            json!(record.datetime),
        );
        output.insert("provider_name".to_string(), json!(provider.name));
        output.insert("specialty".to_string(), json!(provider.specialty));
        output.insert("location".to_string(), json!(provider.location));
        output.insert(
            Self::FIELD_CONFIRMATION_TOKEN.to_string(),
            json!(confirmation_token),
        );
        output.insert(
            Self::FIELD_APPOINTMENT_STATUS.to_string(),
            json!("scheduled"),
        );

        self.appointments
            .lock()
            .insert(record.appointment_id.clone(), record);
        Ok(output)
    }

    /// Five open slots around the preferred date, hours staggered 9-11
    fn check_availability(input: &HandlerInput) -> HandlerResult {
        let preferred = required_str(input, Self::FIELD_PREFERRED_DATE)?;
        let base = DateTime::parse_from_rfc3339(preferred).map_err(|err| {
            HandlerFailure::new(
                failure_kinds::VALIDATION_FAILED,
                format!("preferred_date '{}' is not RFC 3339: {}", preferred, err),
            )
        })?;
        let appointment_type = input
            .str_field("appointment_type")
            .unwrap_or(Self::DEFAULT_APPOINTMENT_TYPE);
        let provider = &PROVIDER_DIRECTORY[0];

        let mut slots = Vec::new();
        for i in 0..Self::AVAILABILITY_WINDOW_DAYS {
            let day = base + Duration::days(i as i64);
            let Some(start) = day
                .with_hour(9 + (i % 3) as u32)
                .and_then(|d| d.with_minute(0))
                .and_then(|d| d.with_second(0))
                .and_then(|d| d.with_nanosecond(0))
            else {
                continue;
            };
            let end = start + Duration::minutes(i64::from(Self::DEFAULT_DURATION_MINUTES));
            slots.push(json!({
                "availability_id": format!("SLOT_{}", i),
                "start_time": start.to_rfc3339(),
                "end_time": end.to_rfc3339(),
                "duration_minutes": Self::DEFAULT_DURATION_MINUTES,
                "provider_name": provider.name,
                "location": provider.location,
                "appointment_type": appointment_type,
            }));
        }

        let mut output = HandlerOutput::new();
        output.insert(Self::FIELD_TOTAL_SLOTS.to_string(), json!(slots.len()));
        output.insert(Self::FIELD_AVAILABLE_SLOTS.to_string(), json!(slots));
        Ok(output)
    }

    fn reschedule(&self, input: &HandlerInput) -> HandlerResult {
        let appointment_id = required_str(input, Self::FIELD_APPOINTMENT_ID)?;
        let new_datetime = required_str(input, Self::FIELD_NEW_DATETIME)?;

        let mut appointments = self.appointments.lock();
        let Some(record) = appointments.get_mut(appointment_id) else {
            return Err(HandlerFailure::new(
                failure_kinds::APPOINTMENT_NOT_FOUND,
                format!("Appointment {} not found", appointment_id),
            ));
        };

        let previous = std::mem::replace(&mut record.datetime, new_datetime.to_string());
        record.previous_datetime = Some(previous.clone());
        record.status = "rescheduled".to_string();

        log::debug!(
            "SchedulingHandler: moved {} from {} to {}",
            appointment_id,
            previous,
            new_datetime
        );

        let mut output = HandlerOutput::new();
        output.insert(
            Self::FIELD_APPOINTMENT_ID.to_string(),
            json!(appointment_id),
        );
        output.insert(
            Self::FIELD_APPOINTMENT_DATETIME.to_string(),
            json!(new_datetime),
        );
        output.insert(Self::FIELD_PREVIOUS_DATETIME.to_string(), json!(previous));
        output.insert(
            Self::FIELD_APPOINTMENT_STATUS.to_string(),
            json!("rescheduled"),
        );
        Ok(output)
    }

    fn cancel(&self, input: &HandlerInput) -> HandlerResult {
        let appointment_id = required_str(input, Self::FIELD_APPOINTMENT_ID)?;
        let reason = input.str_field("reason").unwrap_or("unspecified");

        let mut appointments = self.appointments.lock();
        let Some(record) = appointments.get_mut(appointment_id) else {
            return Err(HandlerFailure::new(
                failure_kinds::APPOINTMENT_NOT_FOUND,
                format!("Appointment {} not found", appointment_id),
            ));
        };
        record.status = "cancelled".to_string();

        log::debug!(
            "SchedulingHandler: cancelled {} ({})",
            appointment_id,
            reason
        );

        let mut output = HandlerOutput::new();
        output.insert(
            Self::FIELD_APPOINTMENT_ID.to_string(),
            json!(appointment_id),
        );
        output.insert(
            Self::FIELD_APPOINTMENT_STATUS.to_string(),
            json!("cancelled"),
        );
        output.insert("cancellation_reason".to_string(), json!(reason));
        Ok(output)
    }
}

impl HandlerDescriptor for SchedulingHandler {
    fn descriptor() -> HandlerMetadata {
        HandlerMetadata::new(
            "scheduling",
            "Appointment Scheduling",
            "Books, moves and cancels appointments against the provider directory",
        )
        .with_actions([
            Self::ACTION_BOOK,
            Self::ACTION_CHECK_AVAILABILITY,
            Self::ACTION_RESCHEDULE,
            Self::ACTION_CANCEL,
        ])
        .with_produces([
            Self::FIELD_APPOINTMENT_ID,
            Self::FIELD_APPOINTMENT_DATETIME,
            Self::FIELD_PREVIOUS_DATETIME,
            Self::FIELD_APPOINTMENT_STATUS,
            Self::FIELD_CONFIRMATION_TOKEN,
            "provider_name",
            "specialty",
            "location",
            "cancellation_reason",
            Self::FIELD_AVAILABLE_SLOTS,
            Self::FIELD_TOTAL_SLOTS,
        ])
    }
}

inventory::submit!(workflow_engine::DescriptorFn(SchedulingHandler::descriptor));

#[async_trait]
impl Handler for SchedulingHandler {
    async fn execute(&self, input: HandlerInput) -> HandlerResult {
        log::debug!(
            "SchedulingHandler: {} for session {}",
            input.action.as_deref().unwrap_or("(no action)"),
            input.session_id
        );
        match input.action.as_deref() {
            Some(Self::ACTION_BOOK) => self.book(&input),
            Some(Self::ACTION_CHECK_AVAILABILITY) => Self::check_availability(&input),
            Some(Self::ACTION_RESCHEDULE) => self.reschedule(&input),
            Some(Self::ACTION_CANCEL) => self.cancel(&input),
            other => Err(HandlerFailure::new(
                failure_kinds::VALIDATION_FAILED,
                format!("Unsupported scheduling action: {}", other.unwrap_or("none")),
            )),
        }
    }
}
