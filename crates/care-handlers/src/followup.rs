//! Reminders & Follow-up Handler
//!
//! Queues the 24-hour and 1-hour reminder pair for an appointment,
//! cancels queued reminders, and records no-shows with their outreach
//! actions. Sends go through an embedded delivery gateway that tests
//! can arm to refuse the next N sends.

use async_trait::async_trait;
use chrono::{DateTime, Duration};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use workflow_engine::{
    Handler, HandlerDescriptor, HandlerFailure, HandlerInput, HandlerMetadata, HandlerOutput,
    HandlerResult,
};

use crate::{failure_kinds, required_str};

/// One queued reminder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub reminder_id: String,
    pub appointment_id: String,
    pub reminder_type: String,
    pub scheduled_time: String,
    pub channels: Vec<String>,
    pub status: String,
}

/// In-memory stand-in for the notification delivery gateway
#[derive(Default)]
struct DeliveryGateway {
    fail_next: AtomicU32,
}

impl DeliveryGateway {
    fn fail_next_sends(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    fn enqueue(&self) -> Result<(), HandlerFailure> {
        let armed = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if armed {
            Err(HandlerFailure::new(
                failure_kinds::NOTIFICATION_UNAVAILABLE,
                "Notification gateway refused the send",
            ))
        } else {
            Ok(())
        }
    }
}

/// Reminders & Follow-up Handler
///
/// Dispatches on the binding's action name. Reminders live in an
/// embedded store keyed by appointment id; re-invoking
/// `schedule_reminders` replaces the pair rather than stacking it, so
/// a retried invocation leaves exactly two reminders.
///
/// # Actions
/// - `schedule_reminders`: queue `REM_{appointment_id}_24H` and
///   `REM_{appointment_id}_1H` ahead of `appointment_datetime`
/// - `cancel_reminders`: cancel every scheduled reminder for the
///   appointment
/// - `process_no_show`: record the miss and flag outreach
#[derive(Default)]
pub struct FollowupHandler {
    reminders: Mutex<HashMap<String, Vec<Reminder>>>,
    no_shows: Mutex<Vec<String>>,
    gateway: DeliveryGateway,
}

impl FollowupHandler {
    pub const ACTION_SCHEDULE_REMINDERS: &'static str = "schedule_reminders";
    pub const ACTION_CANCEL_REMINDERS: &'static str = "cancel_reminders";
    pub const ACTION_PROCESS_NO_SHOW: &'static str = "process_no_show";

    pub const FIELD_APPOINTMENT_ID: &'static str = "appointment_id";
    pub const FIELD_APPOINTMENT_DATETIME: &'static str = "appointment_datetime";
    pub const FIELD_PHONE: &'static str = "phone";
    pub const FIELD_REMINDER_IDS: &'static str = "reminder_ids";
    pub const FIELD_REMINDERS_SCHEDULED: &'static str = "reminders_scheduled";
    pub const FIELD_REMINDERS_CANCELLED: &'static str = "reminders_cancelled";
    pub const FIELD_NO_SHOW_RECORDED: &'static str = "no_show_recorded";
    pub const FIELD_FOLLOWUP_ACTIONS: &'static str = "followup_actions";

    pub fn new() -> Self {
        Self::default()
    }

    /// Reminders queued for an appointment, any status
    pub fn reminders_for(&self, appointment_id: &str) -> Vec<Reminder> {
        self.reminders
            .lock()
            .get(appointment_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Whether a no-show has been recorded for the appointment
    pub fn no_show_recorded(&self, appointment_id: &str) -> bool {
        self.no_shows.lock().iter().any(|id| id == appointment_id)
    }

    /// Arm the delivery gateway to refuse the next `count` sends
    pub fn fail_next_sends(&self, count: u32) {
        self.gateway.fail_next_sends(count);
    }

    /// Mark every scheduled reminder for the appointment cancelled,
    /// returning how many were flipped
    fn cancel_scheduled(&self, appointment_id: &str) -> usize {
        let mut reminders = self.reminders.lock();
        let Some(queued) = reminders.get_mut(appointment_id) else {
            return 0;
        };
        let mut count = 0;
        for reminder in queued.iter_mut().filter(|r| r.status == "scheduled") {
            reminder.status = "cancelled".to_string();
            count += 1;
        }
        count
    }

    fn schedule_reminders(&self, input: &HandlerInput) -> HandlerResult {
        let appointment_id = required_str(input, Self::FIELD_APPOINTMENT_ID)?;
        let raw = required_str(input, Self::FIELD_APPOINTMENT_DATETIME)?;
        let appointment_time = DateTime::parse_from_rfc3339(raw).map_err(|err| {
            HandlerFailure::new(
                failure_kinds::VALIDATION_FAILED,
                format!("appointment_datetime '{}' is not RFC 3339: {}", raw, err),
            )
        })?;

        let has_phone = input
            .str_field(Self::FIELD_PHONE)
            .is_some_and(|phone| !phone.trim().is_empty());
        let channels: Vec<String> = if has_phone {
            vec!["email".to_string(), "sms".to_string()]
        } else {
            vec!["email".to_string()]
        };

        let pair = [
            ("24H", "appointment_reminder_24h", Duration::hours(24)),
            ("1H", "appointment_reminder_1h", Duration::hours(1)),
        ];
        let mut queued = Vec::new();
        for (suffix, reminder_type, offset) in pair {
            self.gateway.enqueue()?;
            queued.push(Reminder {
                reminder_id: format!("REM_{}_{}", appointment_id, suffix),
                appointment_id: appointment_id.to_string(),
                reminder_type: reminder_type.to_string(),
                scheduled_time: (appointment_time - offset).to_rfc3339(),
                channels: channels.clone(),
                status: "scheduled".to_string(),
            });
        }

        log::debug!(
            "FollowupHandler: queued {} reminders for {}",
            queued.len(),
            appointment_id
        );

        let reminder_ids: Vec<&str> = queued.iter().map(|r| r.reminder_id.as_str()).collect();
        let mut output = HandlerOutput::new();
        output.insert(Self::FIELD_REMINDER_IDS.to_string(), json!(reminder_ids));
        output.insert(
            Self::FIELD_REMINDERS_SCHEDULED.to_string(),
            json!(queued.len()),
        );

        self.reminders
            .lock()
            .insert(appointment_id.to_string(), queued);
        Ok(output)
    }

    fn cancel_reminders(&self, input: &HandlerInput) -> HandlerResult {
        let appointment_id = required_str(input, Self::FIELD_APPOINTMENT_ID)?;

        let cancelled = self.cancel_scheduled(appointment_id);
        if cancelled == 0 {
            return Err(HandlerFailure::new(
                failure_kinds::REMINDERS_NOT_FOUND,
                format!("No reminders found for appointment {}", appointment_id),
            ));
        }

        log::debug!(
            "FollowupHandler: cancelled {} reminders for {}",
            cancelled,
            appointment_id
        );

        let mut output = HandlerOutput::new();
        output.insert(
            Self::FIELD_REMINDERS_CANCELLED.to_string(),
            json!(cancelled),
        );
        Ok(output)
    }

    fn process_no_show(&self, input: &HandlerInput) -> HandlerResult {
        let appointment_id = required_str(input, Self::FIELD_APPOINTMENT_ID)?;

        let cancelled = self.cancel_scheduled(appointment_id);
        self.no_shows.lock().push(appointment_id.to_string());

        log::debug!(
            "FollowupHandler: recorded no-show for {} ({} reminders cancelled)",
            appointment_id,
            cancelled
        );

        let actions = [
            "Recorded the missed appointment",
            "Cancelled pending reminders",
            "Queued a reschedule outreach call",
            "Released the appointment slot",
        ];

        let mut output = HandlerOutput::new();
        output.insert(Self::FIELD_NO_SHOW_RECORDED.to_string(), json!(true));
        output.insert(Self::FIELD_FOLLOWUP_ACTIONS.to_string(), json!(actions));
        Ok(output)
    }
}

impl HandlerDescriptor for FollowupHandler {
    fn descriptor() -> HandlerMetadata {
        HandlerMetadata::new(
            "followup",
            "Reminders & Follow-up",
            "Queues appointment reminders and handles cancellations and no-shows",
        )
        .with_actions([
            Self::ACTION_SCHEDULE_REMINDERS,
            Self::ACTION_CANCEL_REMINDERS,
            Self::ACTION_PROCESS_NO_SHOW,
        ])
        .with_produces([
            Self::FIELD_REMINDER_IDS,
            Self::FIELD_REMINDERS_SCHEDULED,
            Self::FIELD_REMINDERS_CANCELLED,
            Self::FIELD_NO_SHOW_RECORDED,
            Self::FIELD_FOLLOWUP_ACTIONS,
        ])
    }
}

inventory::submit!(workflow_engine::DescriptorFn(FollowupHandler::descriptor));

#[async_trait]
impl Handler for FollowupHandler {
    async fn execute(&self, input: HandlerInput) -> HandlerResult {
        log::debug!(
            "FollowupHandler: {} for session {}",
            input.action.as_deref().unwrap_or("(no action)"),
            input.session_id
        );
        match input.action.as_deref() {
            Some(Self::ACTION_SCHEDULE_REMINDERS) => self.schedule_reminders(&input),
            Some(Self::ACTION_CANCEL_REMINDERS) => self.cancel_reminders(&input),
            Some(Self::ACTION_PROCESS_NO_SHOW) => self.process_no_show(&input),
            other => Err(HandlerFailure::new(
                failure_kinds::VALIDATION_FAILED,
                format!("Unsupported follow-up action: {}", other.unwrap_or("none")),
            )),
        }
    }
}
