use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use doctor_cell::models::{DoctorError, VisitTypeSelector};
use triage_cell::models::{TriageError, TriageInput};

/// Appointment lifecycle state. `cancelled` and `no_show` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no_show",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(AppointmentStatus::Pending),
            "confirmed" => Some(AppointmentStatus::Confirmed),
            "cancelled" => Some(AppointmentStatus::Cancelled),
            "no_show" => Some(AppointmentStatus::NoShow),
            _ => None,
        }
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Appointment {
    pub id: i64,
    pub patient_id: i64,
    pub doctor_id: i64,
    pub appointment_type_id: Option<i64>,
    pub doctor_visit_type_id: Option<i64>,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: Option<i64>,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// End instant; a row without a stored duration is treated as zero-length.
    pub fn end_time(&self) -> DateTime<Utc> {
        self.start_time + Duration::minutes(self.duration_minutes.unwrap_or(0))
    }
}

/// Booking surface payload. `date_time` accepts RFC 3339 with an offset, or a
/// naive `YYYY-MM-DDTHH:MM[:SS]` read as clinic-local wall-clock time.
#[derive(Debug, Clone, Deserialize)]
pub struct BookingRequest {
    pub doctor_id: i64,
    pub appointment_type_id: Option<i64>,
    pub doctor_specific_visit_type_id: Option<i64>,
    pub date_time: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub triage: Option<TriageInput>,
}

impl BookingRequest {
    pub fn selector(&self) -> VisitTypeSelector {
        VisitTypeSelector {
            appointment_type_id: self.appointment_type_id,
            doctor_visit_type_id: self.doctor_specific_visit_type_id,
        }
    }
}

/// Persisted triage snapshot, written once at booking and never updated.
#[derive(Debug, Clone, Serialize)]
pub struct TriageSnapshot {
    pub id: i64,
    pub symptoms_text: Option<String>,
    pub temperature_c: Option<f64>,
    pub bp_systolic: Option<i64>,
    pub bp_diastolic: Option<i64>,
    pub heart_rate: Option<i64>,
    pub score: i64,
    pub confidence: i64,
    pub missing_fields: Vec<String>,
    pub score_version: String,
    pub created_at: DateTime<Utc>,
}

/// A committed booking plus its optional triage snapshot.
#[derive(Debug, Clone)]
pub struct BookedAppointment {
    pub appointment: Appointment,
    pub triage: Option<TriageSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AvailabilityWindow {
    /// Clinic-local `HH:MM`.
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DaySlots {
    pub date: NaiveDate,
    pub availability: AvailabilityWindow,
    pub slots: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SlotQuery {
    pub date: NaiveDate,
    pub appointment_type_id: i64,
    pub duration_minutes: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SlotRangeQuery {
    pub appointment_type_id: i64,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub days: Option<i64>,
    pub duration_minutes: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct DaySlotsOutcome {
    pub duration_minutes: i64,
    pub availability: Option<AvailabilityWindow>,
    pub slots: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RangeSlotsOutcome {
    pub duration_minutes: i64,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub days: Vec<DaySlots>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MyAppointmentsQuery {
    pub status: Option<String>,
    pub time: Option<String>,
    pub preset: Option<String>,
    pub date: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

/// One row of the my-appointments listing, with the context the clients
/// render next to it.
#[derive(Debug, Clone)]
pub struct AppointmentListing {
    pub appointment: Appointment,
    pub patient_name: String,
    pub doctor_name: String,
    pub type_name: Option<String>,
    pub has_any_orders: bool,
    pub has_open_orders: bool,
    pub triage: Option<TriageSnapshot>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmergencyAbsenceRequest {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrgentRequestStatus {
    Open,
    Handled,
    Rejected,
    Cancelled,
}

impl UrgentRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UrgentRequestStatus::Open => "open",
            UrgentRequestStatus::Handled => "handled",
            UrgentRequestStatus::Rejected => "rejected",
            UrgentRequestStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "open" => Some(UrgentRequestStatus::Open),
            "handled" => Some(UrgentRequestStatus::Handled),
            "rejected" => Some(UrgentRequestStatus::Rejected),
            "cancelled" => Some(UrgentRequestStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrgentHandledType {
    Scheduled,
    Rejected,
}

impl UrgentHandledType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UrgentHandledType::Scheduled => "scheduled",
            UrgentHandledType::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "scheduled" => Some(UrgentHandledType::Scheduled),
            "rejected" => Some(UrgentHandledType::Rejected),
            _ => None,
        }
    }
}

/// Waitlist entry raised by a patient when triage is high and no slot fits.
/// Carries its own triage snapshot; linked to an appointment only once a
/// doctor schedules it.
#[derive(Debug, Clone, Serialize)]
pub struct UrgentRequest {
    pub id: i64,
    pub patient_id: i64,
    pub doctor_id: i64,
    pub appointment_type_id: i64,
    pub symptoms_text: Option<String>,
    pub temperature_c: Option<f64>,
    pub bp_systolic: Option<i64>,
    pub bp_diastolic: Option<i64>,
    pub heart_rate: Option<i64>,
    pub score: Option<i64>,
    pub confidence: Option<i64>,
    pub missing_fields: Vec<String>,
    pub score_version: Option<String>,
    pub notes: Option<String>,
    pub status: UrgentRequestStatus,
    pub handled_type: Option<UrgentHandledType>,
    pub handled_by: Option<i64>,
    pub rejected_reason: Option<String>,
    pub scheduled_appointment_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub handled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateUrgentRequest {
    pub doctor_id: i64,
    pub appointment_type_id: i64,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub triage: Option<TriageInput>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RejectUrgentRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleUrgentRequest {
    pub date_time: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct UrgentListQuery {
    pub status: Option<String>,
}

#[derive(Error, Debug)]
pub enum SchedulingError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Configuration(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    AvailabilityConflict(String),

    #[error("{0}")]
    StateConflict(String),

    #[error("{message}")]
    FollowUpBlocked { message: String, order_id: i64 },

    #[error("Database error: {0}")]
    Database(String),
}

impl IntoResponse for SchedulingError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            SchedulingError::Validation(msg) | SchedulingError::Configuration(msg) => {
                (StatusCode::BAD_REQUEST, json!({ "error": msg }))
            }
            SchedulingError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            SchedulingError::Forbidden(msg) => (StatusCode::FORBIDDEN, json!({ "error": msg })),
            SchedulingError::AvailabilityConflict(msg) | SchedulingError::StateConflict(msg) => {
                (StatusCode::CONFLICT, json!({ "error": msg }))
            }
            // The blocking order id rides along so clients can link straight
            // to the order that needs files.
            SchedulingError::FollowUpBlocked { message, order_id } => (
                StatusCode::CONFLICT,
                json!({ "error": message, "order_id": order_id }),
            ),
            SchedulingError::Database(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": msg }))
            }
        };

        tracing::error!("Error: {}: {}", status, self);

        (status, Json(body)).into_response()
    }
}

impl From<DoctorError> for SchedulingError {
    fn from(err: DoctorError) -> Self {
        match err {
            DoctorError::NotFound(msg) => SchedulingError::NotFound(msg),
            DoctorError::NotConfigured(msg) => SchedulingError::Configuration(msg),
            DoctorError::InvalidDuration(_) => {
                SchedulingError::Validation("Invalid duration.".to_string())
            }
            DoctorError::Validation(msg) => SchedulingError::Validation(msg),
            DoctorError::Conflict(msg) => SchedulingError::StateConflict(msg),
            DoctorError::Database(msg) => SchedulingError::Database(msg),
        }
    }
}

impl From<TriageError> for SchedulingError {
    fn from(err: TriageError) -> Self {
        match err {
            TriageError::Validation(msg) => SchedulingError::Validation(msg),
        }
    }
}
