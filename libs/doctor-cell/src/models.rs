use chrono::{DateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use shared_models::AppError;

/// Weekday of a recurring availability row, in clinic-local terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl DayOfWeek {
    pub fn as_str(&self) -> &'static str {
        match self {
            DayOfWeek::Monday => "monday",
            DayOfWeek::Tuesday => "tuesday",
            DayOfWeek::Wednesday => "wednesday",
            DayOfWeek::Thursday => "thursday",
            DayOfWeek::Friday => "friday",
            DayOfWeek::Saturday => "saturday",
            DayOfWeek::Sunday => "sunday",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "monday" => Some(DayOfWeek::Monday),
            "tuesday" => Some(DayOfWeek::Tuesday),
            "wednesday" => Some(DayOfWeek::Wednesday),
            "thursday" => Some(DayOfWeek::Thursday),
            "friday" => Some(DayOfWeek::Friday),
            "saturday" => Some(DayOfWeek::Saturday),
            "sunday" => Some(DayOfWeek::Sunday),
            _ => None,
        }
    }
}

impl From<Weekday> for DayOfWeek {
    fn from(weekday: Weekday) -> Self {
        match weekday {
            Weekday::Mon => DayOfWeek::Monday,
            Weekday::Tue => DayOfWeek::Tuesday,
            Weekday::Wed => DayOfWeek::Wednesday,
            Weekday::Thu => DayOfWeek::Thursday,
            Weekday::Fri => DayOfWeek::Friday,
            Weekday::Sat => DayOfWeek::Saturday,
            Weekday::Sun => DayOfWeek::Sunday,
        }
    }
}

impl std::fmt::Display for DayOfWeek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorAvailability {
    pub id: i64,
    pub doctor_id: i64,
    pub day_of_week: DayOfWeek,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAvailabilityRequest {
    pub day_of_week: DayOfWeek,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateAvailabilityRequest {
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbsenceKind {
    Planned,
    Emergency,
}

impl AbsenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbsenceKind::Planned => "planned",
            AbsenceKind::Emergency => "emergency",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "planned" => Some(AbsenceKind::Planned),
            "emergency" => Some(AbsenceKind::Emergency),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorAbsence {
    pub id: i64,
    pub doctor_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub kind: AbsenceKind,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAbsenceRequest {
    /// Required when an admin creates the absence on a doctor's behalf.
    pub doctor_id: Option<i64>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateAbsenceRequest {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

/// Exactly one of the two ids selects the visit type of a booking.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct VisitTypeSelector {
    pub appointment_type_id: Option<i64>,
    pub doctor_visit_type_id: Option<i64>,
}

impl VisitTypeSelector {
    pub fn shared(appointment_type_id: i64) -> Self {
        Self {
            appointment_type_id: Some(appointment_type_id),
            doctor_visit_type_id: None,
        }
    }

    pub fn doctor_specific(doctor_visit_type_id: i64) -> Self {
        Self {
            appointment_type_id: None,
            doctor_visit_type_id: Some(doctor_visit_type_id),
        }
    }

    pub fn is_exactly_one(&self) -> bool {
        self.appointment_type_id.is_some() != self.doctor_visit_type_id.is_some()
    }
}

/// Outcome of duration resolution, carrying everything the booking pipeline
/// needs downstream.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedVisitType {
    pub duration_minutes: i64,
    pub requires_approved_files: bool,
    pub appointment_type_id: Option<i64>,
    pub doctor_visit_type_id: Option<i64>,
    pub type_name: String,
}

/// One entry of a doctor's bookable catalog, duration already
/// override-resolved.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntry {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub duration_minutes: i64,
    pub requires_approved_files: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct VisitTypeCatalog {
    pub shared: Vec<CatalogEntry>,
    pub doctor_specific: Vec<CatalogEntry>,
}

/// Minimal mirror of the identity provider's user record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: i64,
    pub role: shared_models::Role,
    pub full_name: String,
}

#[derive(Error, Debug)]
pub enum DoctorError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    NotConfigured(String),

    #[error("Invalid duration.")]
    InvalidDuration(i64),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<DoctorError> for AppError {
    fn from(err: DoctorError) -> Self {
        match err {
            DoctorError::NotFound(msg) => AppError::NotFound(msg),
            DoctorError::NotConfigured(msg) => AppError::Configuration(msg),
            DoctorError::InvalidDuration(_) => {
                AppError::ValidationError("Invalid duration.".to_string())
            }
            DoctorError::Validation(msg) => AppError::ValidationError(msg),
            DoctorError::Conflict(msg) => AppError::Conflict(msg),
            DoctorError::Database(msg) => AppError::Database(msg),
        }
    }
}
