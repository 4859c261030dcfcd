use serde::{Deserialize, Serialize};
use thiserror::Error;

use shared_models::AppError;

pub const SCORE_VERSION_V1: &str = "triage_v1";
pub const SCORE_VERSION_V2: &str = "triage_v2";

/// Caller-supplied symptoms and vitals. Everything is optional; the scorer
/// tracks what was left out.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriageInput {
    pub symptoms_text: Option<String>,
    pub temperature_c: Option<f64>,
    pub bp_systolic: Option<i64>,
    pub bp_diastolic: Option<i64>,
    pub heart_rate: Option<i64>,
}

impl TriageInput {
    /// Symptom text with surrounding whitespace stripped; empty counts as
    /// absent.
    pub fn symptoms(&self) -> Option<&str> {
        self.symptoms_text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }

    /// Reject physiologically implausible vitals before scoring.
    pub fn validate(&self) -> Result<(), TriageError> {
        if let Some(t) = self.temperature_c {
            if !(30.0..=45.0).contains(&t) {
                return Err(TriageError::Validation(
                    "temperature_c must be between 30.0 and 45.0.".to_string(),
                ));
            }
        }
        if let Some(sys) = self.bp_systolic {
            if !(50..=260).contains(&sys) {
                return Err(TriageError::Validation(
                    "bp_systolic must be between 50 and 260.".to_string(),
                ));
            }
        }
        if let Some(dia) = self.bp_diastolic {
            if !(30..=160).contains(&dia) {
                return Err(TriageError::Validation(
                    "bp_diastolic must be between 30 and 160.".to_string(),
                ));
            }
        }
        if let Some(hr) = self.heart_rate {
            if !(30..=240).contains(&hr) {
                return Err(TriageError::Validation(
                    "heart_rate must be between 30 and 240.".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Derived urgency snapshot, persisted verbatim next to the appointment or
/// urgent request it was computed for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriageOutcome {
    pub score: u8,
    pub confidence: u8,
    pub missing_fields: Vec<String>,
    pub score_version: String,
}

#[derive(Error, Debug)]
pub enum TriageError {
    #[error("{0}")]
    Validation(String),
}

impl From<TriageError> for AppError {
    fn from(err: TriageError) -> Self {
        match err {
            TriageError::Validation(msg) => AppError::ValidationError(msg),
        }
    }
}
