use std::sync::Arc;

use tracing::debug;

use shared_database::AppState;
use shared_models::{ModelScore, SymptomModel};

use crate::models::{TriageError, TriageInput, TriageOutcome, SCORE_VERSION_V1, SCORE_VERSION_V2};

/// Score floor applied whenever a patient reports symptoms but no model
/// prediction is available to corroborate them.
const SAFE_FLOOR_WITH_SYMPTOMS: i64 = 4;

const VITAL_FIELDS: [&str; 4] = ["temperature_c", "bp_systolic", "bp_diastolic", "heart_rate"];

/// Rule score over the vitals alone, seeded with the model score when one
/// exists so that model and rules reinforce rather than compete.
fn vitals_score(input: &TriageInput, model: Option<ModelScore>) -> i64 {
    let mut score = model.map(|m| f64::from(m.score)).unwrap_or(0.0);

    if let Some(t) = input.temperature_c {
        if t >= 38.0 {
            score += 2.0;
        }
        if t >= 39.5 {
            score += 1.0;
        }
    }

    if let Some(hr) = input.heart_rate {
        if hr >= 110 {
            score += 2.0;
        }
        if hr >= 130 {
            score += 1.0;
        }
    }

    // Blood pressure contributes only when both readings are present.
    if let (Some(sys), Some(dia)) = (input.bp_systolic, input.bp_diastolic) {
        if sys >= 170 || dia >= 110 {
            score += 2.0;
        }
        if sys <= 90 || dia <= 60 {
            score += 1.0;
        }
    }

    (score.round() as i64).clamp(1, 10)
}

/// Blend the rule score with an optional model prediction.
///
/// With symptoms and a model prediction the final score is whichever is
/// higher, and confidence starts from 100 less 10 per missing vital (forced
/// to 100 when the vitals alone already read severe and complete). With
/// symptoms but no prediction the score is floored at
/// [`SAFE_FLOOR_WITH_SYMPTOMS`] and confidence starts from 40 less 5 per
/// missing vital. Without symptoms the vitals stand alone and confidence is
/// simply the share of fields provided. A model prediction also caps
/// confidence at the model's own.
pub fn compute_triage(input: &TriageInput, model: Option<ModelScore>) -> TriageOutcome {
    let symptoms = input.symptoms();

    let mut missing: Vec<String> = Vec::new();
    if symptoms.is_none() {
        missing.push("symptoms_text".to_string());
    }
    if input.temperature_c.is_none() {
        missing.push("temperature_c".to_string());
    }
    if input.bp_systolic.is_none() {
        missing.push("bp_systolic".to_string());
    }
    if input.bp_diastolic.is_none() {
        missing.push("bp_diastolic".to_string());
    }
    if input.heart_rate.is_none() {
        missing.push("heart_rate".to_string());
    }

    let vitals = vitals_score(input, model);
    let missing_vitals = missing
        .iter()
        .filter(|field| VITAL_FIELDS.contains(&field.as_str()))
        .count() as i64;

    let (final_score, confidence) = if symptoms.is_some() {
        match model {
            Some(m) => {
                let mut confidence = 100 - 10 * missing_vitals;
                if vitals >= 7 && missing_vitals == 0 {
                    confidence = 100;
                }
                (i64::from(m.score).max(vitals), confidence)
            }
            None => (vitals.max(SAFE_FLOOR_WITH_SYMPTOMS), 40 - 5 * missing_vitals),
        }
    } else {
        let provided = 5 - missing.len() as i64;
        let confidence = ((provided as f64 / 5.0) * 100.0).round() as i64;
        (vitals, confidence)
    };

    let score = final_score.clamp(1, 10) as u8;
    let mut confidence = confidence.clamp(0, 100) as u8;
    let mut score_version = SCORE_VERSION_V1;
    if let Some(m) = model {
        confidence = confidence.min(m.confidence);
        score_version = SCORE_VERSION_V2;
    }

    TriageOutcome {
        score,
        confidence,
        missing_fields: missing,
        score_version: score_version.to_string(),
    }
}

/// Asks the configured symptom model for a prediction (when there is symptom
/// text to feed it) and blends the answer with the vitals rules.
#[derive(Clone)]
pub struct TriageService {
    model: Arc<dyn SymptomModel>,
}

impl TriageService {
    pub fn new(state: &AppState) -> Self {
        Self {
            model: state.symptom_model.clone(),
        }
    }

    pub async fn assess(&self, input: &TriageInput) -> Result<TriageOutcome, TriageError> {
        input.validate()?;

        let prediction = match input.symptoms() {
            Some(text) => self.model.predict(text).await,
            None => None,
        };

        let outcome = compute_triage(input, prediction);
        debug!(
            "Triage assessed: score={} confidence={} version={}",
            outcome.score, outcome.confidence, outcome.score_version
        );
        Ok(outcome)
    }
}
