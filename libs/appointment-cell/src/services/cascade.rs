use chrono::{Duration, Utc};
use rusqlite::{params, TransactionBehavior};
use serde_json::json;
use tracing::{info, warn};

use doctor_cell::models::{AbsenceKind, DoctorAbsence};
use doctor_cell::services::AbsenceService;
use shared_database::{encode_ts, ts_from_sql, AppState, Database, NotificationEvent, OutboxService};
use shared_models::AuthUser;

use crate::models::{EmergencyAbsenceRequest, SchedulingError};
use crate::services::interval::Interval;

/// Summary of one emergency-absence declaration.
#[derive(Debug)]
pub struct CascadeOutcome {
    pub absence: DoctorAbsence,
    pub cancelled_appointment_ids: Vec<i64>,
    pub tokens_issued: i64,
    pub already_handled: i64,
    pub failed_appointment_ids: Vec<i64>,
}

struct Candidate {
    id: i64,
    patient_id: i64,
    start: chrono::DateTime<Utc>,
    duration_minutes: Option<i64>,
}

enum UnitOutcome {
    Cancelled,
    AlreadyHandled,
}

/// Emergency-absence cascade: record the absence, then cancel every
/// overlapping booking and hand its patient a rebooking token.
///
/// Each cancellation is its own transaction, so one bad row cannot take the
/// rest of the cascade down with it. The cancellation log's unique pair makes
/// a re-run of the same absence skip work already done.
pub struct CascadeService {
    db: Database,
    validity_days: i64,
    absences: AbsenceService,
    outbox: OutboxService,
}

impl CascadeService {
    pub fn new(state: &AppState) -> Self {
        Self {
            db: state.db.clone(),
            validity_days: state.config.rebooking_token_validity_days,
            absences: AbsenceService::new(state),
            outbox: OutboxService::new(state.db.clone()),
        }
    }

    pub async fn declare_emergency(
        &self,
        actor: AuthUser,
        request: EmergencyAbsenceRequest,
    ) -> Result<CascadeOutcome, SchedulingError> {
        if !actor.is_doctor() {
            return Err(SchedulingError::Forbidden(
                "Only doctors can declare emergency absences.".to_string(),
            ));
        }

        let absence = self
            .absences
            .create(
                actor.id,
                AbsenceKind::Emergency,
                request.start_time,
                request.end_time,
                request.notes,
            )
            .await?;

        let mut outcome = CascadeOutcome {
            absence,
            cancelled_appointment_ids: Vec::new(),
            tokens_issued: 0,
            already_handled: 0,
            failed_appointment_ids: Vec::new(),
        };
        // create() enforces start < end, so the window always exists.
        let Some(absence_window) =
            Interval::new(outcome.absence.start_time, outcome.absence.end_time)
        else {
            return Ok(outcome);
        };

        let doctor_id = actor.id;
        let absence_id = outcome.absence.id;
        let lookback_ts = encode_ts(outcome.absence.start_time - Duration::days(1));
        let window_end_ts = encode_ts(outcome.absence.end_time);
        let candidates = self
            .db
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, patient_id, start_time, duration_minutes FROM appointments
                     WHERE doctor_id = ?1 AND status IN ('pending', 'confirmed')
                       AND start_time >= ?2 AND start_time < ?3
                     ORDER BY start_time",
                )?;
                let rows = stmt
                    .query_map(params![doctor_id, lookback_ts, window_end_ts], |row| {
                        Ok(Candidate {
                            id: row.get(0)?,
                            patient_id: row.get(1)?,
                            start: ts_from_sql(row.get(2)?)?,
                            duration_minutes: row.get(3)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>();
                rows
            })
            .await
            .map_err(|e| SchedulingError::Database(e.to_string()))?;

        for candidate in candidates {
            let end = candidate.start + Duration::minutes(candidate.duration_minutes.unwrap_or(0));
            let overlaps = Interval::new(candidate.start, end)
                .map(|interval| interval.overlaps(&absence_window))
                .unwrap_or(false);
            if !overlaps {
                continue;
            }

            match self
                .cancel_unit(absence_id, candidate.id, candidate.patient_id, doctor_id)
                .await
            {
                Ok(UnitOutcome::Cancelled) => {
                    outcome.cancelled_appointment_ids.push(candidate.id);
                    outcome.tokens_issued += 1;
                    self.outbox
                        .emit(NotificationEvent {
                            event_type: "appointment_cancelled".to_string(),
                            actor_id: Some(doctor_id),
                            recipient_id: Some(candidate.patient_id),
                            entity_type: "appointment".to_string(),
                            entity_id: candidate.id,
                            route: Some("/app/appointments".to_string()),
                            payload: json!({
                                "appointment_id": candidate.id,
                                "patient_id": candidate.patient_id,
                                "doctor_id": doctor_id,
                                "absence_id": absence_id,
                                "reason": "emergency_absence",
                            }),
                        })
                        .await;
                }
                Ok(UnitOutcome::AlreadyHandled) => outcome.already_handled += 1,
                Err(e) => {
                    warn!("Cascade unit failed for appointment {}: {}", candidate.id, e);
                    outcome.failed_appointment_ids.push(candidate.id);
                }
            }
        }

        info!(
            "Emergency absence {} cancelled {} appointments ({} already handled, {} failed)",
            absence_id,
            outcome.cancelled_appointment_ids.len(),
            outcome.already_handled,
            outcome.failed_appointment_ids.len()
        );
        Ok(outcome)
    }

    /// Log, cancel, and issue a token atomically for one appointment. A
    /// pre-existing log row means some earlier run got here first.
    async fn cancel_unit(
        &self,
        absence_id: i64,
        appointment_id: i64,
        patient_id: i64,
        doctor_id: i64,
    ) -> Result<UnitOutcome, SchedulingError> {
        let now = Utc::now();
        let now_ts = encode_ts(now);
        let expires_ts = encode_ts(now + Duration::days(self.validity_days));
        self.db
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

                let inserted = tx.execute(
                    "INSERT INTO absence_cancellation_logs (absence_id, appointment_id, cancelled_at)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT(absence_id, appointment_id) DO NOTHING",
                    params![absence_id, appointment_id, now_ts],
                )?;
                if inserted == 0 {
                    tx.commit()?;
                    return Ok(UnitOutcome::AlreadyHandled);
                }

                tx.execute(
                    "UPDATE appointments SET status = 'cancelled', updated_at = ?1 WHERE id = ?2",
                    params![now_ts, appointment_id],
                )?;
                tx.execute(
                    "INSERT INTO rebooking_tokens
                     (patient_id, doctor_id, absence_id, issued_at, expires_at, is_active)
                     VALUES (?1, ?2, ?3, ?4, ?5, 1)",
                    params![patient_id, doctor_id, absence_id, now_ts, expires_ts],
                )?;

                tx.commit()?;
                Ok(UnitOutcome::Cancelled)
            })
            .await
            .map_err(|e| SchedulingError::Database(e.to_string()))
    }
}
