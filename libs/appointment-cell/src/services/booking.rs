use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDateTime, Utc};
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use serde_json::json;
use tracing::info;

use doctor_cell::models::DayOfWeek;
use doctor_cell::services::{AvailabilityService, DoctorService, VisitTypeService};
use shared_database::{encode_ts, AppState, Database, NotificationEvent, OutboxService};
use shared_models::AuthUser;
use triage_cell::{TriageInput, TriageOutcome, TriageService};

use crate::models::{
    Appointment, AppointmentStatus, BookedAppointment, BookingRequest, SchedulingError,
    TriageSnapshot,
};
use crate::services::clinical::ClinicalRecordsService;
use crate::services::interval::Interval;
use crate::services::{busy_intervals_for, iso_local, local_to_utc};

/// A fully validated booking, ready for the transactional committer.
///
/// Built by [`BookingService::book`] for the public surface and by the
/// urgent-request scheduler, which has already pinned doctor and type.
pub(crate) struct BookingCommand {
    pub patient_id: i64,
    pub doctor_id: i64,
    pub appointment_type_id: Option<i64>,
    pub doctor_visit_type_id: Option<i64>,
    pub start: DateTime<Utc>,
    pub duration_minutes: i64,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub triage: Option<(TriageInput, TriageOutcome)>,
}

enum CommitOutcome {
    Conflict,
    Booked {
        appointment: Appointment,
        triage: Option<TriageSnapshot>,
    },
}

/// Patient-facing booking pipeline: validation stages in a fixed order, then
/// a serialized commit that re-checks overlap inside the transaction.
pub struct BookingService {
    db: Database,
    clinic_offset: FixedOffset,
    doctors: DoctorService,
    availability: AvailabilityService,
    visit_types: VisitTypeService,
    clinical: ClinicalRecordsService,
    triage: TriageService,
    outbox: OutboxService,
}

impl BookingService {
    pub fn new(state: &AppState) -> Self {
        Self {
            db: state.db.clone(),
            clinic_offset: state.config.clinic_utc_offset,
            doctors: DoctorService::new(state),
            availability: AvailabilityService::new(state),
            visit_types: VisitTypeService::new(state),
            clinical: ClinicalRecordsService::new(state),
            triage: TriageService::new(state),
            outbox: OutboxService::new(state.db.clone()),
        }
    }

    pub async fn book(
        &self,
        actor: AuthUser,
        request: BookingRequest,
    ) -> Result<BookedAppointment, SchedulingError> {
        if !actor.is_patient() {
            return Err(SchedulingError::Forbidden(
                "Only patients can book appointments.".to_string(),
            ));
        }
        if let Some(input) = &request.triage {
            input.validate()?;
        }
        if !self.doctors.is_doctor(request.doctor_id).await? {
            return Err(SchedulingError::NotFound("Doctor not found.".to_string()));
        }

        let selector = request.selector();
        let resolved = self
            .visit_types
            .resolve_duration(request.doctor_id, selector)
            .await?;

        let start = self.parse_start(&request.date_time)?;
        let end = start + Duration::minutes(resolved.duration_minutes);

        self.check_window(request.doctor_id, start, end).await?;
        self.check_overlap(request.doctor_id, start, end, resolved.duration_minutes)
            .await?;

        if resolved.requires_approved_files
            && self
                .clinical
                .booking_follow_up_block(request.doctor_id, actor.id)
                .await?
                .is_some()
        {
            return Err(SchedulingError::StateConflict(
                "Follow-up booking is blocked until required files are approved.".to_string(),
            ));
        }

        // Score after the cheap gates: the model call is the expensive stage.
        let triage = match &request.triage {
            Some(input) => {
                let outcome = self.triage.assess(input).await?;
                Some((input.clone(), outcome))
            }
            None => None,
        };

        let booked = self
            .commit(BookingCommand {
                patient_id: actor.id,
                doctor_id: request.doctor_id,
                appointment_type_id: selector.appointment_type_id,
                doctor_visit_type_id: selector.doctor_visit_type_id,
                start,
                duration_minutes: resolved.duration_minutes,
                status: AppointmentStatus::Pending,
                notes: request.notes,
                triage,
            })
            .await?;

        self.outbox
            .emit(NotificationEvent {
                event_type: "appointment_created".to_string(),
                actor_id: Some(actor.id),
                recipient_id: Some(booked.appointment.doctor_id),
                entity_type: "appointment".to_string(),
                entity_id: booked.appointment.id,
                route: Some("/app/appointments".to_string()),
                payload: json!({
                    "appointment_id": booked.appointment.id,
                    "status": booked.appointment.status.as_str(),
                    "patient_id": booked.appointment.patient_id,
                    "doctor_id": booked.appointment.doctor_id,
                    "date_time": iso_local(self.clinic_offset, booked.appointment.start_time),
                }),
            })
            .await;

        info!(
            "Booked appointment {} for patient {} with doctor {}",
            booked.appointment.id, booked.appointment.patient_id, booked.appointment.doctor_id
        );
        Ok(booked)
    }

    /// RFC 3339 with an offset, or naive clinic-local wall-clock time.
    pub(crate) fn parse_start(&self, raw: &str) -> Result<DateTime<Utc>, SchedulingError> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Ok(dt.with_timezone(&Utc));
        }
        const NAIVE_FORMATS: [&str; 4] = [
            "%Y-%m-%dT%H:%M:%S",
            "%Y-%m-%dT%H:%M",
            "%Y-%m-%d %H:%M:%S",
            "%Y-%m-%d %H:%M",
        ];
        for format in NAIVE_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
                return Ok(local_to_utc(self.clinic_offset, naive));
            }
        }
        Err(SchedulingError::Validation(
            "Invalid date_time. Use ISO 8601.".to_string(),
        ))
    }

    /// The weekly window for the start's clinic-local weekday must fully
    /// contain `[start, end)`.
    pub(crate) async fn check_window(
        &self,
        doctor_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(), SchedulingError> {
        let date = start.with_timezone(&self.clinic_offset).date_naive();
        let day = DayOfWeek::from(date.weekday());
        let Some((start_t, end_t)) = self.availability.window_for_weekday(doctor_id, day).await?
        else {
            return Err(SchedulingError::AvailabilityConflict(
                "Doctor is not available on this day.".to_string(),
            ));
        };

        let window_start = local_to_utc(self.clinic_offset, date.and_time(start_t));
        let window_end = local_to_utc(self.clinic_offset, date.and_time(end_t));
        if start < window_start || start >= window_end {
            return Err(SchedulingError::AvailabilityConflict(
                "Appointment start time is outside doctor availability.".to_string(),
            ));
        }
        if end > window_end {
            return Err(SchedulingError::AvailabilityConflict(
                "Appointment exceeds doctor availability window.".to_string(),
            ));
        }
        Ok(())
    }

    /// Advisory overlap check against pending/confirmed appointments. The
    /// commit repeats this inside its transaction; failing here just saves
    /// the caller a model call and a write lock.
    pub(crate) async fn check_overlap(
        &self,
        doctor_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        fallback_minutes: i64,
    ) -> Result<(), SchedulingError> {
        let Some(requested) = Interval::new(start, end) else {
            return Err(SchedulingError::Validation("Invalid duration.".to_string()));
        };
        let lookback = start - Duration::days(1);
        let busy = self
            .db
            .call(move |conn| busy_intervals_for(conn, doctor_id, lookback, end, fallback_minutes))
            .await
            .map_err(|e| SchedulingError::Database(e.to_string()))?;

        if busy.iter().any(|interval| interval.overlaps(&requested)) {
            return Err(SchedulingError::AvailabilityConflict(
                "This time slot is already booked.".to_string(),
            ));
        }
        Ok(())
    }

    /// Insert the appointment, its triage snapshot, and consume the best
    /// rebooking token, all inside one immediate transaction. The overlap
    /// re-check under the write lock is what guarantees a single winner when
    /// two bookings race for the same slot.
    pub(crate) async fn commit(
        &self,
        command: BookingCommand,
    ) -> Result<BookedAppointment, SchedulingError> {
        let BookingCommand {
            patient_id,
            doctor_id,
            appointment_type_id,
            doctor_visit_type_id,
            start,
            duration_minutes,
            status,
            notes,
            triage,
        } = command;

        let Some(requested) = Interval::new(start, start + Duration::minutes(duration_minutes))
        else {
            return Err(SchedulingError::Validation("Invalid duration.".to_string()));
        };
        let lookback = start - Duration::days(1);
        let now = Utc::now();
        let now_ts = encode_ts(now);

        let triage_row = triage.map(|(input, outcome)| TriageRow {
            symptoms_text: input.symptoms().map(str::to_string),
            temperature_c: input.temperature_c,
            bp_systolic: input.bp_systolic,
            bp_diastolic: input.bp_diastolic,
            heart_rate: input.heart_rate,
            score: i64::from(outcome.score),
            confidence: i64::from(outcome.confidence),
            missing_json: json!(outcome.missing_fields).to_string(),
            missing_fields: outcome.missing_fields,
            score_version: outcome.score_version,
        });

        let outcome = self
            .db
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

                let busy =
                    busy_intervals_for(&tx, doctor_id, lookback, requested.end(), duration_minutes)?;
                if busy.iter().any(|interval| interval.overlaps(&requested)) {
                    return Ok(CommitOutcome::Conflict);
                }

                tx.execute(
                    "INSERT INTO appointments
                     (patient_id, doctor_id, appointment_type_id, doctor_visit_type_id,
                      start_time, duration_minutes, status, notes, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                    params![
                        patient_id,
                        doctor_id,
                        appointment_type_id,
                        doctor_visit_type_id,
                        encode_ts(start),
                        duration_minutes,
                        status.as_str(),
                        notes,
                        now_ts,
                    ],
                )?;
                let appointment_id = tx.last_insert_rowid();

                let triage = match triage_row {
                    Some(row) => {
                        tx.execute(
                            "INSERT INTO triage_assessments
                             (appointment_id, patient_id, symptoms_text, temperature_c,
                              bp_systolic, bp_diastolic, heart_rate, score, confidence,
                              missing_fields, score_version, created_at)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                            params![
                                appointment_id,
                                patient_id,
                                row.symptoms_text,
                                row.temperature_c,
                                row.bp_systolic,
                                row.bp_diastolic,
                                row.heart_rate,
                                row.score,
                                row.confidence,
                                row.missing_json,
                                row.score_version,
                                now_ts,
                            ],
                        )?;
                        Some(TriageSnapshot {
                            id: tx.last_insert_rowid(),
                            symptoms_text: row.symptoms_text,
                            temperature_c: row.temperature_c,
                            bp_systolic: row.bp_systolic,
                            bp_diastolic: row.bp_diastolic,
                            heart_rate: row.heart_rate,
                            score: row.score,
                            confidence: row.confidence,
                            missing_fields: row.missing_fields,
                            score_version: row.score_version,
                            created_at: now,
                        })
                    }
                    None => None,
                };

                // Soonest-expiring active token for this pair, if any.
                let token_id: Option<i64> = tx
                    .query_row(
                        "SELECT id FROM rebooking_tokens
                         WHERE patient_id = ?1 AND doctor_id = ?2
                           AND is_active = 1 AND expires_at > ?3
                         ORDER BY expires_at ASC, id ASC LIMIT 1",
                        params![patient_id, doctor_id, now_ts],
                        |row| row.get(0),
                    )
                    .optional()?;
                if let Some(token_id) = token_id {
                    tx.execute(
                        "UPDATE rebooking_tokens
                         SET is_active = 0, consumed_at = ?1, consumed_appointment_id = ?2
                         WHERE id = ?3",
                        params![now_ts, appointment_id, token_id],
                    )?;
                }

                tx.commit()?;
                Ok(CommitOutcome::Booked {
                    appointment: Appointment {
                        id: appointment_id,
                        patient_id,
                        doctor_id,
                        appointment_type_id,
                        doctor_visit_type_id,
                        start_time: start,
                        duration_minutes: Some(duration_minutes),
                        status,
                        notes,
                        created_at: now,
                        updated_at: now,
                    },
                    triage,
                })
            })
            .await
            .map_err(|e| SchedulingError::Database(e.to_string()))?;

        match outcome {
            CommitOutcome::Conflict => Err(SchedulingError::AvailabilityConflict(
                "This time slot is already booked.".to_string(),
            )),
            CommitOutcome::Booked { appointment, triage } => {
                Ok(BookedAppointment { appointment, triage })
            }
        }
    }
}

struct TriageRow {
    symptoms_text: Option<String>,
    temperature_c: Option<f64>,
    bp_systolic: Option<i64>,
    bp_diastolic: Option<i64>,
    heart_rate: Option<i64>,
    score: i64,
    confidence: i64,
    missing_json: String,
    missing_fields: Vec<String>,
    score_version: String,
}
