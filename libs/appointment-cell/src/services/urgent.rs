use chrono::{Duration, FixedOffset, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension};
use serde_json::json;
use tracing::{debug, info};

use doctor_cell::models::VisitTypeSelector;
use doctor_cell::services::{DoctorService, VisitTypeService};
use shared_database::{encode_ts, ts_from_sql, AppState, Database, NotificationEvent, OutboxService};
use shared_models::AuthUser;
use triage_cell::{TriageInput, TriageOutcome, TriageService, SCORE_VERSION_V1};

use crate::models::{
    AppointmentStatus, BookedAppointment, CreateUrgentRequest, RejectUrgentRequest,
    ScheduleUrgentRequest, SchedulingError, UrgentHandledType, UrgentListQuery, UrgentRequest,
    UrgentRequestStatus,
};
use crate::services::booking::{BookingCommand, BookingService};
use crate::services::iso_local;

const URGENT_COLUMNS: &str =
    "id, patient_id, doctor_id, appointment_type_id, symptoms_text, temperature_c, \
     bp_systolic, bp_diastolic, heart_rate, score, confidence, missing_fields, \
     score_version, notes, status, handled_type, handled_by, rejected_reason, \
     scheduled_appointment_id, created_at, handled_at";

fn urgent_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UrgentRequest> {
    let status_raw: String = row.get(14)?;
    let status = UrgentRequestStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            14,
            rusqlite::types::Type::Text,
            format!("unknown urgent request status {status_raw:?}").into(),
        )
    })?;
    let handled_raw: Option<String> = row.get(15)?;
    let handled_type = match handled_raw {
        Some(raw) => Some(UrgentHandledType::parse(&raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                15,
                rusqlite::types::Type::Text,
                format!("unknown handled type {raw:?}").into(),
            )
        })?),
        None => None,
    };
    let missing_raw: String = row.get(11)?;
    let handled_at: Option<String> = row.get(20)?;
    Ok(UrgentRequest {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        doctor_id: row.get(2)?,
        appointment_type_id: row.get(3)?,
        symptoms_text: row.get(4)?,
        temperature_c: row.get(5)?,
        bp_systolic: row.get(6)?,
        bp_diastolic: row.get(7)?,
        heart_rate: row.get(8)?,
        score: row.get(9)?,
        confidence: row.get(10)?,
        missing_fields: serde_json::from_str(&missing_raw).unwrap_or_default(),
        score_version: row.get(12)?,
        notes: row.get(13)?,
        status,
        handled_type,
        handled_by: row.get(16)?,
        rejected_reason: row.get(17)?,
        scheduled_appointment_id: row.get(18)?,
        created_at: ts_from_sql(row.get(19)?)?,
        handled_at: match handled_at {
            Some(raw) => Some(ts_from_sql(raw)?),
            None => None,
        },
    })
}

/// Urgent-request waitlist: patients raise them, doctors resolve them by
/// scheduling or rejecting. Scheduling reuses the booking committer with the
/// stored triage snapshot, so the resulting appointment looks exactly like a
/// directly booked one.
pub struct UrgentRequestService {
    db: Database,
    clinic_offset: FixedOffset,
    doctors: DoctorService,
    visit_types: VisitTypeService,
    triage: TriageService,
    booking: BookingService,
    outbox: OutboxService,
}

impl UrgentRequestService {
    pub fn new(state: &AppState) -> Self {
        Self {
            db: state.db.clone(),
            clinic_offset: state.config.clinic_utc_offset,
            doctors: DoctorService::new(state),
            visit_types: VisitTypeService::new(state),
            triage: TriageService::new(state),
            booking: BookingService::new(state),
            outbox: OutboxService::new(state.db.clone()),
        }
    }

    pub async fn create(
        &self,
        actor: AuthUser,
        request: CreateUrgentRequest,
    ) -> Result<UrgentRequest, SchedulingError> {
        if !actor.is_patient() {
            return Err(SchedulingError::Forbidden(
                "Only patients can create urgent requests.".to_string(),
            ));
        }
        let input = request.triage.clone().unwrap_or_default();
        input.validate()?;
        if !self.doctors.is_doctor(request.doctor_id).await? {
            return Err(SchedulingError::NotFound("Doctor not found.".to_string()));
        }
        // The target type must be bookable for this doctor before the request
        // enters the queue.
        self.visit_types
            .resolve_duration(
                request.doctor_id,
                VisitTypeSelector::shared(request.appointment_type_id),
            )
            .await?;

        let outcome = self.triage.assess(&input).await?;

        let now = Utc::now();
        let now_ts = encode_ts(now);
        let patient_id = actor.id;
        let doctor_id = request.doctor_id;
        let type_id = request.appointment_type_id;
        let symptoms = input.symptoms().map(str::to_string);
        let temperature_c = input.temperature_c;
        let bp_systolic = input.bp_systolic;
        let bp_diastolic = input.bp_diastolic;
        let heart_rate = input.heart_rate;
        let score = i64::from(outcome.score);
        let confidence = i64::from(outcome.confidence);
        let missing_json = json!(outcome.missing_fields).to_string();

        let symptoms_row = symptoms.clone();
        let score_version_row = outcome.score_version.clone();
        let notes_row = request.notes.clone();
        let id = self
            .db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO urgent_requests
                     (patient_id, doctor_id, appointment_type_id, symptoms_text, temperature_c,
                      bp_systolic, bp_diastolic, heart_rate, score, confidence, missing_fields,
                      score_version, notes, status, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 'open', ?14)",
                    params![
                        patient_id,
                        doctor_id,
                        type_id,
                        symptoms_row,
                        temperature_c,
                        bp_systolic,
                        bp_diastolic,
                        heart_rate,
                        score,
                        confidence,
                        missing_json,
                        score_version_row,
                        notes_row,
                        now_ts,
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(|e| SchedulingError::Database(e.to_string()))?;

        let created = UrgentRequest {
            id,
            patient_id,
            doctor_id,
            appointment_type_id: type_id,
            symptoms_text: symptoms,
            temperature_c,
            bp_systolic,
            bp_diastolic,
            heart_rate,
            score: Some(score),
            confidence: Some(confidence),
            missing_fields: outcome.missing_fields,
            score_version: Some(outcome.score_version),
            notes: request.notes,
            status: UrgentRequestStatus::Open,
            handled_type: None,
            handled_by: None,
            rejected_reason: None,
            scheduled_appointment_id: None,
            created_at: now,
            handled_at: None,
        };

        self.outbox
            .emit(NotificationEvent {
                event_type: "urgent_request_created".to_string(),
                actor_id: Some(patient_id),
                recipient_id: Some(doctor_id),
                entity_type: "urgent_request".to_string(),
                entity_id: created.id,
                route: Some("/app/urgent-requests".to_string()),
                payload: json!({
                    "urgent_request_id": created.id,
                    "patient_id": patient_id,
                    "doctor_id": doctor_id,
                    "score": score,
                }),
            })
            .await;

        info!(
            "Created urgent request {} for patient {} with doctor {} (score {})",
            created.id, patient_id, doctor_id, score
        );
        Ok(created)
    }

    /// A doctor's queue defaults to open requests; patients see all of their
    /// own. `status=all` lifts the filter, an unknown status yields nothing.
    pub async fn list_for_caller(
        &self,
        actor: AuthUser,
        query: UrgentListQuery,
    ) -> Result<Vec<UrgentRequest>, SchedulingError> {
        let (owner_clause, default_all) = if actor.is_doctor() {
            ("doctor_id = ?", false)
        } else if actor.is_patient() {
            ("patient_id = ?", true)
        } else {
            return Ok(Vec::new());
        };

        let status_filter = match query.status.as_deref().filter(|s| !s.is_empty()) {
            None => {
                if default_all {
                    None
                } else {
                    Some(UrgentRequestStatus::Open)
                }
            }
            Some("all") => None,
            Some(raw) => match UrgentRequestStatus::parse(raw) {
                Some(status) => Some(status),
                None => return Ok(Vec::new()),
            },
        };

        let mut sql = format!("SELECT {URGENT_COLUMNS} FROM urgent_requests WHERE {owner_clause}");
        let mut params_list: Vec<Value> = vec![actor.id.into()];
        if let Some(status) = status_filter {
            sql.push_str(" AND status = ?");
            params_list.push(status.as_str().to_string().into());
        }
        sql.push_str(" ORDER BY created_at DESC");

        let rows = self
            .db
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params_from_iter(params_list), urgent_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>();
                rows
            })
            .await
            .map_err(|e| SchedulingError::Database(e.to_string()))?;

        debug!(
            "Listed {} urgent requests for {} {}",
            rows.len(),
            actor.role.as_str(),
            actor.id
        );
        Ok(rows)
    }

    pub async fn reject(
        &self,
        actor: AuthUser,
        urgent_id: i64,
        request: RejectUrgentRequest,
    ) -> Result<UrgentRequest, SchedulingError> {
        let row = self.fetch_for_handler(actor, urgent_id).await?;
        if row.status != UrgentRequestStatus::Open {
            return Err(SchedulingError::StateConflict(
                "Only open urgent requests can be rejected.".to_string(),
            ));
        }

        let now = Utc::now();
        let now_ts = encode_ts(now);
        let actor_id = actor.id;
        let reason = request.reason;
        let reason_row = reason.clone();
        self.db
            .call(move |conn| {
                conn.execute(
                    "UPDATE urgent_requests
                     SET status = 'rejected', handled_type = 'rejected', handled_by = ?1,
                         rejected_reason = ?2, handled_at = ?3
                     WHERE id = ?4",
                    params![actor_id, reason_row, now_ts, urgent_id],
                )
                .map(|_| ())
            })
            .await
            .map_err(|e| SchedulingError::Database(e.to_string()))?;

        let mut updated = row;
        updated.status = UrgentRequestStatus::Rejected;
        updated.handled_type = Some(UrgentHandledType::Rejected);
        updated.handled_by = Some(actor.id);
        updated.rejected_reason = reason;
        updated.handled_at = Some(now);

        self.outbox
            .emit(NotificationEvent {
                event_type: "urgent_request_rejected".to_string(),
                actor_id: Some(actor.id),
                recipient_id: Some(updated.patient_id),
                entity_type: "urgent_request".to_string(),
                entity_id: updated.id,
                route: Some("/app/urgent-requests".to_string()),
                payload: json!({
                    "urgent_request_id": updated.id,
                    "patient_id": updated.patient_id,
                    "doctor_id": updated.doctor_id,
                    "reason": updated.rejected_reason,
                }),
            })
            .await;

        info!("Rejected urgent request {}", updated.id);
        Ok(updated)
    }

    /// Turn an open request into a confirmed appointment at the given time.
    ///
    /// The slot still has to clear the availability window and overlap
    /// checks; the stored triage snapshot rides along to the appointment,
    /// with no fresh model call.
    pub async fn schedule(
        &self,
        actor: AuthUser,
        urgent_id: i64,
        request: ScheduleUrgentRequest,
    ) -> Result<(UrgentRequest, BookedAppointment), SchedulingError> {
        let row = self.fetch_for_handler(actor, urgent_id).await?;
        if row.status != UrgentRequestStatus::Open {
            return Err(SchedulingError::StateConflict(
                "Only open urgent requests can be scheduled.".to_string(),
            ));
        }

        let start = self.booking.parse_start(&request.date_time)?;
        let resolved = self
            .visit_types
            .resolve_duration(
                row.doctor_id,
                VisitTypeSelector::shared(row.appointment_type_id),
            )
            .await?;
        let end = start + Duration::minutes(resolved.duration_minutes);
        self.booking.check_window(row.doctor_id, start, end).await?;
        self.booking
            .check_overlap(row.doctor_id, start, end, resolved.duration_minutes)
            .await?;

        let triage = row.score.map(|score| {
            (
                TriageInput {
                    symptoms_text: row.symptoms_text.clone(),
                    temperature_c: row.temperature_c,
                    bp_systolic: row.bp_systolic,
                    bp_diastolic: row.bp_diastolic,
                    heart_rate: row.heart_rate,
                },
                TriageOutcome {
                    score: score as u8,
                    confidence: row.confidence.unwrap_or(0) as u8,
                    missing_fields: row.missing_fields.clone(),
                    score_version: row
                        .score_version
                        .clone()
                        .unwrap_or_else(|| SCORE_VERSION_V1.to_string()),
                },
            )
        });

        let booked = self
            .booking
            .commit(BookingCommand {
                patient_id: row.patient_id,
                doctor_id: row.doctor_id,
                appointment_type_id: Some(row.appointment_type_id),
                doctor_visit_type_id: None,
                start,
                duration_minutes: resolved.duration_minutes,
                status: AppointmentStatus::Confirmed,
                notes: None,
                triage,
            })
            .await?;

        let now = Utc::now();
        let now_ts = encode_ts(now);
        let actor_id = actor.id;
        let appointment_id = booked.appointment.id;
        self.db
            .call(move |conn| {
                conn.execute(
                    "UPDATE urgent_requests
                     SET status = 'handled', handled_type = 'scheduled', handled_by = ?1,
                         scheduled_appointment_id = ?2, handled_at = ?3
                     WHERE id = ?4",
                    params![actor_id, appointment_id, now_ts, urgent_id],
                )
                .map(|_| ())
            })
            .await
            .map_err(|e| SchedulingError::Database(e.to_string()))?;

        let mut updated = row;
        updated.status = UrgentRequestStatus::Handled;
        updated.handled_type = Some(UrgentHandledType::Scheduled);
        updated.handled_by = Some(actor.id);
        updated.scheduled_appointment_id = Some(appointment_id);
        updated.handled_at = Some(now);

        self.outbox
            .emit(NotificationEvent {
                event_type: "urgent_request_scheduled".to_string(),
                actor_id: Some(actor.id),
                recipient_id: Some(updated.patient_id),
                entity_type: "urgent_request".to_string(),
                entity_id: updated.id,
                route: Some("/app/urgent-requests".to_string()),
                payload: json!({
                    "urgent_request_id": updated.id,
                    "appointment_id": appointment_id,
                    "patient_id": updated.patient_id,
                    "doctor_id": updated.doctor_id,
                    "date_time": iso_local(self.clinic_offset, booked.appointment.start_time),
                }),
            })
            .await;

        info!(
            "Scheduled urgent request {} as appointment {}",
            updated.id, appointment_id
        );
        Ok((updated, booked))
    }

    pub async fn cancel(
        &self,
        actor: AuthUser,
        urgent_id: i64,
    ) -> Result<UrgentRequest, SchedulingError> {
        let row = self
            .fetch(urgent_id)
            .await?
            .ok_or_else(|| SchedulingError::NotFound("Not found.".to_string()))?;
        if !(actor.is_patient() && row.patient_id == actor.id) {
            return Err(SchedulingError::NotFound("Not found.".to_string()));
        }
        if row.status != UrgentRequestStatus::Open {
            return Err(SchedulingError::StateConflict(
                "Only open urgent requests can be cancelled.".to_string(),
            ));
        }

        self.db
            .call(move |conn| {
                conn.execute(
                    "UPDATE urgent_requests SET status = 'cancelled' WHERE id = ?1",
                    params![urgent_id],
                )
                .map(|_| ())
            })
            .await
            .map_err(|e| SchedulingError::Database(e.to_string()))?;

        let mut updated = row;
        updated.status = UrgentRequestStatus::Cancelled;

        self.outbox
            .emit(NotificationEvent {
                event_type: "urgent_request_cancelled".to_string(),
                actor_id: Some(actor.id),
                recipient_id: Some(updated.doctor_id),
                entity_type: "urgent_request".to_string(),
                entity_id: updated.id,
                route: Some("/app/urgent-requests".to_string()),
                payload: json!({
                    "urgent_request_id": updated.id,
                    "patient_id": updated.patient_id,
                    "doctor_id": updated.doctor_id,
                }),
            })
            .await;

        info!("Cancelled urgent request {}", updated.id);
        Ok(updated)
    }

    async fn fetch(&self, urgent_id: i64) -> Result<Option<UrgentRequest>, SchedulingError> {
        self.db
            .call(move |conn| {
                conn.query_row(
                    &format!("SELECT {URGENT_COLUMNS} FROM urgent_requests WHERE id = ?1"),
                    params![urgent_id],
                    urgent_from_row,
                )
                .optional()
            })
            .await
            .map_err(|e| SchedulingError::Database(e.to_string()))
    }

    /// Reject and schedule are doctor-or-admin surfaces; anyone else learns
    /// nothing beyond not-found.
    async fn fetch_for_handler(
        &self,
        actor: AuthUser,
        urgent_id: i64,
    ) -> Result<UrgentRequest, SchedulingError> {
        let row = self
            .fetch(urgent_id)
            .await?
            .ok_or_else(|| SchedulingError::NotFound("Not found.".to_string()))?;
        if !(actor.is_admin() || (actor.is_doctor() && row.doctor_id == actor.id)) {
            return Err(SchedulingError::NotFound("Not found.".to_string()));
        }
        Ok(row)
    }
}
