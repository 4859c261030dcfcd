use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension};
use serde_json::json;
use tracing::{debug, info};

use shared_database::{encode_ts, ts_from_sql, AppState, Database, NotificationEvent, OutboxService};
use shared_models::AuthUser;

use crate::models::{
    Appointment, AppointmentListing, AppointmentStatus, MyAppointmentsQuery, SchedulingError,
    TriageSnapshot,
};
use crate::services::clinical::{ClinicalRecordsService, FollowUpBlock};
use crate::services::{appointment_from_row, iso_local, local_to_utc, APPOINTMENT_COLUMNS};

/// Listing row: the appointment columns first (so [`appointment_from_row`]
/// applies unchanged), then display names, order flags, and the triage join.
const LISTING_SELECT: &str = "\
    SELECT a.id, a.patient_id, a.doctor_id, a.appointment_type_id, a.doctor_visit_type_id, \
           a.start_time, a.duration_minutes, a.status, a.notes, a.created_at, a.updated_at, \
           pu.full_name, du.full_name, COALESCE(apt.type_name, dvt.name), \
           EXISTS (SELECT 1 FROM clinical_orders co WHERE co.appointment_id = a.id), \
           EXISTS (SELECT 1 FROM clinical_orders co \
                   WHERE co.appointment_id = a.id AND co.status = 'open'), \
           t.id, t.symptoms_text, t.temperature_c, t.bp_systolic, t.bp_diastolic, \
           t.heart_rate, t.score, t.confidence, t.missing_fields, t.score_version, t.created_at \
    FROM appointments a \
    JOIN users pu ON pu.id = a.patient_id \
    JOIN users du ON du.id = a.doctor_id \
    LEFT JOIN appointment_types apt ON apt.id = a.appointment_type_id \
    LEFT JOIN doctor_visit_types dvt ON dvt.id = a.doctor_visit_type_id \
    LEFT JOIN triage_assessments t ON t.appointment_id = a.id";

fn listing_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AppointmentListing> {
    let appointment = appointment_from_row(row)?;
    let triage = match row.get::<_, Option<i64>>(16)? {
        Some(id) => {
            let missing_raw: String = row.get(24)?;
            Some(TriageSnapshot {
                id,
                symptoms_text: row.get(17)?,
                temperature_c: row.get(18)?,
                bp_systolic: row.get(19)?,
                bp_diastolic: row.get(20)?,
                heart_rate: row.get(21)?,
                score: row.get(22)?,
                confidence: row.get::<_, Option<i64>>(23)?.unwrap_or(0),
                missing_fields: serde_json::from_str(&missing_raw).unwrap_or_default(),
                score_version: row.get(25)?,
                created_at: ts_from_sql(row.get(26)?)?,
            })
        }
        None => None,
    };
    Ok(AppointmentListing {
        appointment,
        patient_name: row.get(11)?,
        doctor_name: row.get(12)?,
        type_name: row.get(13)?,
        has_any_orders: row.get(14)?,
        has_open_orders: row.get(15)?,
        triage,
    })
}

/// Result of a confirm/cancel/no-show call. `changed` is false for the
/// idempotent repeats, which also emit no notification.
#[derive(Debug)]
pub struct TransitionOutcome {
    pub appointment: Appointment,
    pub changed: bool,
}

/// Status transitions and the my-appointments listing.
///
/// Authorization failures and missing rows are indistinguishable on purpose:
/// both surface as a plain not-found.
pub struct LifecycleService {
    db: Database,
    clinic_offset: FixedOffset,
    clinical: ClinicalRecordsService,
    outbox: OutboxService,
}

impl LifecycleService {
    pub fn new(state: &AppState) -> Self {
        Self {
            db: state.db.clone(),
            clinic_offset: state.config.clinic_utc_offset,
            clinical: ClinicalRecordsService::new(state),
            outbox: OutboxService::new(state.db.clone()),
        }
    }

    pub async fn get_listing(
        &self,
        actor: AuthUser,
        appointment_id: i64,
    ) -> Result<AppointmentListing, SchedulingError> {
        let listing = self
            .db
            .call(move |conn| {
                conn.query_row(
                    &format!("{LISTING_SELECT} WHERE a.id = ?1"),
                    params![appointment_id],
                    listing_from_row,
                )
                .optional()
            })
            .await
            .map_err(|e| SchedulingError::Database(e.to_string()))?
            .ok_or_else(|| SchedulingError::NotFound("Not found.".to_string()))?;

        let appointment = &listing.appointment;
        let allowed = actor.is_admin()
            || (actor.is_patient() && appointment.patient_id == actor.id)
            || (actor.is_doctor() && appointment.doctor_id == actor.id);
        if !allowed {
            return Err(SchedulingError::NotFound("Not found.".to_string()));
        }
        Ok(listing)
    }

    /// The caller's own appointments, newest first, capped at 200 rows.
    ///
    /// An unknown status value yields an empty listing rather than an error;
    /// an unknown time filter is rejected. Date filters are clinic-local
    /// whole days.
    pub async fn my_appointments(
        &self,
        actor: AuthUser,
        query: MyAppointmentsQuery,
    ) -> Result<Vec<AppointmentListing>, SchedulingError> {
        let mut clauses: Vec<&'static str> = Vec::new();
        let mut params_list: Vec<Value> = Vec::new();

        if actor.is_patient() {
            clauses.push("a.patient_id = ?");
            params_list.push(actor.id.into());
        } else if actor.is_doctor() {
            clauses.push("a.doctor_id = ?");
            params_list.push(actor.id.into());
        } else {
            return Ok(Vec::new());
        }

        if let Some(status) = query.status.as_deref().filter(|s| !s.is_empty()) {
            if AppointmentStatus::parse(status).is_none() {
                return Ok(Vec::new());
            }
            clauses.push("a.status = ?");
            params_list.push(status.to_string().into());
        }

        let now = Utc::now();
        match query.time.as_deref() {
            None | Some("upcoming") => {
                clauses.push("a.start_time >= ?");
                params_list.push(encode_ts(now).into());
            }
            Some("past") => {
                clauses.push("a.start_time < ?");
                params_list.push(encode_ts(now).into());
            }
            Some("all") => {}
            Some(_) => {
                return Err(SchedulingError::Validation(
                    "Invalid time filter. Use time=upcoming|past|all".to_string(),
                ));
            }
        }

        let today = now.with_timezone(&self.clinic_offset).date_naive();
        match query.preset.as_deref() {
            Some("today") => {
                self.push_day_range(&mut clauses, &mut params_list, today, today);
            }
            Some("next7") => {
                self.push_day_range(&mut clauses, &mut params_list, today, today + Duration::days(7));
            }
            Some("day") => {
                let Some(raw) = query.date.as_deref().filter(|s| !s.is_empty()) else {
                    return Err(SchedulingError::Validation(
                        "Missing date. Use ?preset=day&date=YYYY-MM-DD".to_string(),
                    ));
                };
                let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
                    SchedulingError::Validation("Invalid date. Use YYYY-MM-DD.".to_string())
                })?;
                self.push_day_range(&mut clauses, &mut params_list, date, date);
            }
            _ => {
                if let Some(raw) = query.from.as_deref().filter(|s| !s.is_empty()) {
                    let from = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
                        SchedulingError::Validation("Invalid from date. Use YYYY-MM-DD.".to_string())
                    })?;
                    clauses.push("a.start_time >= ?");
                    params_list.push(encode_ts(self.local_day_start(from)).into());
                }
                if let Some(raw) = query.to.as_deref().filter(|s| !s.is_empty()) {
                    let to = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
                        SchedulingError::Validation("Invalid to date. Use YYYY-MM-DD.".to_string())
                    })?;
                    clauses.push("a.start_time < ?");
                    params_list.push(encode_ts(self.local_day_start(to + Duration::days(1))).into());
                }
            }
        }

        let sql = format!(
            "{LISTING_SELECT} WHERE {} ORDER BY a.start_time DESC LIMIT 200",
            clauses.join(" AND ")
        );
        let listings = self
            .db
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params_from_iter(params_list), listing_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>();
                rows
            })
            .await
            .map_err(|e| SchedulingError::Database(e.to_string()))?;

        debug!(
            "Listed {} appointments for {} {}",
            listings.len(),
            actor.role.as_str(),
            actor.id
        );
        Ok(listings)
    }

    pub async fn confirm(
        &self,
        actor: AuthUser,
        appointment_id: i64,
    ) -> Result<TransitionOutcome, SchedulingError> {
        let appointment = self
            .fetch_authorized(appointment_id, |appt| {
                actor.is_admin() || (actor.is_doctor() && appt.doctor_id == actor.id)
            })
            .await?;

        match appointment.status {
            AppointmentStatus::Cancelled | AppointmentStatus::NoShow => {
                return Err(SchedulingError::StateConflict(
                    "This appointment cannot be confirmed.".to_string(),
                ));
            }
            AppointmentStatus::Confirmed => {
                return Ok(TransitionOutcome {
                    appointment,
                    changed: false,
                });
            }
            AppointmentStatus::Pending => {}
        }

        if self.requires_approved_files(&appointment).await? {
            if let Some(block) = self
                .clinical
                .confirm_follow_up_block(appointment.doctor_id, appointment.patient_id)
                .await?
            {
                return Err(match block {
                    FollowUpBlock::MissingFiles { order_id } => SchedulingError::FollowUpBlocked {
                        message: "Cannot confirm follow-up: missing required files.".to_string(),
                        order_id,
                    },
                    FollowUpBlock::UnapprovedFiles { order_id } => {
                        SchedulingError::FollowUpBlocked {
                            message: "Cannot confirm follow-up: some files are not approved yet."
                                .to_string(),
                            order_id,
                        }
                    }
                    FollowUpBlock::NoOpenOrders => {
                        unreachable!("confirm gate only reports file blocks")
                    }
                });
            }
        }

        let updated = self
            .apply_status(appointment, AppointmentStatus::Confirmed)
            .await?;
        self.outbox
            .emit(NotificationEvent {
                event_type: "appointment_confirmed".to_string(),
                actor_id: Some(actor.id),
                recipient_id: Some(updated.patient_id),
                entity_type: "appointment".to_string(),
                entity_id: updated.id,
                route: Some("/app/appointments".to_string()),
                payload: self.transition_payload(&updated),
            })
            .await;

        info!("Confirmed appointment {}", updated.id);
        Ok(TransitionOutcome {
            appointment: updated,
            changed: true,
        })
    }

    pub async fn cancel(
        &self,
        actor: AuthUser,
        appointment_id: i64,
    ) -> Result<TransitionOutcome, SchedulingError> {
        let appointment = self
            .fetch_authorized(appointment_id, |appt| {
                actor.is_admin()
                    || (actor.is_patient() && appt.patient_id == actor.id)
                    || (actor.is_doctor() && appt.doctor_id == actor.id)
            })
            .await?;

        match appointment.status {
            AppointmentStatus::NoShow => {
                return Err(SchedulingError::StateConflict(
                    "no_show appointments cannot be cancelled.".to_string(),
                ));
            }
            AppointmentStatus::Cancelled => {
                return Ok(TransitionOutcome {
                    appointment,
                    changed: false,
                });
            }
            AppointmentStatus::Pending | AppointmentStatus::Confirmed => {}
        }

        if self.clinical.locks_cancellation(appointment.id).await? {
            return Err(SchedulingError::StateConflict(
                "Cannot cancel appointment after clinical actions were recorded.".to_string(),
            ));
        }

        let updated = self
            .apply_status(appointment, AppointmentStatus::Cancelled)
            .await?;

        let mut payload = self.transition_payload(&updated);
        payload["cancelled_by_role"] = json!(actor.role.as_str());
        // The other side always hears about it; an admin cancel tells both.
        let recipients: Vec<i64> = if actor.is_admin() {
            vec![updated.patient_id, updated.doctor_id]
        } else if actor.is_doctor() {
            vec![updated.patient_id]
        } else {
            vec![updated.doctor_id]
        };
        for recipient in recipients {
            self.outbox
                .emit(NotificationEvent {
                    event_type: "appointment_cancelled".to_string(),
                    actor_id: Some(actor.id),
                    recipient_id: Some(recipient),
                    entity_type: "appointment".to_string(),
                    entity_id: updated.id,
                    route: Some("/app/appointments".to_string()),
                    payload: payload.clone(),
                })
                .await;
        }

        info!(
            "Cancelled appointment {} by {} {}",
            updated.id,
            actor.role.as_str(),
            actor.id
        );
        Ok(TransitionOutcome {
            appointment: updated,
            changed: true,
        })
    }

    pub async fn mark_no_show(
        &self,
        actor: AuthUser,
        appointment_id: i64,
    ) -> Result<TransitionOutcome, SchedulingError> {
        let appointment = self
            .fetch_authorized(appointment_id, |appt| {
                actor.is_doctor() && appt.doctor_id == actor.id
            })
            .await?;

        match appointment.status {
            AppointmentStatus::Cancelled => {
                return Err(SchedulingError::StateConflict(
                    "Cancelled appointments cannot be marked as no_show.".to_string(),
                ));
            }
            AppointmentStatus::NoShow => {
                return Ok(TransitionOutcome {
                    appointment,
                    changed: false,
                });
            }
            AppointmentStatus::Pending => {
                return Err(SchedulingError::StateConflict(
                    "Only confirmed appointments can be marked as no_show.".to_string(),
                ));
            }
            AppointmentStatus::Confirmed => {}
        }

        if appointment.end_time() > Utc::now() {
            return Err(SchedulingError::StateConflict(
                "Appointment has not ended yet.".to_string(),
            ));
        }
        if self.clinical.locks_no_show(appointment.id).await? {
            return Err(SchedulingError::StateConflict(
                "Cannot mark no_show after clinical actions were recorded.".to_string(),
            ));
        }

        let updated = self
            .apply_status(appointment, AppointmentStatus::NoShow)
            .await?;
        self.outbox
            .emit(NotificationEvent {
                event_type: "appointment_no_show".to_string(),
                actor_id: Some(actor.id),
                recipient_id: Some(updated.patient_id),
                entity_type: "appointment".to_string(),
                entity_id: updated.id,
                route: Some("/app/appointments".to_string()),
                payload: self.transition_payload(&updated),
            })
            .await;

        info!("Marked appointment {} as no_show", updated.id);
        Ok(TransitionOutcome {
            appointment: updated,
            changed: true,
        })
    }

    async fn fetch_authorized<F>(
        &self,
        appointment_id: i64,
        allowed: F,
    ) -> Result<Appointment, SchedulingError>
    where
        F: FnOnce(&Appointment) -> bool,
    {
        let appointment = self
            .db
            .call(move |conn| {
                conn.query_row(
                    &format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = ?1"),
                    params![appointment_id],
                    appointment_from_row,
                )
                .optional()
            })
            .await
            .map_err(|e| SchedulingError::Database(e.to_string()))?
            .ok_or_else(|| SchedulingError::NotFound("Not found.".to_string()))?;

        if !allowed(&appointment) {
            return Err(SchedulingError::NotFound("Not found.".to_string()));
        }
        Ok(appointment)
    }

    /// Doctor-private visit types never carry the follow-up flag.
    async fn requires_approved_files(
        &self,
        appointment: &Appointment,
    ) -> Result<bool, SchedulingError> {
        let Some(type_id) = appointment.appointment_type_id else {
            return Ok(false);
        };
        self.db
            .call(move |conn| {
                conn.query_row(
                    "SELECT requires_approved_files FROM appointment_types WHERE id = ?1",
                    params![type_id],
                    |row| row.get(0),
                )
                .optional()
                .map(|flag| flag.unwrap_or(false))
            })
            .await
            .map_err(|e| SchedulingError::Database(e.to_string()))
    }

    async fn apply_status(
        &self,
        mut appointment: Appointment,
        status: AppointmentStatus,
    ) -> Result<Appointment, SchedulingError> {
        let now = Utc::now();
        let now_ts = encode_ts(now);
        let appointment_id = appointment.id;
        self.db
            .call(move |conn| {
                conn.execute(
                    "UPDATE appointments SET status = ?1, updated_at = ?2 WHERE id = ?3",
                    params![status.as_str(), now_ts, appointment_id],
                )
                .map(|_| ())
            })
            .await
            .map_err(|e| SchedulingError::Database(e.to_string()))?;

        appointment.status = status;
        appointment.updated_at = now;
        Ok(appointment)
    }

    fn transition_payload(&self, appointment: &Appointment) -> serde_json::Value {
        json!({
            "appointment_id": appointment.id,
            "status": appointment.status.as_str(),
            "patient_id": appointment.patient_id,
            "doctor_id": appointment.doctor_id,
            "date_time": iso_local(self.clinic_offset, appointment.start_time),
        })
    }

    fn push_day_range(
        &self,
        clauses: &mut Vec<&'static str>,
        params_list: &mut Vec<Value>,
        first: NaiveDate,
        last: NaiveDate,
    ) {
        clauses.push("a.start_time >= ?");
        params_list.push(encode_ts(self.local_day_start(first)).into());
        clauses.push("a.start_time < ?");
        params_list.push(encode_ts(self.local_day_start(last + Duration::days(1))).into());
    }

    fn local_day_start(&self, date: NaiveDate) -> DateTime<Utc> {
        local_to_utc(self.clinic_offset, date.and_time(NaiveTime::MIN))
    }
}
