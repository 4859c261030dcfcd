use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::FixedOffset;
use serde_json::{json, Value};

use shared_database::AppState;
use shared_models::auth::AuthUser;

use crate::models::{
    Appointment, AppointmentListing, BookingRequest, CreateUrgentRequest, EmergencyAbsenceRequest,
    MyAppointmentsQuery, RejectUrgentRequest, ScheduleUrgentRequest, SchedulingError, SlotQuery,
    SlotRangeQuery, TriageSnapshot, UrgentRequest,
};
use crate::models::UrgentListQuery;
use crate::services::{
    iso_local, BookingService, CascadeService, LifecycleService, SlotService, UrgentRequestService,
};

// ==============================================================================
// RESPONSE PAYLOADS
// ==============================================================================

fn triage_payload(snapshot: &TriageSnapshot) -> Value {
    json!({
        "id": snapshot.id,
        "symptoms_text": snapshot.symptoms_text,
        "temperature_c": snapshot.temperature_c,
        "bp_systolic": snapshot.bp_systolic,
        "bp_diastolic": snapshot.bp_diastolic,
        "heart_rate": snapshot.heart_rate,
        "score": snapshot.score,
        "confidence": snapshot.confidence,
        "missing_fields": snapshot.missing_fields,
        "score_version": snapshot.score_version,
    })
}

/// Date-times go out in the clinic's offset, matching what patients see on
/// the booking screen.
fn appointment_payload(
    offset: FixedOffset,
    appointment: &Appointment,
    triage: Option<&TriageSnapshot>,
) -> Value {
    json!({
        "id": appointment.id,
        "patient_id": appointment.patient_id,
        "doctor_id": appointment.doctor_id,
        "appointment_type_id": appointment.appointment_type_id,
        "doctor_specific_visit_type_id": appointment.doctor_visit_type_id,
        "date_time": iso_local(offset, appointment.start_time),
        "duration_minutes": appointment.duration_minutes,
        "status": appointment.status.as_str(),
        "notes": appointment.notes,
        "created_at": iso_local(offset, appointment.created_at),
        "triage": triage.map(triage_payload),
    })
}

fn listing_payload(offset: FixedOffset, listing: &AppointmentListing) -> Value {
    let appointment = &listing.appointment;
    json!({
        "id": appointment.id,
        "patient_id": appointment.patient_id,
        "doctor_id": appointment.doctor_id,
        "patient_name": listing.patient_name,
        "doctor_name": listing.doctor_name,
        "appointment_type_id": appointment.appointment_type_id,
        "doctor_specific_visit_type_id": appointment.doctor_visit_type_id,
        "appointment_type_name": listing.type_name,
        "date_time": iso_local(offset, appointment.start_time),
        "duration_minutes": appointment.duration_minutes,
        "status": appointment.status.as_str(),
        "notes": appointment.notes,
        "created_at": iso_local(offset, appointment.created_at),
        "has_any_orders": listing.has_any_orders,
        "has_open_orders": listing.has_open_orders,
        "triage": listing.triage.as_ref().map(triage_payload),
    })
}

fn urgent_payload(offset: FixedOffset, row: &UrgentRequest) -> Value {
    json!({
        "id": row.id,
        "patient_id": row.patient_id,
        "doctor_id": row.doctor_id,
        "appointment_type_id": row.appointment_type_id,
        "symptoms_text": row.symptoms_text,
        "temperature_c": row.temperature_c,
        "bp_systolic": row.bp_systolic,
        "bp_diastolic": row.bp_diastolic,
        "heart_rate": row.heart_rate,
        "score": row.score,
        "confidence": row.confidence,
        "missing_fields": row.missing_fields,
        "score_version": row.score_version,
        "notes": row.notes,
        "status": row.status.as_str(),
        "handled_type": row.handled_type.map(|t| t.as_str()),
        "handled_by": row.handled_by,
        "rejected_reason": row.rejected_reason,
        "scheduled_appointment_id": row.scheduled_appointment_id,
        "created_at": iso_local(offset, row.created_at),
        "handled_at": row.handled_at.map(|ts| iso_local(offset, ts)),
    })
}

// ==============================================================================
// BOOKING AND LIFECYCLE
// ==============================================================================

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<BookingRequest>,
) -> Result<(StatusCode, Json<Value>), SchedulingError> {
    let booking_service = BookingService::new(&state);
    let booked = booking_service.book(user, request).await?;

    let offset = state.config.clinic_utc_offset;
    Ok((
        StatusCode::CREATED,
        Json(appointment_payload(
            offset,
            &booked.appointment,
            booked.triage.as_ref(),
        )),
    ))
}

#[axum::debug_handler]
pub async fn my_appointments(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<MyAppointmentsQuery>,
) -> Result<Json<Value>, SchedulingError> {
    let lifecycle_service = LifecycleService::new(&state);
    let listings = lifecycle_service.my_appointments(user, query).await?;

    let offset = state.config.clinic_utc_offset;
    let results: Vec<Value> = listings
        .iter()
        .map(|listing| listing_payload(offset, listing))
        .collect();
    Ok(Json(json!({ "results": results })))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<Arc<AppState>>,
    Path(appointment_id): Path<i64>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Value>, SchedulingError> {
    let lifecycle_service = LifecycleService::new(&state);
    let listing = lifecycle_service.get_listing(user, appointment_id).await?;

    Ok(Json(listing_payload(
        state.config.clinic_utc_offset,
        &listing,
    )))
}

#[axum::debug_handler]
pub async fn confirm_appointment(
    State(state): State<Arc<AppState>>,
    Path(appointment_id): Path<i64>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Value>, SchedulingError> {
    let lifecycle_service = LifecycleService::new(&state);
    let outcome = lifecycle_service.confirm(user, appointment_id).await?;

    Ok(Json(json!({
        "id": outcome.appointment.id,
        "status": outcome.appointment.status.as_str(),
    })))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<Arc<AppState>>,
    Path(appointment_id): Path<i64>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Value>, SchedulingError> {
    let lifecycle_service = LifecycleService::new(&state);
    let outcome = lifecycle_service.cancel(user, appointment_id).await?;

    Ok(Json(json!({
        "id": outcome.appointment.id,
        "status": outcome.appointment.status.as_str(),
    })))
}

#[axum::debug_handler]
pub async fn mark_appointment_no_show(
    State(state): State<Arc<AppState>>,
    Path(appointment_id): Path<i64>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Value>, SchedulingError> {
    let lifecycle_service = LifecycleService::new(&state);
    let outcome = lifecycle_service.mark_no_show(user, appointment_id).await?;

    Ok(Json(json!({
        "id": outcome.appointment.id,
        "status": outcome.appointment.status.as_str(),
    })))
}

#[axum::debug_handler]
pub async fn declare_emergency_absence(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<EmergencyAbsenceRequest>,
) -> Result<(StatusCode, Json<Value>), SchedulingError> {
    let cascade_service = CascadeService::new(&state);
    let outcome = cascade_service.declare_emergency(user, request).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "absence": outcome.absence,
            "cancelled_appointment_ids": outcome.cancelled_appointment_ids,
            "tokens_issued": outcome.tokens_issued,
            "already_handled": outcome.already_handled,
            "failed_appointment_ids": outcome.failed_appointment_ids,
        })),
    ))
}

// ==============================================================================
// SLOT DISCOVERY
// ==============================================================================

#[axum::debug_handler]
pub async fn get_day_slots(
    State(state): State<Arc<AppState>>,
    Path(doctor_id): Path<i64>,
    Query(query): Query<SlotQuery>,
) -> Result<Json<Value>, SchedulingError> {
    let date = query.date;
    let slot_service = SlotService::new(&state);
    let outcome = slot_service.day_slots(doctor_id, query).await?;

    Ok(Json(json!({
        "doctor_id": doctor_id,
        "date": date,
        "duration_minutes": outcome.duration_minutes,
        "availability": outcome.availability,
        "slots": outcome.slots,
        "timezone": state.config.clinic_utc_offset.to_string(),
    })))
}

#[axum::debug_handler]
pub async fn get_range_slots(
    State(state): State<Arc<AppState>>,
    Path(doctor_id): Path<i64>,
    Query(query): Query<SlotRangeQuery>,
) -> Result<Json<Value>, SchedulingError> {
    let slot_service = SlotService::new(&state);
    let outcome = slot_service.range_slots(doctor_id, query).await?;

    Ok(Json(json!({
        "doctor_id": doctor_id,
        "duration_minutes": outcome.duration_minutes,
        "from": outcome.from,
        "to": outcome.to,
        "days": outcome.days,
        "timezone": state.config.clinic_utc_offset.to_string(),
    })))
}

// ==============================================================================
// URGENT REQUESTS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_urgent_request(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<CreateUrgentRequest>,
) -> Result<(StatusCode, Json<Value>), SchedulingError> {
    let urgent_service = UrgentRequestService::new(&state);
    let created = urgent_service.create(user, request).await?;

    Ok((
        StatusCode::CREATED,
        Json(urgent_payload(state.config.clinic_utc_offset, &created)),
    ))
}

#[axum::debug_handler]
pub async fn my_urgent_requests(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<UrgentListQuery>,
) -> Result<Json<Value>, SchedulingError> {
    let urgent_service = UrgentRequestService::new(&state);
    let rows = urgent_service.list_for_caller(user, query).await?;

    let offset = state.config.clinic_utc_offset;
    let results: Vec<Value> = rows.iter().map(|row| urgent_payload(offset, row)).collect();
    Ok(Json(json!({
        "results": results,
        "total": results.len(),
    })))
}

#[axum::debug_handler]
pub async fn reject_urgent_request(
    State(state): State<Arc<AppState>>,
    Path(urgent_id): Path<i64>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<RejectUrgentRequest>,
) -> Result<Json<Value>, SchedulingError> {
    let urgent_service = UrgentRequestService::new(&state);
    let updated = urgent_service.reject(user, urgent_id, request).await?;

    Ok(Json(urgent_payload(state.config.clinic_utc_offset, &updated)))
}

#[axum::debug_handler]
pub async fn schedule_urgent_request(
    State(state): State<Arc<AppState>>,
    Path(urgent_id): Path<i64>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<ScheduleUrgentRequest>,
) -> Result<(StatusCode, Json<Value>), SchedulingError> {
    let urgent_service = UrgentRequestService::new(&state);
    let (updated, booked) = urgent_service.schedule(user, urgent_id, request).await?;

    let offset = state.config.clinic_utc_offset;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "urgent_request": urgent_payload(offset, &updated),
            "appointment": appointment_payload(offset, &booked.appointment, booked.triage.as_ref()),
        })),
    ))
}

#[axum::debug_handler]
pub async fn cancel_urgent_request(
    State(state): State<Arc<AppState>>,
    Path(urgent_id): Path<i64>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Value>, SchedulingError> {
    let urgent_service = UrgentRequestService::new(&state);
    let updated = urgent_service.cancel(user, urgent_id).await?;

    Ok(Json(urgent_payload(state.config.clinic_utc_offset, &updated)))
}
