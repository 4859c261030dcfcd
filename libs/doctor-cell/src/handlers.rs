use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use shared_database::AppState;
use shared_models::auth::AuthUser;
use shared_models::error::AppError;

use crate::models::{
    AbsenceKind, CreateAbsenceRequest, CreateAvailabilityRequest, UpdateAbsenceRequest,
    UpdateAvailabilityRequest,
};
use crate::services::{AbsenceService, AvailabilityService, DoctorService, VisitTypeService};

#[derive(Debug, Deserialize)]
pub struct AbsenceListQuery {
    pub doctor_id: Option<String>,
}

// ==============================================================================
// PUBLIC HANDLERS (NO AUTHENTICATION REQUIRED)
// ==============================================================================

#[axum::debug_handler]
pub async fn get_visit_type_catalog(
    State(state): State<Arc<AppState>>,
    Path(doctor_id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    let doctor_service = DoctorService::new(&state);
    if !doctor_service.is_doctor(doctor_id).await? {
        return Err(AppError::NotFound("Doctor not found.".to_string()));
    }

    let visit_type_service = VisitTypeService::new(&state);
    let catalog = visit_type_service.catalog(doctor_id).await?;

    Ok(Json(json!(catalog)))
}

#[axum::debug_handler]
pub async fn get_doctor_availability(
    State(state): State<Arc<AppState>>,
    Path(doctor_id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    let doctor_service = DoctorService::new(&state);
    if !doctor_service.is_doctor(doctor_id).await? {
        return Err(AppError::NotFound("Doctor not found.".to_string()));
    }

    let availability_service = AvailabilityService::new(&state);
    let windows = availability_service.list_for_doctor(doctor_id).await?;

    Ok(Json(json!({
        "availability": windows,
        "total": windows.len()
    })))
}

// ==============================================================================
// PROTECTED HANDLERS (AUTHENTICATION REQUIRED)
// ==============================================================================

fn require_self_or_admin(user: &AuthUser, doctor_id: i64) -> Result<(), AppError> {
    if user.is_admin() || (user.is_doctor() && user.id == doctor_id) {
        Ok(())
    } else {
        Err(AppError::Forbidden(
            "Not authorized to manage this doctor's schedule.".to_string(),
        ))
    }
}

#[axum::debug_handler]
pub async fn create_availability(
    State(state): State<Arc<AppState>>,
    Path(doctor_id): Path<i64>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<CreateAvailabilityRequest>,
) -> Result<Json<Value>, AppError> {
    require_self_or_admin(&user, doctor_id)?;

    let doctor_service = DoctorService::new(&state);
    if !doctor_service.is_doctor(doctor_id).await? {
        return Err(AppError::NotFound("Doctor not found.".to_string()));
    }

    let availability_service = AvailabilityService::new(&state);
    let created = availability_service.create(doctor_id, request).await?;

    Ok(Json(json!(created)))
}

#[axum::debug_handler]
pub async fn update_availability(
    State(state): State<Arc<AppState>>,
    Path((doctor_id, availability_id)): Path<(i64, i64)>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<UpdateAvailabilityRequest>,
) -> Result<Json<Value>, AppError> {
    require_self_or_admin(&user, doctor_id)?;

    let availability_service = AvailabilityService::new(&state);
    let updated = availability_service
        .update(doctor_id, availability_id, request)
        .await?;

    Ok(Json(json!(updated)))
}

#[axum::debug_handler]
pub async fn delete_availability(
    State(state): State<Arc<AppState>>,
    Path((doctor_id, availability_id)): Path<(i64, i64)>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Value>, AppError> {
    require_self_or_admin(&user, doctor_id)?;

    let availability_service = AvailabilityService::new(&state);
    availability_service.delete(doctor_id, availability_id).await?;

    Ok(Json(json!({"deleted": availability_id})))
}

#[axum::debug_handler]
pub async fn list_absences(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<AbsenceListQuery>,
) -> Result<Json<Value>, AppError> {
    let filter = if user.is_admin() {
        match query.doctor_id {
            Some(raw) => Some(raw.parse::<i64>().map_err(|_| {
                AppError::BadRequest("Invalid doctor_id. Use integer.".to_string())
            })?),
            None => None,
        }
    } else if user.is_doctor() {
        Some(user.id)
    } else {
        return Err(AppError::Forbidden(
            "Only doctors and administrators can view absences.".to_string(),
        ));
    };

    let absence_service = AbsenceService::new(&state);
    let absences = absence_service.list(filter).await?;

    Ok(Json(json!({
        "absences": absences,
        "total": absences.len()
    })))
}

#[axum::debug_handler]
pub async fn create_absence(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<CreateAbsenceRequest>,
) -> Result<Json<Value>, AppError> {
    let doctor_id = if user.is_admin() {
        let doctor_id = request.doctor_id.ok_or_else(|| {
            AppError::ValidationError("doctor_id is required for admin.".to_string())
        })?;
        let doctor_service = DoctorService::new(&state);
        if !doctor_service.is_doctor(doctor_id).await? {
            return Err(AppError::NotFound("Doctor not found.".to_string()));
        }
        doctor_id
    } else if user.is_doctor() {
        user.id
    } else {
        return Err(AppError::Forbidden(
            "Only doctors and administrators can create absences.".to_string(),
        ));
    };

    let absence_service = AbsenceService::new(&state);
    let created = absence_service
        .create(
            doctor_id,
            AbsenceKind::Planned,
            request.start_time,
            request.end_time,
            request.notes,
        )
        .await?;

    Ok(Json(json!(created)))
}

async fn owned_absence_id(
    state: &Arc<AppState>,
    user: &AuthUser,
    absence_id: i64,
) -> Result<i64, AppError> {
    if user.is_patient() {
        return Err(AppError::Forbidden(
            "Only doctors and administrators can manage absences.".to_string(),
        ));
    }

    let absence_service = AbsenceService::new(state);
    let absence = absence_service
        .get(absence_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Not found.".to_string()))?;

    // Doctors see only their own rows; everyone else's look absent.
    if !user.is_admin() && absence.doctor_id != user.id {
        return Err(AppError::NotFound("Not found.".to_string()));
    }
    Ok(absence.id)
}

#[axum::debug_handler]
pub async fn get_absence(
    State(state): State<Arc<AppState>>,
    Path(absence_id): Path<i64>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Value>, AppError> {
    owned_absence_id(&state, &user, absence_id).await?;

    let absence_service = AbsenceService::new(&state);
    let absence = absence_service
        .get(absence_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Not found.".to_string()))?;

    Ok(Json(json!(absence)))
}

#[axum::debug_handler]
pub async fn update_absence(
    State(state): State<Arc<AppState>>,
    Path(absence_id): Path<i64>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<UpdateAbsenceRequest>,
) -> Result<Json<Value>, AppError> {
    owned_absence_id(&state, &user, absence_id).await?;

    let absence_service = AbsenceService::new(&state);
    let updated = absence_service.update(absence_id, request).await?;

    Ok(Json(json!(updated)))
}

#[axum::debug_handler]
pub async fn delete_absence(
    State(state): State<Arc<AppState>>,
    Path(absence_id): Path<i64>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Value>, AppError> {
    owned_absence_id(&state, &user, absence_id).await?;

    let absence_service = AbsenceService::new(&state);
    absence_service.delete(absence_id).await?;

    Ok(Json(json!({"deleted": absence_id})))
}
