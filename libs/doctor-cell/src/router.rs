use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};

use shared_database::AppState;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn doctor_routes(state: Arc<AppState>) -> Router {
    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/{doctor_id}/visit-types", get(handlers::get_visit_type_catalog))
        .route("/{doctor_id}/availability", get(handlers::get_doctor_availability));

    // Protected routes (authentication required)
    let protected_routes = Router::new()
        // Weekly schedule management
        .route("/{doctor_id}/availability", post(handlers::create_availability))
        .route("/{doctor_id}/availability/{availability_id}", put(handlers::update_availability))
        .route("/{doctor_id}/availability/{availability_id}", delete(handlers::delete_availability))
        // Planned time off
        .route("/absences", get(handlers::list_absences))
        .route("/absences", post(handlers::create_absence))
        .route("/absences/{absence_id}", get(handlers::get_absence))
        .route("/absences/{absence_id}", put(handlers::update_absence))
        .route("/absences/{absence_id}", delete(handlers::delete_absence))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
