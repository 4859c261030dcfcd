use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_database::AppState;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

/// Booking, lifecycle, and the emergency-absence cascade. Everything here
/// requires authentication.
pub fn appointment_routes(state: Arc<AppState>) -> Router {
    let protected_routes = Router::new()
        .route("/", post(handlers::book_appointment))
        .route("/my", get(handlers::my_appointments))
        .route("/{appointment_id}", get(handlers::get_appointment))
        .route("/{appointment_id}/confirm", post(handlers::confirm_appointment))
        .route("/{appointment_id}/cancel", post(handlers::cancel_appointment))
        .route("/{appointment_id}/no-show", post(handlers::mark_appointment_no_show))
        .route("/emergency-absence", post(handlers::declare_emergency_absence))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new().merge(protected_routes).with_state(state)
}

/// Slot discovery, nested under /doctors. Public: patients browse slots
/// before they sign in.
pub fn slot_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/{doctor_id}/slots", get(handlers::get_day_slots))
        .route("/{doctor_id}/slots/range", get(handlers::get_range_slots))
        .with_state(state)
}

/// Urgent-request waitlist.
pub fn urgent_routes(state: Arc<AppState>) -> Router {
    let protected_routes = Router::new()
        .route("/", post(handlers::create_urgent_request))
        .route("/my", get(handlers::my_urgent_requests))
        .route("/{urgent_id}/reject", post(handlers::reject_urgent_request))
        .route("/{urgent_id}/schedule", post(handlers::schedule_urgent_request))
        .route("/{urgent_id}/cancel", post(handlers::cancel_urgent_request))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new().merge(protected_routes).with_state(state)
}
