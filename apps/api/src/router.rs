use std::sync::Arc;

use axum::{routing::get, Router};

use appointment_cell::router::{appointment_routes, slot_routes, urgent_routes};
use doctor_cell::router::doctor_routes;
use shared_database::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic scheduling API is running!" }))
        .nest(
            "/doctors",
            doctor_routes(state.clone()).merge(slot_routes(state.clone())),
        )
        .nest("/appointments", appointment_routes(state.clone()))
        .nest("/urgent-requests", urgent_routes(state))
}
