use axum::{
    Router,
    routing::{get, post},
};

use crate::{
    AppState,
    handlers::{scans, schedules, system},
};

pub fn create_v1_router() -> Router<AppState> {
    Router::new()
        .route("/scans", post(scans::create_scan).get(scans::list_scans))
        .route(
            "/scans/{scope}/{name}",
            get(scans::get_scan).delete(scans::delete_scan),
        )
        .route("/scans/{scope}/{name}/cancel", post(scans::cancel_scan))
        .route(
            "/schedules",
            post(schedules::create_schedule).get(schedules::list_schedules),
        )
        .route(
            "/schedules/{scope}/{name}",
            get(schedules::get_schedule).delete(schedules::delete_schedule),
        )
        .route("/profiles", get(system::list_profiles))
}
