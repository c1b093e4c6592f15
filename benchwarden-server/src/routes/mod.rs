pub mod v1;

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::{AppState, handlers::system};

/// Versioned API plus the unversioned health and scrape endpoints.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .nest("/v1", v1::create_v1_router())
        .route("/healthz", get(system::healthz))
        .route("/metrics", get(system::metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
