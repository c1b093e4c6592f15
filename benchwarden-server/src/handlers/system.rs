use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
};
use serde_json::{Value, json};

use crate::{AppState, exposition};

pub async fn healthz(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "cluster": {
            "provider": state.cluster.provider,
            "version": state.cluster.version,
        },
    }))
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = exposition::render(&state.metrics.snapshot());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, exposition::CONTENT_TYPE)],
        body,
    )
}

pub async fn list_profiles(State(state): State<AppState>) -> Json<Value> {
    let profiles: Vec<Value> = state
        .profiles
        .names()
        .filter_map(|name| state.profiles.get(name))
        .map(|profile| {
            json!({
                "name": profile.name,
                "benchmark_version": profile.benchmark_version,
                "skip_checks": profile.skip_checks,
            })
        })
        .collect();
    Json(json!({
        "default": state.profiles.default_profile(),
        "profiles": profiles,
    }))
}
