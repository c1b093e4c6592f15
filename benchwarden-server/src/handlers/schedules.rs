use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use tracing::info;

use benchwarden_core::types::{
    Cadence, ConcurrencyPolicy, ResourceKey, ScanTarget, ScheduleDefinition,
    ScheduleRecord,
};

use super::{default_scope, resource_key};
use crate::{
    AppState,
    errors::{AppError, AppResult},
};

#[derive(Debug, Deserialize)]
pub struct CreateScheduleBody {
    #[serde(default = "default_scope")]
    pub scope: String,
    pub name: String,
    /// Cron expression, 5 to 7 fields.
    pub cadence: String,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub target: ScanTarget,
    #[serde(default)]
    pub concurrency: ConcurrencyPolicy,
    #[serde(default)]
    pub history_limit: Option<usize>,
    #[serde(default)]
    pub deadline_secs: Option<u64>,
    #[serde(default)]
    pub suspended: bool,
}

pub async fn create_schedule(
    State(state): State<AppState>,
    Json(body): Json<CreateScheduleBody>,
) -> AppResult<(StatusCode, Json<ScheduleRecord>)> {
    let key = resource_key(body.scope, body.name)?;
    let cadence = Cadence::parse(&body.cadence)?;
    if body.history_limit == Some(0) {
        return Err(AppError::bad_request("history_limit must be at least 1"));
    }

    let mut definition =
        ScheduleDefinition::new(key, cadence).with_concurrency(body.concurrency);
    definition.profile = body.profile;
    definition.target = body.target;
    definition.history_limit = body.history_limit;
    definition.deadline_secs = body.deadline_secs;
    definition.suspended = body.suspended;

    let record = state.store.admit_schedule(definition).await?;
    info!(
        schedule = %record.definition.key,
        cadence = record.definition.cadence.expression(),
        "schedule admitted"
    );
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn list_schedules(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<ResourceKey>>> {
    let mut keys = state.store.list_schedules().await?;
    keys.sort();
    Ok(Json(keys))
}

pub async fn get_schedule(
    State(state): State<AppState>,
    Path((scope, name)): Path<(String, String)>,
) -> AppResult<Json<ScheduleRecord>> {
    let key = ResourceKey::new(scope, name);
    state
        .store
        .get_schedule(&key)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("schedule {key} not found")))
}

pub async fn delete_schedule(
    State(state): State<AppState>,
    Path((scope, name)): Path<(String, String)>,
) -> AppResult<StatusCode> {
    let key = ResourceKey::new(scope, name);
    match state.store.delete_schedule(&key).await? {
        Some(_) => {
            info!(schedule = %key, "schedule deleted");
            Ok(StatusCode::NO_CONTENT)
        }
        None => Err(AppError::not_found(format!("schedule {key} not found"))),
    }
}
