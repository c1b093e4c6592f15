use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use tracing::{info, warn};

use benchwarden_core::types::{ResourceKey, ScanRecord, ScanRequest, ScanTarget};

use super::{default_scope, resource_key};
use crate::{
    AppState,
    errors::{AppError, AppResult},
};

#[derive(Debug, Deserialize)]
pub struct CreateScanBody {
    #[serde(default = "default_scope")]
    pub scope: String,
    pub name: String,
    /// Omitted means the cluster's default profile.
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub target: ScanTarget,
    #[serde(default)]
    pub deadline_secs: Option<u64>,
}

pub async fn create_scan(
    State(state): State<AppState>,
    Json(body): Json<CreateScanBody>,
) -> AppResult<(StatusCode, Json<ScanRecord>)> {
    let key = resource_key(body.scope, body.name)?;
    let mut request =
        ScanRequest::manual(key, body.profile).with_target(body.target);
    request.deadline_secs = body.deadline_secs;

    let record = state.store.admit_scan(request).await?;
    info!(scan = %record.request.key, "scan request admitted");
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn list_scans(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<ResourceKey>>> {
    let mut keys = state.store.list_scans().await?;
    keys.sort();
    Ok(Json(keys))
}

pub async fn get_scan(
    State(state): State<AppState>,
    Path((scope, name)): Path<(String, String)>,
) -> AppResult<Json<ScanRecord>> {
    let key = ResourceKey::new(scope, name);
    state
        .store
        .get_scan(&key)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("scan {key} not found")))
}

pub async fn cancel_scan(
    State(state): State<AppState>,
    Path((scope, name)): Path<(String, String)>,
) -> AppResult<(StatusCode, Json<ScanRecord>)> {
    let key = ResourceKey::new(scope, name);
    let record = state.store.request_cancel(&key).await?;
    info!(scan = %key, "cancellation requested");
    Ok((StatusCode::ACCEPTED, Json(record)))
}

pub async fn delete_scan(
    State(state): State<AppState>,
    Path((scope, name)): Path<(String, String)>,
) -> AppResult<StatusCode> {
    let key = ResourceKey::new(scope, name);
    let Some(record) = state.store.get_scan(&key).await? else {
        return Err(AppError::not_found(format!("scan {key} not found")));
    };

    // Deleted requests are never reconciled again.
    if let Some(run) = record.status.active.as_ref()
        && !run.is_terminal()
        && let Some(job) = run.job.as_ref()
        && let Err(err) = state.runner.cancel(job).await
    {
        warn!(
            scan = %key,
            job = %job,
            error = %err,
            "failed to cancel job of deleted scan"
        );
    }

    match state.store.delete_scan(&key).await? {
        Some(_) => {
            info!(scan = %key, "scan request deleted");
            Ok(StatusCode::NO_CONTENT)
        }
        None => Err(AppError::not_found(format!("scan {key} not found"))),
    }
}
