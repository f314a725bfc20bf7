//! API request handlers.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::control_plane::Deployment;
use crate::nodes::WorkerNode;
use crate::reconcile::ReconcileReport;
use crate::service::{ServiceError, ServiceRecord, ServiceStatusView, SessionSettings};
use crate::volume::{FanOutReport, NodeProbe};

use super::error::{ApiError, ApiResult};
use super::state::AppState;

/// Default number of log lines returned by the logs endpoint.
const DEFAULT_LOG_TAIL: u32 = 100;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// List all service records.
#[instrument(skip(state))]
pub async fn list_services(State(state): State<AppState>) -> ApiResult<Json<Vec<ServiceRecord>>> {
    let records = state.provisioner.list().await?;
    Ok(Json(records))
}

/// Get the status of a session's service.
#[instrument(skip(state))]
pub async fn get_service(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<ServiceStatusView>> {
    state
        .provisioner
        .get_status(&session_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Service for session {} not found", session_id)))
}

/// Provision a service for a session.
#[instrument(skip(state, settings))]
pub async fn create_service(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(settings): Json<SessionSettings>,
) -> ApiResult<(StatusCode, Json<ServiceRecord>)> {
    let record = state.provisioner.create(&session_id, settings).await?;
    info!(
        session_id = %session_id,
        url = ?record.service_url,
        node = ?record.worker_node,
        "Provisioned session service"
    );
    Ok((StatusCode::CREATED, Json(record)))
}

/// Start a stopped service.
#[instrument(skip(state))]
pub async fn start_service(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<StatusCode> {
    state.provisioner.start(&session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Stop a running service.
#[instrument(skip(state))]
pub async fn stop_service(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<StatusCode> {
    state.provisioner.stop(&session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Tear down a session's service. Succeeds when nothing is provisioned.
#[instrument(skip(state))]
pub async fn delete_service(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<StatusCode> {
    state.provisioner.delete(&session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Query parameters for the logs endpoint.
#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub tail: Option<u32>,
}

/// Application logs.
#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub session_id: String,
    pub logs: String,
}

/// Tail of the application's runtime logs.
#[instrument(skip(state))]
pub async fn service_logs(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Json<LogsResponse>> {
    let tail = query.tail.unwrap_or(DEFAULT_LOG_TAIL);
    let logs = state.provisioner.logs(&session_id, tail).await?;
    Ok(Json(LogsResponse { session_id, logs }))
}

/// Deployment history of the application.
#[instrument(skip(state))]
pub async fn deployment_logs(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Vec<Deployment>>> {
    let deployments = state.provisioner.deployment_logs(&session_id).await?;
    Ok(Json(deployments))
}

/// Storage nodes currently eligible for session volumes.
#[instrument(skip(state))]
pub async fn list_nodes(State(state): State<AppState>) -> ApiResult<Json<Vec<WorkerNode>>> {
    let nodes = state.selector.nodes().await.map_err(ServiceError::from)?;
    Ok(Json(nodes))
}

/// Report orphan session volumes without removing them.
#[instrument(skip(state))]
pub async fn list_orphans(State(state): State<AppState>) -> ApiResult<Json<ReconcileReport>> {
    let report = state
        .reconciler
        .reconcile(state.provisioner.repository(), false)
        .await?;
    Ok(Json(report))
}

/// Remove orphan session volumes.
#[instrument(skip(state))]
pub async fn cleanup_orphans(State(state): State<AppState>) -> ApiResult<Json<ReconcileReport>> {
    let report = state
        .reconciler
        .reconcile(state.provisioner.repository(), true)
        .await?;
    if let Some(ref cleanup) = report.cleanup {
        info!(
            deleted = cleanup.deleted.len(),
            errors = cleanup.errors.len(),
            "Orphan cleanup finished"
        );
    }
    Ok(Json(report))
}

/// Editor volume presence per storage node.
#[instrument(skip(state))]
pub async fn editor_volume_status(State(state): State<AppState>) -> ApiResult<Json<Vec<NodeProbe>>> {
    let probes = state.editor.status().await?;
    Ok(Json(probes))
}

/// Create and populate the editor volume on every storage node.
#[instrument(skip(state))]
pub async fn setup_editor_volume(State(state): State<AppState>) -> ApiResult<Json<FanOutReport>> {
    require_editor_repository(&state)?;
    let report = state.editor.setup().await?;
    if !report.is_complete() {
        warn!(failed = report.failed.len(), "Editor volume setup incomplete");
    }
    Ok(Json(report))
}

/// Refresh the editor volume contents on every storage node.
#[instrument(skip(state))]
pub async fn update_editor_volume(State(state): State<AppState>) -> ApiResult<Json<FanOutReport>> {
    require_editor_repository(&state)?;
    let report = state.editor.update().await?;
    if !report.is_complete() {
        warn!(failed = report.failed.len(), "Editor volume update incomplete");
    }
    Ok(Json(report))
}

fn require_editor_repository(state: &AppState) -> ApiResult<()> {
    if state.editor.config().repository_url.is_empty() {
        return Err(ApiError::bad_request(
            "editor.repository_url is not configured",
        ));
    }
    Ok(())
}
