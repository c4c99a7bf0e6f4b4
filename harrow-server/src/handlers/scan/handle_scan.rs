use axum::{
    Json,
    extract::{Query, State, rejection::{JsonRejection, QueryRejection}},
    http::StatusCode,
    response::IntoResponse,
};
use harrow_core::ScanRequest;
use serde_json::json;
use tracing::info;

use crate::handlers::ScanQuery;
use crate::infra::{app_state::AppState, errors::AppResult};

/// Start a scan; the pipeline runs in the background.
pub async fn start_scan_handler(
    State(state): State<AppState>,
    body: Result<Json<ScanRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(request) = body?;
    let scan_id = state.scans.start_scan(request)?;
    info!(scan = %scan_id, "scan accepted");

    Ok((StatusCode::ACCEPTED, Json(json!({ "scan_id": scan_id }))))
}

pub async fn stop_scan_handler(
    State(state): State<AppState>,
    query: Result<Query<ScanQuery>, QueryRejection>,
) -> AppResult<impl IntoResponse> {
    let Query(query) = query?;
    let scan_id = query.scan_id()?;
    state.scans.stop_scan(&scan_id)?;

    Ok(Json(json!({ "status": "stopped" })))
}

pub async fn scan_status_handler(
    State(state): State<AppState>,
    query: Result<Query<ScanQuery>, QueryRejection>,
) -> AppResult<impl IntoResponse> {
    let Query(query) = query?;
    let session = state.scans.snapshot(&query.scan_id()?)?;
    Ok(Json(session))
}

pub async fn list_scans_handler(
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(state.scans.list()))
}

pub async fn scan_findings_handler(
    State(state): State<AppState>,
    query: Result<Query<ScanQuery>, QueryRejection>,
) -> AppResult<impl IntoResponse> {
    let Query(query) = query?;
    let findings = state.scans.findings(&query.scan_id()?)?;
    Ok(Json(findings))
}
