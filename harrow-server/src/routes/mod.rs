use axum::{
    Router,
    routing::{get, post},
};

use crate::handlers::{
    handle_websocket::websocket_handler,
    scan::{
        list_scans_handler, scan_findings_handler, scan_status_handler,
        start_scan_handler, stop_scan_handler,
    },
};
use crate::infra::app_state::AppState;

/// Scan control and snapshot routes under `/api`.
pub fn create_api_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/scans", post(start_scan_handler).get(list_scans_handler))
        .route("/scans/stop", post(stop_scan_handler))
        .route("/scans/findings", get(scan_findings_handler))
        .route("/status", get(scan_status_handler))
        .with_state(state)
}

pub fn create_push_router() -> Router<AppState> {
    Router::new().route("/ws", get(websocket_handler))
}
