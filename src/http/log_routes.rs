//! HTTP endpoints for the relay traffic ring buffer.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use std::sync::Arc;

use super::types::LogsQuery;
use crate::app_logger::TrafficEntry;
use crate::AppState;

/// GET /logs: most recent traffic entries, oldest first.
pub(super) async fn get_logs(
    State(state): State<Arc<AppState>>,
    Query(q): Query<LogsQuery>,
) -> Json<Vec<TrafficEntry>> {
    let log = state.traffic.lock();
    Json(log.get_entries(q.limit, q.direction))
}

/// DELETE /logs: clear all entries.
pub(super) async fn clear_logs(State(state): State<Arc<AppState>>) -> StatusCode {
    state.traffic.lock().clear();
    StatusCode::NO_CONTENT
}
