//! Command surface: status reads and goal/fix submission.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::sync::Arc;

use super::types::SuccessResponse;
use crate::commands::{self, FixesSubmission, GoalsSubmission};
use crate::AppState;

/// GET /health
pub(super) async fn health(State(state): State<Arc<AppState>>) -> Json<commands::HealthReport> {
    Json(commands::health(&state))
}

/// GET /state
pub(super) async fn get_state(State(state): State<Arc<AppState>>) -> Json<commands::StateView> {
    Json(commands::state_snapshot(&state))
}

/// GET /design-data: 404 until the plugin has sent a snapshot.
pub(super) async fn get_design_data(State(state): State<Arc<AppState>>) -> Response {
    match commands::last_snapshot(&state) {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /add-goals
pub(super) async fn add_goals(
    State(state): State<Arc<AppState>>,
    Json(body): Json<GoalsSubmission>,
) -> Response {
    match commands::submit_goals(&state, body) {
        Ok(()) => Json(SuccessResponse { success: true }).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /add-fixes
pub(super) async fn add_fixes(
    State(state): State<Arc<AppState>>,
    Json(body): Json<FixesSubmission>,
) -> Response {
    match commands::submit_fixes(&state, body) {
        Ok(()) => Json(SuccessResponse { success: true }).into_response(),
        Err(e) => e.into_response(),
    }
}
