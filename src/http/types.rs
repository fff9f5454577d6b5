use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::app_logger::Direction;
use crate::commands::CommandError;

// --- Request/Response types ---

#[derive(Serialize)]
pub(super) struct SuccessResponse {
    pub success: bool,
}

#[derive(Deserialize)]
pub(super) struct LogsQuery {
    #[serde(default)]
    pub limit: usize,
    #[serde(default)]
    pub direction: Option<Direction>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct NotionPageRequest {
    #[serde(default)]
    pub page_id: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct NotionBlocksRequest {
    #[serde(default)]
    pub block_id: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Deserialize)]
pub(super) struct NotionSearchRequest {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

/// `{"error": message}` with `status`.
pub(super) fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

impl IntoResponse for CommandError {
    fn into_response(self) -> Response {
        let status = match &self {
            CommandError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            CommandError::NotFound(_) => StatusCode::NOT_FOUND,
            CommandError::BadRequest(_) => StatusCode::BAD_REQUEST,
        };
        error_response(status, self.to_string())
    }
}
