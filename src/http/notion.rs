//! Notion pass-through for the plugin, which cannot reach api.notion.com
//! from its sandbox. Upstream status and JSON body are relayed unchanged.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;

use super::types::{error_response, NotionBlocksRequest, NotionPageRequest, NotionSearchRequest};
use crate::AppState;

const NOTION_VERSION: &str = "2022-06-28";

/// Notion ids are UUIDs, with or without dashes.
fn valid_notion_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= 64 && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn require_token(token: Option<String>) -> Result<String, Response> {
    token
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| error_response(StatusCode::BAD_REQUEST, "Notion token required"))
}

fn require_id(id: Option<String>, field: &str) -> Result<String, Response> {
    let id = id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| error_response(StatusCode::BAD_REQUEST, format!("{field} required")))?;
    if !valid_notion_id(&id) {
        return Err(error_response(StatusCode::BAD_REQUEST, format!("Invalid {field}")));
    }
    Ok(id)
}

/// Send a prepared request and mirror the upstream answer.
async fn relay(request: reqwest::RequestBuilder, token: &str) -> Response {
    let resp = match request
        .bearer_auth(token)
        .header("Notion-Version", NOTION_VERSION)
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(e) => {
            tracing::warn!("Notion request failed: {e}");
            return error_response(StatusCode::BAD_GATEWAY, e.to_string());
        }
    };

    let status = StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    match resp.json::<Value>().await {
        Ok(body) => (status, Json(body)).into_response(),
        Err(e) => {
            tracing::warn!("Notion returned a non-JSON body ({status}): {e}");
            error_response(StatusCode::BAD_GATEWAY, "Parse error")
        }
    }
}

/// POST /notion/fetch-page
pub(super) async fn fetch_page(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NotionPageRequest>,
) -> Response {
    let token = match require_token(body.token) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    let page_id = match require_id(body.page_id, "pageId") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let url = format!("{}/v1/pages/{page_id}", base_url(&state));
    relay(state.http_client.get(url), &token).await
}

/// POST /notion/fetch-blocks
pub(super) async fn fetch_blocks(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NotionBlocksRequest>,
) -> Response {
    let token = match require_token(body.token) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    let block_id = match require_id(body.block_id, "blockId") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let url = format!("{}/v1/blocks/{block_id}/children?page_size=100", base_url(&state));
    relay(state.http_client.get(url), &token).await
}

/// POST /notion/search: pages only.
pub(super) async fn search(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NotionSearchRequest>,
) -> Response {
    let token = match require_token(body.token) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    let payload = json!({
        "query": body.query.unwrap_or_default(),
        "filter": {"value": "page", "property": "object"},
    });
    let url = format!("{}/v1/search", base_url(&state));
    relay(state.http_client.post(url).json(&payload), &token).await
}

fn base_url(state: &AppState) -> &str {
    state.config.notion_base_url.trim_end_matches('/')
}
