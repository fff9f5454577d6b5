mod command_routes;
mod log_routes;
mod notion;
mod plugin_ws;
mod types;

use axum::extract::DefaultBodyLimit;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use crate::AppState;

/// Request bodies carry design snapshots and PRD text.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Routes for the HTTP command surface (analysis requester, Notion proxy, logs).
pub(crate) fn build_command_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);

    Router::new()
        // Status
        .route("/health", get(command_routes::health))
        .route("/state", get(command_routes::get_state))
        .route("/design-data", get(command_routes::get_design_data))
        // Writes forwarded to the plugin
        .route("/add-goals", post(command_routes::add_goals))
        .route("/add-fixes", post(command_routes::add_fixes))
        // Notion pass-through
        .route("/notion/fetch-page", post(notion::fetch_page))
        .route("/notion/fetch-blocks", post(notion::fetch_blocks))
        .route("/notion/search", post(notion::search))
        // Traffic log
        .route("/logs", get(log_routes::get_logs).delete(log_routes::clear_logs))
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
}

/// Routes for the plugin's WebSocket port.
pub(crate) fn build_plugin_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(plugin_ws::ws_upgrade))
        .route("/ws", get(plugin_ws::ws_upgrade))
        .with_state(state)
}

/// Serve `app` on an already-bound listener until shutdown is signalled.
pub(crate) async fn serve(
    listener: TcpListener,
    app: Router,
    state: Arc<AppState>,
    name: &'static str,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!("{name} listening on {addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { state.shutdown_signal().await })
        .await?;
    tracing::info!("{name} stopped");
    Ok(())
}
