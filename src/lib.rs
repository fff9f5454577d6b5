pub(crate) mod ai_client;
pub(crate) mod app_logger;
pub(crate) mod commands;
pub(crate) mod config;
pub(crate) mod credential;
pub(crate) mod error_classification;
pub(crate) mod extract;
mod http;
pub(crate) mod prompts;
pub(crate) mod protocol;
pub(crate) mod registry;
pub(crate) mod router;
pub(crate) mod state;

use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;

pub use state::AppState;

const DEFAULT_LOG_FILTER: &str = "sidebot_bridge_lib=info,sidebot_bridge=info";

/// Command-line values that take precedence over `config.json`.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub http_port: Option<u16>,
    pub ws_port: Option<u16>,
    pub host: Option<String>,
}

/// Install the global `tracing` subscriber. `RUST_LOG` wins, then `level`,
/// then the crate default.
pub fn init_tracing(level: Option<&str>) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| match level {
            Some(level) => tracing_subscriber::EnvFilter::try_new(level),
            None => tracing_subscriber::EnvFilter::try_new(DEFAULT_LOG_FILTER),
        })
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Run both servers until Ctrl+C.
pub async fn run(overrides: Overrides) -> anyhow::Result<()> {
    let dir = config::config_dir();
    let mut cfg = config::load_bridge_config(&dir);
    if let Some(port) = overrides.http_port {
        cfg.http_port = port;
    }
    if let Some(port) = overrides.ws_port {
        cfg.ws_port = port;
    }
    if let Some(host) = overrides.host {
        cfg.bind_host = host;
    }
    tracing::info!("Config dir: {}", dir.display());

    let http_addr = format!("{}:{}", cfg.bind_host, cfg.http_port);
    let ws_addr = format!("{}:{}", cfg.bind_host, cfg.ws_port);

    let state = Arc::new(AppState::new(cfg, &dir).map_err(anyhow::Error::msg)?);
    if !state.credential.has_key() {
        tracing::warn!("No Claude API key stored; chat and analysis stay disabled until the plugin sends one");
    }

    // Bind both before serving either
    let http_listener = TcpListener::bind(&http_addr)
        .await
        .with_context(|| format!("Failed to bind HTTP command port {http_addr}"))?;
    let ws_listener = TcpListener::bind(&ws_addr)
        .await
        .with_context(|| format!("Failed to bind plugin WebSocket port {ws_addr}"))?;

    let ctrl_c_state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            return;
        }
        tracing::info!("Shutting down");
        ctrl_c_state.begin_shutdown();
    });

    let http_server = http::serve(
        http_listener,
        http::build_command_router(state.clone()),
        state.clone(),
        "HTTP command server",
    );
    let ws_server = http::serve(
        ws_listener,
        http::build_plugin_router(state.clone()),
        state.clone(),
        "Plugin WebSocket server",
    );

    let (http_result, ws_result) = tokio::join!(http_server, ws_server);
    http_result.context("HTTP command server failed")?;
    ws_result.context("Plugin WebSocket server failed")?;
    Ok(())
}
