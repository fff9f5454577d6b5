use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::ai_client::{AiClient, AnthropicBackend, CompletionBackend};
use crate::app_logger::{Direction, TrafficLog};
use crate::config::BridgeConfig;
use crate::credential::CredentialStore;
use crate::protocol::{OutboundMessage, Project, Snapshot};
use crate::registry::ConnectionRegistry;

/// Connect timeout for outbound HTTP (Claude, Notion).
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// What the plugin last told us. Every field is overwritten wholesale by the
/// message that carries it.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BridgeState {
    pub projects: Vec<Project>,
    pub active_project: Option<Project>,
    pub last_design_data: Option<Snapshot>,
    pub last_audit_result: Option<Value>,
}

/// Process-wide context shared by the socket handler, the router and the
/// HTTP routes.
pub struct AppState {
    pub(crate) config: BridgeConfig,
    pub(crate) credential: CredentialStore,
    pub(crate) registry: ConnectionRegistry,
    pub(crate) bridge: RwLock<BridgeState>,
    pub(crate) ai: AiClient,
    /// Relay traffic ring buffer served by `/logs`
    pub(crate) traffic: Mutex<TrafficLog>,
    /// Shared client for Notion pass-through requests
    pub(crate) http_client: reqwest::Client,
    /// Flipped to `true` once on Ctrl+C; servers and plugin sockets watch it
    pub(crate) shutdown: watch::Sender<bool>,
}

impl AppState {
    /// Build the runtime state: credential from `config_dir`, Claude backend
    /// from `config`.
    pub(crate) fn new(config: BridgeConfig, config_dir: &Path) -> Result<Self, String> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.ai_timeout_secs.max(1)))
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {e}"))?;
        let backend: Arc<dyn CompletionBackend> =
            Arc::new(AnthropicBackend::new(http_client.clone(), &config.api_base_url));
        Ok(Self::with_backend(config, CredentialStore::load(config_dir), backend, http_client))
    }

    fn with_backend(
        config: BridgeConfig,
        credential: CredentialStore,
        backend: Arc<dyn CompletionBackend>,
        http_client: reqwest::Client,
    ) -> Self {
        let ai = AiClient::new(backend, &config);
        Self {
            config,
            credential,
            registry: ConnectionRegistry::new(),
            bridge: RwLock::new(BridgeState::default()),
            ai,
            traffic: Mutex::new(TrafficLog::default()),
            http_client,
            shutdown: watch::channel(false).0,
        }
    }

    /// State wired to a test backend, with the credential stored under a
    /// fresh temp directory.
    #[cfg(test)]
    pub(crate) fn for_tests(
        backend: Arc<dyn CompletionBackend>,
        api_key: Option<&str>,
        config: BridgeConfig,
    ) -> Arc<Self> {
        let dir = std::env::temp_dir().join(format!("sidebot-bridge-test-{}", uuid::Uuid::new_v4()));
        let credential = CredentialStore::in_memory(&dir, api_key);
        Arc::new(Self::with_backend(config, credential, backend, reqwest::Client::new()))
    }

    pub(crate) fn begin_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Resolves once [`AppState::begin_shutdown`] has been called.
    pub(crate) async fn shutdown_signal(&self) {
        let mut rx = self.shutdown.subscribe();
        let _ = rx.wait_for(|stopping| *stopping).await;
    }

    pub(crate) fn record(&self, direction: Direction, message_type: &str, summary: impl Into<String>) {
        self.traffic.lock().push(direction, message_type, summary);
    }

    /// Send to the plugin and log the attempt. Returns whether it was queued.
    pub(crate) fn send_to_plugin(&self, message: &OutboundMessage) -> bool {
        let sent = self.registry.send(message);
        if sent {
            self.record(Direction::Out, message.type_name(), message.summary());
        }
        sent
    }
}
