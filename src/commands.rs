//! Out-of-band commands from the analysis requester.
//!
//! Reads expose what the plugin last reported; writes forward goals or fixes
//! to the plugin and fail fast with [`CommandError::ServiceUnavailable`] when
//! no plugin is attached. Nothing is queued or retried here.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::app_logger::Direction;
use crate::protocol::{OutboundMessage, Snapshot};
use crate::state::{AppState, BridgeState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CommandError {
    /// No plugin connection to deliver to
    ServiceUnavailable,
    NotFound(String),
    BadRequest(String),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::ServiceUnavailable => write!(f, "Plugin not connected"),
            CommandError::NotFound(m) | CommandError::BadRequest(m) => write!(f, "{m}"),
        }
    }
}

impl std::error::Error for CommandError {}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GoalsSubmission {
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub goals: Vec<Value>,
    #[serde(default)]
    pub prd_text: Option<String>,
    #[serde(default)]
    pub notion_page_id: Option<String>,
    #[serde(default)]
    pub notion_title: Option<String>,
    #[serde(default)]
    pub categories: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FixesSubmission {
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub fixes: Vec<Value>,
}

/// `GET /state` body: the stored bridge state plus live connection status.
#[derive(Debug, Serialize)]
pub(crate) struct StateView {
    pub connected: bool,
    #[serde(flatten)]
    pub state: BridgeState,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HealthReport {
    pub status: &'static str,
    pub plugin_connected: bool,
    pub active_project: String,
    pub has_api_key: bool,
    pub timestamp: String,
}

pub(crate) fn health(state: &AppState) -> HealthReport {
    let active_project = state
        .bridge
        .read()
        .active_project
        .as_ref()
        .and_then(|p| p.name())
        .unwrap_or("None")
        .to_string();
    HealthReport {
        status: "ok",
        plugin_connected: state.registry.is_connected(),
        active_project,
        has_api_key: state.credential.has_key(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    }
}

pub(crate) fn state_snapshot(state: &AppState) -> StateView {
    StateView {
        connected: state.registry.is_connected(),
        state: state.bridge.read().clone(),
    }
}

pub(crate) fn last_snapshot(state: &AppState) -> Result<Snapshot, CommandError> {
    state
        .bridge
        .read()
        .last_design_data
        .clone()
        .ok_or_else(|| CommandError::NotFound("No design data".to_string()))
}

pub(crate) fn submit_goals(state: &AppState, goals: GoalsSubmission) -> Result<(), CommandError> {
    if goals.project_name.trim().is_empty() {
        return Err(CommandError::BadRequest("projectName required".to_string()));
    }
    let summary = format!("{} goals -> {}", goals.goals.len(), goals.project_name);
    deliver(
        state,
        "add-goals",
        summary,
        OutboundMessage::AddGoalsFromClaude {
            project_name: goals.project_name,
            goals: goals.goals,
            prd_text: goals.prd_text,
            notion_page_id: goals.notion_page_id,
            notion_title: goals.notion_title,
            categories: goals.categories,
        },
    )
}

pub(crate) fn submit_fixes(state: &AppState, fixes: FixesSubmission) -> Result<(), CommandError> {
    let summary = match &fixes.project_name {
        Some(name) => format!("{} fixes -> {name}", fixes.fixes.len()),
        None => format!("{} fixes", fixes.fixes.len()),
    };
    deliver(
        state,
        "add-fixes",
        summary,
        OutboundMessage::AddFixesFromClaude {
            fixes: fixes.fixes,
            project_name: fixes.project_name,
            action: None,
        },
    )
}

fn deliver(state: &AppState, command: &str, summary: String, message: OutboundMessage) -> Result<(), CommandError> {
    if !state.registry.is_connected() {
        tracing::warn!("{command} rejected: plugin not connected");
        return Err(CommandError::ServiceUnavailable);
    }
    tracing::info!("{command}: {summary}");
    state.record(Direction::Command, command, summary);
    if state.send_to_plugin(&message) {
        Ok(())
    } else {
        Err(CommandError::ServiceUnavailable)
    }
}
