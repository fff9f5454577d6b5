//! Wire messages exchanged with the plugin over its WebSocket.
//!
//! Every message is a JSON object with a `type` discriminator. Inbound
//! messages decode into [`InboundMessage`] at the socket boundary; anything
//! that fails to decode is logged and dropped there.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A plugin project, kept exactly as the plugin sent it. The bridge only
/// reads `name` and `goals` for prompt context.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Project(Value);

impl Project {
    /// Display name, if the project carries a non-empty string `name`.
    pub(crate) fn name(&self) -> Option<&str> {
        self.0
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
    }

    /// Goals as display strings (goals are either strings or `{text}` objects).
    pub(crate) fn goal_texts(&self) -> Vec<String> {
        let Some(goals) = self.0.get("goals").and_then(Value::as_array) else {
            return Vec::new();
        };
        goals
            .iter()
            .filter_map(|g| match g {
                Value::String(s) => Some(s.clone()),
                Value::Object(map) => ["text", "title", "name"]
                    .iter()
                    .find_map(|k| map.get(*k).and_then(Value::as_str))
                    .map(str::to_string),
                _ => None,
            })
            .collect()
    }
}

/// Design snapshot sent by the plugin: opaque node/text/frame data plus an
/// optional analysis action.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Snapshot {
    /// Frame label used when reporting edge cases back to the plugin.
    pub(crate) fn frame_name(&self) -> String {
        if let Some(name) = self.payload.get("frameName").and_then(Value::as_str) {
            return name.to_string();
        }
        self.payload
            .get("rootNames")
            .and_then(Value::as_array)
            .and_then(|names| names.first())
            .and_then(Value::as_str)
            .unwrap_or("Selection")
            .to_string()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum InboundMessage {
    StateUpdate {
        #[serde(default)]
        projects: Vec<Project>,
        #[serde(default)]
        active_project: Option<Project>,
    },
    DesignData {
        data: Snapshot,
        #[serde(default)]
        action: Option<String>,
    },
    ChatMessage {
        #[serde(default)]
        text: String,
        #[serde(default)]
        history: Vec<ChatTurn>,
        #[serde(default)]
        design_data: Option<Value>,
        #[serde(default)]
        screenshot: Option<String>,
    },
    SetApiKey {
        #[serde(default)]
        key: String,
    },
    AuditResult {
        #[serde(default)]
        result: Value,
    },
}

impl InboundMessage {
    pub(crate) fn decode(raw: &str) -> Result<Self, String> {
        serde_json::from_str(raw).map_err(|e| format!("Malformed plugin message: {e}"))
    }

    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            InboundMessage::StateUpdate { .. } => "state-update",
            InboundMessage::DesignData { .. } => "design-data",
            InboundMessage::ChatMessage { .. } => "chat-message",
            InboundMessage::SetApiKey { .. } => "set-api-key",
            InboundMessage::AuditResult { .. } => "audit-result",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum OutboundMessage {
    ConnectionEstablished {
        has_api_key: bool,
        message: String,
    },
    AddFixesFromClaude {
        fixes: Vec<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        project_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        action: Option<String>,
    },
    AddGoalsFromClaude {
        project_name: String,
        goals: Vec<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        prd_text: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        notion_page_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        notion_title: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        categories: Option<Value>,
    },
    AddEdgeCasesFromClaude {
        cases: Vec<String>,
        frame_name: String,
    },
    ChatResponse {
        text: String,
        fixes: Vec<Value>,
    },
    ApiKeyConfirmed {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl OutboundMessage {
    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            OutboundMessage::ConnectionEstablished { .. } => "connection-established",
            OutboundMessage::AddFixesFromClaude { .. } => "add-fixes-from-claude",
            OutboundMessage::AddGoalsFromClaude { .. } => "add-goals-from-claude",
            OutboundMessage::AddEdgeCasesFromClaude { .. } => "add-edge-cases-from-claude",
            OutboundMessage::ChatResponse { .. } => "chat-response",
            OutboundMessage::ApiKeyConfirmed { .. } => "api-key-confirmed",
        }
    }

    /// Short human summary for the traffic log.
    pub(crate) fn summary(&self) -> String {
        match self {
            OutboundMessage::ConnectionEstablished { has_api_key, .. } => format!("hasApiKey={has_api_key}"),
            OutboundMessage::AddFixesFromClaude { fixes, action, .. } => match action {
                Some(action) => format!("{} fixes ({action})", fixes.len()),
                None => format!("{} fixes", fixes.len()),
            },
            OutboundMessage::AddGoalsFromClaude { project_name, goals, .. } => {
                format!("{} goals -> {project_name}", goals.len())
            }
            OutboundMessage::AddEdgeCasesFromClaude { cases, frame_name } => {
                format!("{} edge cases ({frame_name})", cases.len())
            }
            OutboundMessage::ChatResponse { fixes, .. } => format!("reply, {} fixes", fixes.len()),
            OutboundMessage::ApiKeyConfirmed { success, .. } => format!("success={success}"),
        }
    }
}
