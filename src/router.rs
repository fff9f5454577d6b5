//! Dispatch for messages arriving on the plugin socket.
//!
//! State changes (projects, snapshot, key) are applied synchronously inside
//! [`MessageRouter::dispatch`], in arrival order. Anything that waits on
//! Claude is handed back as a [`Deferred`] future for the socket loop to
//! spawn, so a slow completion never holds up the next inbound message.
//! Replies to concurrent requests may therefore arrive out of order; each one
//! is self-describing by its `type`.

use futures_util::future::BoxFuture;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::ai_client::{Completion, CompletionRequest, UserContent};
use crate::app_logger::Direction;
use crate::extract::{extract, string_items, tag_with_action};
use crate::prompts::{self, PromptTemplate, ResultShape};
use crate::protocol::{ChatTurn, InboundMessage, OutboundMessage, Snapshot};
use crate::state::AppState;

/// Work left over after dispatch: an outstanding Claude call and its reply.
pub(crate) type Deferred = BoxFuture<'static, ()>;

pub(crate) const NO_KEY_CHAT_REPLY: &str =
    "No API key configured. Add your Anthropic API key in the Sidebot settings to start chatting.";
const NO_KEY_ISSUE: &str = "No API key configured";
const NO_KEY_HINT: &str = "Open the Sidebot settings and paste an Anthropic API key (sk-ant-...).";

const ANALYSIS_SYSTEM_PROMPT: &str = "You are a meticulous product design reviewer. \
You answer only with the JSON requested, grounded in the design data you are given.";

pub(crate) struct MessageRouter {
    state: Arc<AppState>,
}

impl MessageRouter {
    pub(crate) fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Decode one text frame and dispatch it. Malformed frames are logged and
    /// dropped without affecting later ones.
    pub(crate) fn handle_text(&self, raw: &str) -> Option<Deferred> {
        match InboundMessage::decode(raw) {
            Ok(msg) => self.dispatch(msg),
            Err(e) => {
                tracing::warn!("{e}");
                self.state.record(Direction::In, "malformed", truncate(raw, 80));
                None
            }
        }
    }

    pub(crate) fn dispatch(&self, msg: InboundMessage) -> Option<Deferred> {
        tracing::info!(message_type = msg.type_name(), "plugin message");
        self.state.record(Direction::In, msg.type_name(), inbound_summary(&msg));

        match msg {
            InboundMessage::StateUpdate { projects, active_project } => {
                let mut bridge = self.state.bridge.write();
                bridge.projects = projects;
                bridge.active_project = active_project;
                None
            }
            InboundMessage::AuditResult { result } => {
                self.state.bridge.write().last_audit_result = Some(result);
                None
            }
            InboundMessage::SetApiKey { key } => {
                self.set_api_key(&key);
                None
            }
            InboundMessage::ChatMessage {
                text,
                history,
                design_data,
                screenshot,
            } => self.chat(text, history, design_data, screenshot),
            InboundMessage::DesignData { data, action } => self.design_data(data, action),
        }
    }

    fn set_api_key(&self, raw: &str) {
        let reply = match self.state.credential.set(raw) {
            Ok(()) => OutboundMessage::ApiKeyConfirmed {
                success: true,
                error: None,
            },
            Err(e) => {
                tracing::warn!("Rejected API key: {e}");
                OutboundMessage::ApiKeyConfirmed {
                    success: false,
                    error: Some(e.to_string()),
                }
            }
        };
        self.state.send_to_plugin(&reply);
    }

    fn chat(
        &self,
        text: String,
        history: Vec<ChatTurn>,
        design_data: Option<Value>,
        screenshot: Option<String>,
    ) -> Option<Deferred> {
        let Some(api_key) = self.state.credential.api_key() else {
            self.state.send_to_plugin(&OutboundMessage::ChatResponse {
                text: NO_KEY_CHAT_REPLY.to_string(),
                fixes: Vec::new(),
            });
            return None;
        };

        let (system, stored_design) = {
            let bridge = self.state.bridge.read();
            let system = match &bridge.active_project {
                Some(project) => prompts::chat_system_prompt(project.name(), &project.goal_texts()),
                None => prompts::chat_system_prompt(None, &[]),
            };
            let stored = bridge
                .last_design_data
                .as_ref()
                .and_then(|s| serde_json::to_value(s).ok());
            (system, stored)
        };
        // Fall back to the last snapshot when the turn carries none
        let design = design_data.or(stored_design);

        let request = CompletionRequest {
            system: Some(system),
            history,
            user: UserContent::for_chat(&text, design.as_ref(), screenshot.as_deref()),
            max_tokens: self.state.config.chat_max_tokens,
        };

        let state = self.state.clone();
        Some(Box::pin(async move {
            let completion = state.ai.complete(&api_key, request).await;
            state.send_to_plugin(&chat_reply(completion));
        }))
    }

    fn design_data(&self, data: Snapshot, message_action: Option<String>) -> Option<Deferred> {
        let action = message_action.or_else(|| data.action.clone());
        let project_name = {
            let mut bridge = self.state.bridge.write();
            bridge.last_design_data = Some(data.clone());
            bridge
                .active_project
                .as_ref()
                .and_then(|p| p.name())
                .map(str::to_string)
        };

        let Some(action) = action else {
            tracing::debug!("design-data without action stored; no analysis");
            return None;
        };
        let Some(template) = prompts::lookup(&action) else {
            tracing::warn!("Unknown analysis action {action:?}; snapshot stored only");
            return None;
        };

        let Some(api_key) = self.state.credential.api_key() else {
            let reply = analysis_reply(
                template,
                vec![diagnostic_item(template, NO_KEY_ISSUE, NO_KEY_ISSUE, NO_KEY_HINT)],
                project_name,
                &data,
            );
            self.state.send_to_plugin(&reply);
            return None;
        };

        let design_json = serde_json::to_string_pretty(&Value::Object(data.payload.clone()))
            .unwrap_or_else(|_| "{}".to_string());
        let request = CompletionRequest {
            system: Some(ANALYSIS_SYSTEM_PROMPT.to_string()),
            history: Vec::new(),
            user: UserContent::Text(template.render(&design_json)),
            max_tokens: self.state.config.analysis_max_tokens,
        };

        tracing::info!(action = template.action, "running analysis");
        let state = self.state.clone();
        Some(Box::pin(async move {
            let completion = state.ai.complete(&api_key, request).await;
            let items = match &completion.error {
                Some(_) => vec![diagnostic_item(
                    template,
                    "Analysis failed",
                    &completion.text,
                    "Try again in a moment. If it keeps failing, check the API key.",
                )],
                None => extract(&completion.text, template.shape).items,
            };
            state.send_to_plugin(&analysis_reply(template, items, project_name, &data));
        }))
    }
}

fn chat_reply(completion: Completion) -> OutboundMessage {
    if completion.error.is_some() {
        return OutboundMessage::ChatResponse {
            text: completion.text,
            fixes: Vec::new(),
        };
    }
    // Chat fixes are always objects
    let extracted = extract(&completion.text, ResultShape::Objects);
    let text = if extracted.clean_text.is_empty() && !extracted.items.is_empty() {
        "Here are the fixes I suggest.".to_string()
    } else {
        extracted.clean_text
    };
    OutboundMessage::ChatResponse {
        text,
        fixes: extracted.items,
    }
}

/// Shape `items` into the reply message for `template`.
fn analysis_reply(
    template: &PromptTemplate,
    mut items: Vec<Value>,
    project_name: Option<String>,
    snapshot: &Snapshot,
) -> OutboundMessage {
    match template.shape {
        ResultShape::Strings => OutboundMessage::AddEdgeCasesFromClaude {
            cases: string_items(&items),
            frame_name: snapshot.frame_name(),
        },
        ResultShape::Objects => {
            tag_with_action(&mut items, template.action);
            OutboundMessage::AddFixesFromClaude {
                fixes: items,
                project_name,
                action: Some(template.action.to_string()),
            }
        }
    }
}

/// Single placeholder result explaining why no real analysis ran.
fn diagnostic_item(template: &PromptTemplate, issue: &str, description: &str, suggestion: &str) -> Value {
    match template.shape {
        ResultShape::Strings => Value::String(format!("{issue}: {suggestion}")),
        ResultShape::Objects => json!({
            "issue": issue,
            "description": description,
            "suggestion": suggestion,
            "current": "",
            "expected": "",
            "nodeId": null,
        }),
    }
}

fn inbound_summary(msg: &InboundMessage) -> String {
    match msg {
        InboundMessage::StateUpdate { projects, active_project } => match active_project {
            Some(p) => format!("{} projects, active {:?}", projects.len(), p.name().unwrap_or("")),
            None => format!("{} projects", projects.len()),
        },
        InboundMessage::DesignData { data, action } => {
            match action.as_deref().or(data.action.as_deref()) {
                Some(action) => format!("snapshot, action {action}"),
                None => "snapshot".to_string(),
            }
        }
        InboundMessage::ChatMessage { text, screenshot, .. } => {
            let mut summary = truncate(text, 60);
            if screenshot.is_some() {
                summary.push_str(" [+screenshot]");
            }
            summary
        }
        InboundMessage::SetApiKey { .. } => "key update".to_string(),
        InboundMessage::AuditResult { .. } => "audit result".to_string(),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().nth(max_chars).is_some() {
        out.push('…');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai_client::testing::ScriptedBackend;
    use crate::ai_client::{AiError, ContentBlock};
    use crate::config::BridgeConfig;
    use tokio::sync::mpsc;

    const KEY: &str = "sk-ant-router-test";

    struct Harness {
        router: MessageRouter,
        state: Arc<AppState>,
        backend: Arc<ScriptedBackend>,
        rx: mpsc::UnboundedReceiver<String>,
    }

    fn harness(api_key: Option<&str>) -> Harness {
        let backend = ScriptedBackend::new();
        let config = BridgeConfig {
            max_retries: 0,
            ..BridgeConfig::default()
        };
        let state = AppState::for_tests(backend.clone(), api_key, config);
        let (tx, rx) = mpsc::unbounded_channel();
        state.registry.attach(tx);
        Harness {
            router: MessageRouter::new(state.clone()),
            state,
            backend,
            rx,
        }
    }

    impl Harness {
        /// Dispatch a raw frame and run any deferred work to completion.
        async fn send(&self, raw: Value) {
            if let Some(work) = self.router.handle_text(&raw.to_string()) {
                work.await;
            }
        }

        fn drain(&mut self) -> Vec<Value> {
            let mut out = Vec::new();
            while let Ok(raw) = self.rx.try_recv() {
                out.push(serde_json::from_str(&raw).unwrap());
            }
            out
        }

        fn last_prompt(&self) -> String {
            let requests = self.backend.requests.lock();
            let (_, request) = requests.last().expect("no provider request");
            match &request.messages.last().unwrap().content[..] {
                [ContentBlock::Text { text }] => text.clone(),
                other => panic!("unexpected content {other:?}"),
            }
        }
    }

    const THREE_FIXES: &str = "I checked contrast.\n\n```json\n[\
        {\"issue\":\"Low contrast\",\"description\":\"Grey on white\",\"suggestion\":\"Darken\",\"current\":\"2.1:1\",\"expected\":\"4.5:1\",\"nodeId\":\"1:2\"},\
        {\"issue\":\"Low contrast\",\"description\":\"Link\",\"suggestion\":\"Darken\",\"current\":\"3:1\",\"expected\":\"4.5:1\",\"nodeId\":\"1:3\"},\
        {\"issue\":\"Placeholder\",\"description\":\"Hint text\",\"suggestion\":\"Darken\",\"current\":\"1.9:1\",\"expected\":\"4.5:1\",\"nodeId\":\"1:4\"}\
        ]\n```";

    #[tokio::test]
    async fn contrast_snapshot_yields_tagged_fixes() {
        let mut h = harness(Some(KEY));
        h.backend.reply(THREE_FIXES);

        h.send(json!({"type": "design-data", "data": {"action": "contrast", "nodes": [{"id": "1:2"}]}}))
            .await;

        assert!(h.last_prompt().contains("WCAG 2.1 AA"));
        assert!(h.last_prompt().contains("\"1:2\""));
        let out = h.drain();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["type"], "add-fixes-from-claude");
        let fixes = out[0]["fixes"].as_array().unwrap();
        assert_eq!(fixes.len(), 3);
        assert!(fixes.iter().all(|f| f["action"] == "contrast"));
        assert_eq!(h.state.bridge.read().last_design_data.as_ref().unwrap().action.as_deref(), Some("contrast"));
    }

    #[tokio::test]
    async fn message_level_action_wins() {
        let mut h = harness(Some(KEY));
        h.backend.reply("[]");

        h.send(json!({"type": "design-data", "action": "spelling", "data": {"action": "layout"}}))
            .await;

        assert!(h.last_prompt().contains("spelling mistakes"));
        let out = h.drain();
        assert_eq!(out[0]["action"], "spelling");
        assert_eq!(out[0]["fixes"], json!([]));
    }

    #[tokio::test]
    async fn edge_cases_reply_with_strings_and_frame_name() {
        let mut h = harness(Some(KEY));
        h.backend
            .reply("Consider these:\n```json\n[\"Empty cart\", {\"case\": \"Payment declined\"}]\n```");

        h.send(json!({"type": "design-data", "data": {"action": "edge-cases", "rootNames": ["Checkout"]}}))
            .await;

        let out = h.drain();
        assert_eq!(
            out,
            vec![json!({
                "type": "add-edge-cases-from-claude",
                "cases": ["Empty cart", "Payment declined"],
                "frameName": "Checkout"
            })]
        );
    }

    #[tokio::test]
    async fn snapshot_without_action_is_stored_only() {
        let mut h = harness(Some(KEY));
        h.send(json!({"type": "design-data", "data": {"nodes": []}})).await;
        h.send(json!({"type": "design-data", "data": {"action": "typography", "nodes": [1]}}))
            .await;

        assert!(h.drain().is_empty());
        assert_eq!(h.backend.call_count(), 0);
        let stored = h.state.bridge.read().last_design_data.clone().unwrap();
        assert_eq!(stored.payload["nodes"], json!([1]));
    }

    #[tokio::test]
    async fn design_data_without_key_yields_one_diagnostic() {
        for action in ["contrast", "layout", "edge-cases"] {
            let mut h = harness(None);
            h.send(json!({"type": "design-data", "data": {"action": action}})).await;

            let out = h.drain();
            assert_eq!(out.len(), 1, "action {action}");
            let items = match action {
                "edge-cases" => out[0]["cases"].as_array().unwrap().clone(),
                _ => out[0]["fixes"].as_array().unwrap().clone(),
            };
            assert_eq!(items.len(), 1);
            assert!(items[0].to_string().contains("No API key configured"));
            assert_eq!(h.backend.call_count(), 0);
        }
    }

    #[tokio::test]
    async fn provider_failure_becomes_diagnostic_fix() {
        let mut h = harness(Some(KEY));
        h.backend.fail(AiError::Auth("invalid x-api-key".into()));

        h.send(json!({"type": "design-data", "data": {"action": "layout"}})).await;

        let out = h.drain();
        let fixes = out[0]["fixes"].as_array().unwrap();
        assert_eq!(fixes.len(), 1);
        assert_eq!(fixes[0]["issue"], "Analysis failed");
        assert_eq!(fixes[0]["action"], "layout");
        assert!(fixes[0]["description"].as_str().unwrap().contains("invalid x-api-key"));
    }

    #[tokio::test]
    async fn chat_without_key_replies_immediately() {
        let mut h = harness(None);
        let deferred = h
            .router
            .handle_text(&json!({"type": "chat-message", "text": "hi", "history": []}).to_string());

        assert!(deferred.is_none());
        assert_eq!(h.backend.call_count(), 0);
        let out = h.drain();
        assert_eq!(out, vec![json!({"type": "chat-response", "text": NO_KEY_CHAT_REPLY, "fixes": []})]);
        assert!(NO_KEY_CHAT_REPLY.starts_with("No API key configured"));
    }

    #[tokio::test]
    async fn chat_reply_splits_prose_and_fixes() {
        let mut h = harness(Some(KEY));
        h.send(json!({
            "type": "state-update",
            "projects": [{"id": "p1", "name": "Checkout", "goals": ["Reduce drop-off"], "fixes": []}],
            "activeProject": {"id": "p1", "name": "Checkout", "goals": ["Reduce drop-off"], "fixes": []}
        }))
        .await;
        h.backend
            .reply("The button label is unclear.\n```json\n[{\"issue\":\"Vague CTA\",\"nodeId\":\"4:1\"}]\n```");

        h.send(json!({
            "type": "chat-message",
            "text": "what should I fix?",
            "history": [{"role": "user", "content": "hello"}, {"role": "assistant", "content": "Hi!"}],
            "designData": {"nodes": [{"id": "4:1", "type": "TEXT", "characters": "Go"}]}
        }))
        .await;

        let out = h.drain();
        assert_eq!(out[0]["type"], "chat-response");
        assert_eq!(out[0]["text"], "The button label is unclear.");
        assert_eq!(out[0]["fixes"], json!([{"issue": "Vague CTA", "nodeId": "4:1"}]));
        assert!(out[0]["fixes"][0].get("action").is_none());

        let requests = h.backend.requests.lock();
        let (key, request) = &requests[0];
        assert_eq!(key, KEY);
        assert_eq!(request.messages.len(), 3);
        let system = request.system.as_deref().unwrap();
        assert!(system.contains("\"Checkout\""));
        assert!(system.contains("- Reduce drop-off"));
    }

    #[tokio::test]
    async fn chat_provider_failure_still_replies() {
        let mut h = harness(Some(KEY));
        h.backend.fail(AiError::BadRequest {
            status: 400,
            message: "max_tokens too large".into(),
        });

        h.send(json!({"type": "chat-message", "text": "hi"})).await;

        let out = h.drain();
        assert_eq!(out.len(), 1);
        assert!(out[0]["text"].as_str().unwrap().contains("max_tokens too large"));
        assert_eq!(out[0]["fixes"], json!([]));
    }

    #[tokio::test]
    async fn set_api_key_success_and_failure() {
        let mut h = harness(None);

        h.send(json!({"type": "set-api-key", "key": "openai-123"})).await;
        let out = h.drain();
        assert_eq!(out[0]["type"], "api-key-confirmed");
        assert_eq!(out[0]["success"], false);
        assert!(out[0]["error"].as_str().unwrap().contains("sk-ant-"));
        assert!(!h.state.credential.has_key());

        h.send(json!({"type": "set-api-key", "key": "  sk-ant-valid-key \n"})).await;
        let out = h.drain();
        assert_eq!(out, vec![json!({"type": "api-key-confirmed", "success": true})]);
        assert_eq!(h.state.credential.api_key().as_deref(), Some("sk-ant-valid-key"));
    }

    #[tokio::test]
    async fn state_update_and_audit_result_overwrite() {
        let mut h = harness(None);
        h.send(json!({"type": "state-update", "projects": [{"name": "A"}, {"name": "B"}], "activeProject": {"name": "B"}}))
            .await;
        h.send(json!({"type": "state-update", "projects": [{"name": "C"}]})).await;
        h.send(json!({"type": "audit-result", "result": {"score": 72}})).await;

        let bridge = h.state.bridge.read();
        assert_eq!(bridge.projects.len(), 1);
        assert_eq!(bridge.projects[0].name(), Some("C"));
        assert!(bridge.active_project.is_none());
        assert_eq!(bridge.last_audit_result, Some(json!({"score": 72})));
        drop(bridge);
        assert!(h.drain().is_empty());
    }

    #[tokio::test]
    async fn state_update_keeps_projects_verbatim() {
        let mut h = harness(None);
        h.send(json!({"type": "state-update", "projects": [{"name": "A", "color": "red"}]}))
            .await;
        assert_eq!(
            serde_json::to_value(&h.state.bridge.read().projects).unwrap(),
            json!([{"name": "A", "color": "red"}])
        );

        // A project without a usable name still replaces the list
        h.send(json!({
            "type": "state-update",
            "projects": [{"id": "p2", "name": null}],
            "activeProject": {"id": "p2", "name": null}
        }))
        .await;
        let bridge = h.state.bridge.read();
        assert_eq!(
            serde_json::to_value(&bridge.projects).unwrap(),
            json!([{"id": "p2", "name": null}])
        );
        assert_eq!(bridge.active_project.as_ref().unwrap().name(), None);
        drop(bridge);
        assert!(h.drain().is_empty());
    }

    #[tokio::test]
    async fn chat_reply_keeps_quoted_list_in_prose() {
        let mut h = harness(Some(KEY));
        h.backend.reply("Your tab bar shows [\"Home\", \"Settings\"] which is fine.");

        h.send(json!({"type": "chat-message", "text": "is my nav ok?"})).await;

        let out = h.drain();
        assert_eq!(
            out,
            vec![json!({
                "type": "chat-response",
                "text": "Your tab bar shows [\"Home\", \"Settings\"] which is fine.",
                "fixes": []
            })]
        );
    }

    #[tokio::test]
    async fn malformed_frame_is_dropped_and_next_processed() {
        let mut h = harness(None);
        assert!(h.router.handle_text("{not json").is_none());
        assert!(h.router.handle_text(r#"{"type":"self-destruct"}"#).is_none());

        h.send(json!({"type": "chat-message", "text": "still here?"})).await;
        assert_eq!(h.drain().len(), 1);

        let logged = h.state.traffic.lock().get_entries(0, Some(Direction::In));
        assert_eq!(logged[0].message_type, "malformed");
        assert_eq!(logged[2].message_type, "chat-message");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé…");
        assert_eq!(truncate("ok", 5), "ok");
    }
}
