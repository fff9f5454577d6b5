//! Claude Messages API client.
//!
//! [`AiClient::complete`] is the only entry point the router uses. It builds
//! the request (system prompt, sanitized history, user turn with optional
//! screenshot), sends it through a [`CompletionBackend`], retries transient
//! failures, and bounds the whole exchange with a deadline. It never returns
//! an error: a failed call comes back as a [`Completion`] carrying a
//! diagnostic text and the [`AiError`] that caused it.

use base64::Engine;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::BridgeConfig;
use crate::error_classification::{calculate_backoff_delay, classify_error, classify_status, ErrorKind};
use crate::protocol::ChatTurn;

const ANTHROPIC_VERSION: &str = "2023-06-01";

const BACKOFF_BASE_MS: f64 = 1000.0;
const BACKOFF_MAX_MS: f64 = 30_000.0;
const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Characters of node text kept per entry in the compact index.
const INDEX_TEXT_LIMIT: usize = 120;
/// Entries kept in the compact index.
const INDEX_MAX_ENTRIES: usize = 200;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum AiError {
    Auth(String),
    RateLimited { retry_after_secs: Option<u64>, message: String },
    Server { status: u16, message: String },
    Network(String),
    Timeout,
    InvalidResponse(String),
    BadRequest { status: u16, message: String },
}

impl AiError {
    pub(crate) fn kind(&self) -> ErrorKind {
        match self {
            AiError::Auth(_) => ErrorKind::Auth,
            AiError::RateLimited { .. } => ErrorKind::RateLimit,
            AiError::Server { .. } => ErrorKind::Server,
            AiError::Network(_) => ErrorKind::Network,
            AiError::Timeout => ErrorKind::Network,
            AiError::InvalidResponse(_) => ErrorKind::Unknown,
            AiError::BadRequest { .. } => ErrorKind::Validation,
        }
    }

    /// Map a non-success HTTP status and its body onto an error.
    pub(crate) fn from_status(status: u16, retry_after_secs: Option<u64>, body: &str) -> Self {
        let message = provider_message(body);
        match classify_status(status) {
            ErrorKind::Auth => AiError::Auth(message),
            ErrorKind::RateLimit => AiError::RateLimited { retry_after_secs, message },
            ErrorKind::Server => AiError::Server { status, message },
            ErrorKind::Validation => AiError::BadRequest { status, message },
            // Statuses outside 4xx/5xx: fall back to what the body says
            _ => match classify_error(&message) {
                ErrorKind::RateLimit => AiError::RateLimited { retry_after_secs, message },
                ErrorKind::Server => AiError::Server { status, message },
                _ => AiError::InvalidResponse(format!("unexpected status {status}: {message}")),
            },
        }
    }
}

impl fmt::Display for AiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AiError::Auth(m) => write!(f, "authentication failed: {m}"),
            AiError::RateLimited { message, .. } => write!(f, "rate limited: {message}"),
            AiError::Server { status, message } => write!(f, "server error {status}: {message}"),
            AiError::Network(m) => write!(f, "network error: {m}"),
            AiError::Timeout => write!(f, "request timed out"),
            AiError::InvalidResponse(m) => write!(f, "invalid response: {m}"),
            AiError::BadRequest { status, message } => write!(f, "request rejected ({status}): {message}"),
        }
    }
}

impl std::error::Error for AiError {}

/// `error.message` from a provider error body, else the raw body.
fn provider_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.pointer("/error/message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

// ---------------------------------------------------------------------------
// Wire types (Messages API)
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize)]
pub(crate) struct MessagesRequest {
    pub model: String,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub messages: Vec<ApiMessage>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub(crate) struct ApiMessage {
    pub role: String,
    pub content: Vec<ContentBlock>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ContentBlock {
    Text { text: String },
    Image { source: ImageSource },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub(crate) struct ImageSource {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub media_type: String,
    pub data: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ResponseBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

/// Successful provider answer before any fallback handling.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct RawCompletion {
    pub text: String,
    pub usage: Option<Usage>,
}

// ---------------------------------------------------------------------------
// Request building
// ---------------------------------------------------------------------------

/// A decoded screenshot ready to attach.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ImageAttachment {
    pub media_type: String,
    /// Base64 payload (validated to decode)
    pub data: String,
}

impl ImageAttachment {
    /// Accepts `data:image/png;base64,...` or bare base64. Returns `None` when
    /// the payload does not decode.
    pub(crate) fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (media_type, data) = match raw.strip_prefix("data:") {
            Some(rest) => {
                let (header, data) = rest.split_once(',')?;
                let media_type = header
                    .split(';')
                    .next()
                    .filter(|m| m.starts_with("image/"))
                    .unwrap_or("image/png");
                (media_type.to_string(), data)
            }
            None => ("image/png".to_string(), raw),
        };
        if data.is_empty() {
            return None;
        }
        match base64::engine::general_purpose::STANDARD.decode(data) {
            Ok(bytes) if !bytes.is_empty() => Some(Self {
                media_type,
                data: data.to_string(),
            }),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("Dropping screenshot that is not valid base64: {e}");
                None
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum UserContent {
    Text(String),
    WithImage { text: String, image: ImageAttachment },
}

impl UserContent {
    /// Build the user turn for a chat message.
    ///
    /// With a usable screenshot the design JSON is replaced by the compact
    /// text-node index; otherwise the full design JSON is appended.
    pub(crate) fn for_chat(text: &str, design_data: Option<&Value>, screenshot: Option<&str>) -> Self {
        let image = screenshot.and_then(ImageAttachment::parse);
        match (image, design_data) {
            (Some(image), Some(design)) => {
                let index = compact_index(design);
                let text = if index.is_empty() {
                    text.to_string()
                } else {
                    format!("{text}\n\nText nodes in the screenshot (id: content):\n{index}")
                };
                UserContent::WithImage { text, image }
            }
            (Some(image), None) => UserContent::WithImage {
                text: text.to_string(),
                image,
            },
            (None, Some(design)) => UserContent::Text(format!("{text}\n\nCurrent design data:\n{design}")),
            (None, None) => UserContent::Text(text.to_string()),
        }
    }

    fn text(&self) -> &str {
        match self {
            UserContent::Text(text) | UserContent::WithImage { text, .. } => text,
        }
    }

    fn into_blocks(self, prefix: Option<String>) -> Vec<ContentBlock> {
        let join = |text: String| match &prefix {
            Some(p) => format!("{p}\n\n{text}"),
            None => text,
        };
        match self {
            UserContent::Text(text) => vec![ContentBlock::Text { text: join(text) }],
            UserContent::WithImage { text, image } => vec![
                ContentBlock::Image {
                    source: ImageSource {
                        kind: "base64",
                        media_type: image.media_type,
                        data: image.data,
                    },
                },
                ContentBlock::Text { text: join(text) },
            ],
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct CompletionRequest {
    pub system: Option<String>,
    pub history: Vec<ChatTurn>,
    pub user: UserContent,
    pub max_tokens: u32,
}

/// `id: "content"` lines for every TEXT node in a design snapshot.
pub(crate) fn compact_index(design: &Value) -> String {
    let mut lines = Vec::new();
    collect_text_nodes(design, &mut lines);
    lines.join("\n")
}

fn collect_text_nodes(value: &Value, out: &mut Vec<String>) {
    if out.len() >= INDEX_MAX_ENTRIES {
        return;
    }
    match value {
        Value::Object(map) => {
            let is_text = map.get("type").and_then(Value::as_str) == Some("TEXT");
            let id = map.get("id").and_then(Value::as_str);
            let content = map
                .get("characters")
                .or_else(|| map.get("text"))
                .and_then(Value::as_str);
            if let (true, Some(id), Some(content)) = (is_text, id, content) {
                let mut shown: String = content.chars().take(INDEX_TEXT_LIMIT).collect();
                if content.chars().nth(INDEX_TEXT_LIMIT).is_some() {
                    shown.push('…');
                }
                out.push(format!("{id}: {shown:?}"));
            }
            for child in map.values() {
                collect_text_nodes(child, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_text_nodes(item, out);
            }
        }
        _ => {}
    }
}

/// Keep only non-empty user/assistant turns, merge same-role neighbours and
/// drop leading assistant turns so roles alternate starting with the user.
pub(crate) fn sanitize_history(history: &[ChatTurn]) -> Vec<ChatTurn> {
    let mut out: Vec<ChatTurn> = Vec::new();
    for turn in history {
        if !matches!(turn.role.as_str(), "user" | "assistant") || turn.content.trim().is_empty() {
            continue;
        }
        if out.is_empty() && turn.role == "assistant" {
            continue;
        }
        match out.last_mut() {
            Some(last) if last.role == turn.role => {
                last.content.push_str("\n\n");
                last.content.push_str(&turn.content);
            }
            _ => out.push(turn.clone()),
        }
    }
    out
}

/// Assemble the Messages API body for one call.
pub(crate) fn build_messages_request(model: &str, request: CompletionRequest) -> MessagesRequest {
    let mut history = sanitize_history(&request.history);

    // A trailing user turn would break alternation; fold it into the new turn
    let prefix = match history.last() {
        Some(last) if last.role == "user" => history.pop().map(|t| t.content),
        _ => None,
    };

    let mut messages: Vec<ApiMessage> = history
        .into_iter()
        .map(|turn| ApiMessage {
            role: turn.role,
            content: vec![ContentBlock::Text { text: turn.content }],
        })
        .collect();
    messages.push(ApiMessage {
        role: "user".to_string(),
        content: request.user.into_blocks(prefix),
    });

    MessagesRequest {
        model: model.to_string(),
        max_tokens: request.max_tokens,
        system: request.system.filter(|s| !s.trim().is_empty()),
        messages,
    }
}

// ---------------------------------------------------------------------------
// Backends
// ---------------------------------------------------------------------------

/// Transport for one Messages API call.
pub(crate) trait CompletionBackend: Send + Sync {
    fn send<'a>(
        &'a self,
        api_key: &'a str,
        request: &'a MessagesRequest,
    ) -> BoxFuture<'a, Result<RawCompletion, AiError>>;
}

/// Production backend talking to the Anthropic API over HTTPS.
pub(crate) struct AnthropicBackend {
    client: reqwest::Client,
    base_url: String,
}

impl AnthropicBackend {
    pub(crate) fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn post(&self, api_key: &str, request: &MessagesRequest) -> Result<RawCompletion, AiError> {
        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(request)
            .send()
            .await
            .map_err(|e| AiError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let body = resp.text().await.unwrap_or_default();
            return Err(AiError::from_status(status.as_u16(), retry_after, &body));
        }

        let body: MessagesResponse = resp
            .json()
            .await
            .map_err(|e| AiError::InvalidResponse(e.to_string()))?;

        let text = body
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        Ok(RawCompletion { text, usage: body.usage })
    }
}

impl CompletionBackend for AnthropicBackend {
    fn send<'a>(
        &'a self,
        api_key: &'a str,
        request: &'a MessagesRequest,
    ) -> BoxFuture<'a, Result<RawCompletion, AiError>> {
        Box::pin(self.post(api_key, request))
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Result of [`AiClient::complete`]. `error` is set when `text` is a
/// diagnostic rather than model output.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Completion {
    pub text: String,
    pub usage: Option<Usage>,
    pub error: Option<AiError>,
}

impl Completion {
    fn failed(error: AiError) -> Self {
        Self {
            text: format!("Claude request failed: {error}"),
            usage: None,
            error: Some(error),
        }
    }
}

pub(crate) struct AiClient {
    backend: Arc<dyn CompletionBackend>,
    model: String,
    max_retries: u32,
    timeout: Duration,
    backoff_base_ms: f64,
}

impl AiClient {
    pub(crate) fn new(backend: Arc<dyn CompletionBackend>, config: &BridgeConfig) -> Self {
        Self {
            backend,
            model: config.model.clone(),
            max_retries: config.max_retries,
            timeout: Duration::from_secs(config.ai_timeout_secs.max(1)),
            backoff_base_ms: BACKOFF_BASE_MS,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_backoff_base(mut self, base_ms: f64) -> Self {
        self.backoff_base_ms = base_ms;
        self
    }

    #[cfg(test)]
    pub(crate) fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run one completion. Always yields a result.
    pub(crate) async fn complete(&self, api_key: &str, request: CompletionRequest) -> Completion {
        let preview_len = request.user.text().len();
        let body = build_messages_request(&self.model, request);
        tracing::debug!(
            model = %self.model,
            turns = body.messages.len(),
            user_chars = preview_len,
            "sending completion request"
        );

        match tokio::time::timeout(self.timeout, self.send_with_retry(api_key, &body)).await {
            Ok(Ok(raw)) => {
                if let Some(usage) = &raw.usage {
                    tracing::info!(
                        input_tokens = usage.input_tokens,
                        output_tokens = usage.output_tokens,
                        "completion received"
                    );
                }
                Completion {
                    text: raw.text,
                    usage: raw.usage,
                    error: None,
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(kind = ?e.kind(), "completion failed: {e}");
                Completion::failed(e)
            }
            Err(_) => {
                tracing::warn!("completion timed out after {}s", self.timeout.as_secs());
                Completion::failed(AiError::Timeout)
            }
        }
    }

    async fn send_with_retry(&self, api_key: &str, body: &MessagesRequest) -> Result<RawCompletion, AiError> {
        let mut attempt = 0u32;
        loop {
            match self.backend.send(api_key, body).await {
                Ok(raw) => return Ok(raw),
                Err(e) if e.kind().is_retryable() && attempt < self.max_retries => {
                    let delay_ms = match &e {
                        AiError::RateLimited {
                            retry_after_secs: Some(secs),
                            ..
                        } => (*secs as f64 * 1000.0).min(BACKOFF_MAX_MS),
                        _ => calculate_backoff_delay(attempt, self.backoff_base_ms, BACKOFF_MAX_MS, BACKOFF_MULTIPLIER),
                    };
                    tracing::warn!(
                        kind = ?e.kind(),
                        attempt = attempt + 1,
                        "provider call failed, retrying in {delay_ms:.0}ms: {e}"
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms as u64)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedBackend;
    use super::*;
    use serde_json::json;

    const KEY: &str = "sk-ant-test-key";
    // 1x1 transparent PNG
    const PNG_B64: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNkYAAAAAYAAjCB0C8AAAAASUVORK5CYII=";

    fn turn(role: &str, content: &str) -> ChatTurn {
        ChatTurn {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    fn text_request(text: &str) -> CompletionRequest {
        CompletionRequest {
            system: Some("system".into()),
            history: vec![],
            user: UserContent::Text(text.into()),
            max_tokens: 512,
        }
    }

    fn client_for(backend: Arc<dyn CompletionBackend>, max_retries: u32) -> AiClient {
        let config = BridgeConfig {
            max_retries,
            ..BridgeConfig::default()
        };
        AiClient::new(backend, &config).with_backoff_base(1.0)
    }

    // --- request building ---

    #[test]
    fn history_is_filtered_and_merged() {
        let history = vec![
            turn("assistant", "leading greeting"),
            turn("user", "a"),
            turn("system", "ignored"),
            turn("user", "b"),
            turn("assistant", "   "),
            turn("assistant", "c"),
        ];
        let clean = sanitize_history(&history);
        assert_eq!(clean, vec![turn("user", "a\n\nb"), turn("assistant", "c")]);
    }

    #[test]
    fn trailing_user_turn_folds_into_new_message() {
        let request = CompletionRequest {
            system: None,
            history: vec![turn("user", "earlier"), turn("assistant", "ok"), turn("user", "pending")],
            user: UserContent::Text("now".into()),
            max_tokens: 100,
        };
        let body = build_messages_request("m", request);
        assert_eq!(body.messages.len(), 3);
        assert_eq!(body.messages[2].role, "user");
        assert_eq!(
            body.messages[2].content,
            vec![ContentBlock::Text {
                text: "pending\n\nnow".into()
            }]
        );
        assert!(body.system.is_none());
    }

    #[test]
    fn request_serializes_to_messages_api_shape() {
        let body = build_messages_request("claude-x", text_request("hello"));
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "model": "claude-x",
                "max_tokens": 512,
                "system": "system",
                "messages": [{"role": "user", "content": [{"type": "text", "text": "hello"}]}]
            })
        );
    }

    #[test]
    fn image_turn_uses_compact_index_instead_of_full_dump() {
        let design = json!({
            "nodes": [
                {"id": "1:2", "type": "TEXT", "characters": "Sign in", "fills": [{"r": 1}]},
                {"id": "1:3", "type": "FRAME", "children": [
                    {"id": "1:4", "type": "TEXT", "text": "Forgot password?"}
                ]},
                {"id": "1:5", "type": "RECTANGLE"}
            ]
        });
        let data_url = format!("data:image/jpeg;base64,{PNG_B64}");
        let user = UserContent::for_chat("fix this", Some(&design), Some(&data_url));
        let UserContent::WithImage { text, image } = user else {
            panic!("expected image content");
        };
        assert_eq!(image.media_type, "image/jpeg");
        assert!(text.contains("1:2: \"Sign in\""));
        assert!(text.contains("1:4: \"Forgot password?\""));
        assert!(!text.contains("fills"));
        assert!(!text.contains("1:5"));

        let body = build_messages_request("m", CompletionRequest {
            system: None,
            history: vec![],
            user: UserContent::WithImage { text, image },
            max_tokens: 1,
        });
        let wire = serde_json::to_value(&body).unwrap();
        assert_eq!(wire["messages"][0]["content"][0]["type"], "image");
        assert_eq!(wire["messages"][0]["content"][0]["source"]["type"], "base64");
        assert_eq!(wire["messages"][0]["content"][1]["type"], "text");
    }

    #[test]
    fn invalid_screenshot_degrades_to_full_dump() {
        let design = json!({"nodes": [{"id": "1:2", "type": "TEXT", "characters": "Hi"}]});
        let user = UserContent::for_chat("look", Some(&design), Some("data:image/png;base64,@@not base64@@"));
        match user {
            UserContent::Text(text) => {
                assert!(text.starts_with("look\n\nCurrent design data:\n"));
                assert!(text.contains("\"characters\":\"Hi\""));
            }
            other => panic!("expected text content, got {other:?}"),
        }
    }

    #[test]
    fn bare_base64_defaults_to_png() {
        let image = ImageAttachment::parse(PNG_B64).unwrap();
        assert_eq!(image.media_type, "image/png");
        assert!(ImageAttachment::parse("").is_none());
        assert!(ImageAttachment::parse("data:image/png;base64,").is_none());
        assert!(ImageAttachment::parse("data:nocomma").is_none());
    }

    #[test]
    fn compact_index_truncates_and_caps() {
        let long = "x".repeat(500);
        let nodes: Vec<Value> = (0..300)
            .map(|i| json!({"id": format!("n{i}"), "type": "TEXT", "characters": long}))
            .collect();
        let index = compact_index(&json!({ "nodes": nodes }));
        let lines: Vec<&str> = index.lines().collect();
        assert_eq!(lines.len(), INDEX_MAX_ENTRIES);
        assert!(lines[0].starts_with("n0: \""));
        assert!(lines[0].chars().count() < 140);
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(AiError::from_status(401, None, ""), AiError::Auth(_)));
        assert_eq!(
            AiError::from_status(429, Some(3), r#"{"error":{"type":"rate_limit_error","message":"slow down"}}"#),
            AiError::RateLimited {
                retry_after_secs: Some(3),
                message: "slow down".into()
            }
        );
        assert!(matches!(AiError::from_status(529, None, "overloaded"), AiError::Server { status: 529, .. }));
        assert!(matches!(AiError::from_status(400, None, "bad"), AiError::BadRequest { status: 400, .. }));
        assert!(matches!(AiError::from_status(302, None, ""), AiError::InvalidResponse(_)));
        assert!(matches!(AiError::from_status(302, None, "Overloaded"), AiError::Server { status: 302, .. }));
    }

    // --- client behaviour with a scripted backend ---

    #[tokio::test]
    async fn complete_returns_text_and_usage() {
        let backend = ScriptedBackend::new();
        backend.reply("hello there");
        let client = client_for(backend.clone(), 2);

        let completion = client.complete(KEY, text_request("hi")).await;
        assert_eq!(completion.text, "hello there");
        assert!(completion.error.is_none());
        assert_eq!(completion.usage.unwrap().output_tokens, 20);
        assert_eq!(backend.requests.lock()[0].0, KEY);
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let backend = ScriptedBackend::new();
        backend.fail(AiError::Server {
            status: 529,
            message: "overloaded".into(),
        });
        backend.fail(AiError::Network("connection reset".into()));
        backend.reply("third time lucky");
        let client = client_for(backend.clone(), 2);

        let completion = client.complete(KEY, text_request("hi")).await;
        assert_eq!(completion.text, "third time lucky");
        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test]
    async fn retries_stop_at_limit_and_fall_back() {
        let backend = ScriptedBackend::new();
        for _ in 0..3 {
            backend.fail(AiError::Server {
                status: 500,
                message: "boom".into(),
            });
        }
        let client = client_for(backend.clone(), 1);

        let completion = client.complete(KEY, text_request("hi")).await;
        assert_eq!(backend.call_count(), 2);
        assert!(matches!(completion.error, Some(AiError::Server { status: 500, .. })));
        assert!(completion.text.starts_with("Claude request failed"));
    }

    #[tokio::test]
    async fn auth_errors_are_not_retried() {
        let backend = ScriptedBackend::new();
        backend.fail(AiError::Auth("invalid x-api-key".into()));
        let client = client_for(backend.clone(), 3);

        let completion = client.complete(KEY, text_request("hi")).await;
        assert_eq!(backend.call_count(), 1);
        assert!(matches!(completion.error, Some(AiError::Auth(_))));
    }

    struct HangingBackend;

    impl CompletionBackend for HangingBackend {
        fn send<'a>(&'a self, _: &'a str, _: &'a MessagesRequest) -> BoxFuture<'a, Result<RawCompletion, AiError>> {
            Box::pin(futures_util::future::pending())
        }
    }

    #[tokio::test]
    async fn hanging_backend_times_out() {
        let client = client_for(Arc::new(HangingBackend), 0).with_timeout(Duration::from_millis(20));
        let completion = client.complete(KEY, text_request("hi")).await;
        assert_eq!(completion.error, Some(AiError::Timeout));
    }

    // --- HTTP backend against a mock server ---

    #[tokio::test]
    async fn anthropic_backend_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/messages")
            .match_header("x-api-key", KEY)
            .match_header("anthropic-version", ANTHROPIC_VERSION)
            .match_body(mockito::Matcher::PartialJson(json!({"model": "claude-test", "max_tokens": 512})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"id":"msg_1","type":"message","role":"assistant","content":[{"type":"text","text":"Found "},{"type":"text","text":"nothing."}],"usage":{"input_tokens":12,"output_tokens":3}}"#,
            )
            .create_async()
            .await;

        let config = BridgeConfig {
            model: "claude-test".into(),
            api_base_url: server.url(),
            ..BridgeConfig::default()
        };
        let backend = Arc::new(AnthropicBackend::new(reqwest::Client::new(), &config.api_base_url));
        let client = AiClient::new(backend, &config);

        let completion = client.complete(KEY, text_request("hi")).await;
        mock.assert_async().await;
        assert_eq!(completion.text, "Found nothing.");
        assert_eq!(completion.usage, Some(Usage { input_tokens: 12, output_tokens: 3 }));
    }

    #[tokio::test]
    async fn anthropic_backend_auth_failure() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/messages")
            .with_status(401)
            .with_body(r#"{"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#)
            .create_async()
            .await;

        let backend = AnthropicBackend::new(reqwest::Client::new(), &server.url());
        let body = build_messages_request("m", text_request("hi"));
        let err = backend.send(KEY, &body).await.unwrap_err();
        assert_eq!(err, AiError::Auth("invalid x-api-key".into()));
    }

    #[tokio::test]
    async fn anthropic_backend_rate_limit_then_success() {
        let mut server = mockito::Server::new_async().await;
        let limited = server
            .mock("POST", "/v1/messages")
            .with_status(429)
            .with_header("retry-after", "0")
            .with_body(r#"{"type":"error","error":{"type":"rate_limit_error","message":"slow down"}}"#)
            .expect(1)
            .create_async()
            .await;
        let ok = server
            .mock("POST", "/v1/messages")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"content":[{"type":"text","text":"done"}]}"#)
            .expect(1)
            .create_async()
            .await;

        let config = BridgeConfig {
            api_base_url: server.url(),
            max_retries: 2,
            ..BridgeConfig::default()
        };
        let backend = Arc::new(AnthropicBackend::new(reqwest::Client::new(), &config.api_base_url));
        let client = AiClient::new(backend, &config);

        let completion = client.complete(KEY, text_request("hi")).await;
        limited.assert_async().await;
        ok.assert_async().await;
        assert_eq!(completion.text, "done");
        assert!(completion.usage.is_none());
    }

    #[tokio::test]
    async fn anthropic_backend_unreachable_is_network_error() {
        // Port 9 (discard) on localhost is not listening in test environments
        let backend = AnthropicBackend::new(reqwest::Client::new(), "http://127.0.0.1:9");
        let body = build_messages_request("m", text_request("hi"));
        let err = backend.send(KEY, &body).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
    }
}
