//! Google Gemini `streamGenerateContent` backend.
//!
//! Gemini has no tool call ids. Calls are matched to responses by function
//! name, so results are sent back as `functionResponse` parts carrying the
//! tool name from the originating call.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{
    ChatMessage, ChatRole, CompletionParser, LanguageModel, LlmEvent, assemble_tool_call,
    drive_completion,
};
use crate::core::credentials::ApiKey;
use crate::core::tools::ToolCall;
use crate::errors::{ProviderError, ProviderResult};

pub const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Debug, Clone)]
pub struct GeminiLLMConfig {
    pub api_key: ApiKey,
    pub model: String,
    pub temperature: f32,
    /// Function declarations in the flat dialect
    pub tools: Vec<Value>,
    pub request_timeout: Duration,
    pub base_url: String,
}

impl GeminiLLMConfig {
    pub fn new(api_key: ApiKey, model: impl Into<String>, temperature: f32) -> Self {
        Self {
            api_key,
            model: model.into(),
            temperature,
            tools: Vec::new(),
            request_timeout: Duration::from_secs(30),
            base_url: GEMINI_API_URL.to_string(),
        }
    }
}

// =============================================================================
// Stream Chunks
// =============================================================================

#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    function_call: Option<FunctionCall>,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

/// Gemini sends each function call whole, in a single chunk.
#[derive(Debug, Default)]
struct GeminiStreamParser {
    calls: Vec<ToolCall>,
}

impl CompletionParser for GeminiStreamParser {
    fn on_payload(&mut self, payload: &str) -> ProviderResult<Option<String>> {
        let chunk: GenerateChunk = serde_json::from_str(payload)?;
        if let Some(error) = chunk.error {
            return Err(ProviderError::Protocol(format!("Gemini stream error: {error}")));
        }

        let mut text = String::new();
        let parts = chunk
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts)
            .unwrap_or_default();
        for part in parts {
            if let Some(delta) = part.text {
                text.push_str(&delta);
            }
            if let Some(call) = part.function_call {
                let call = match call.args {
                    Value::Null => ToolCall::new(None, call.name, json!({})),
                    Value::String(raw) => assemble_tool_call(None, call.name, &raw),
                    args => ToolCall::new(None, call.name, args),
                };
                self.calls.push(call);
            }
        }
        Ok(Some(text))
    }

    fn take_tool_calls(&mut self) -> Vec<ToolCall> {
        std::mem::take(&mut self.calls)
    }
}

// =============================================================================
// Request Body
// =============================================================================

/// Tool output is JSON text; Gemini wants an object in `response`.
fn function_response(output: &str) -> Value {
    match serde_json::from_str::<Value>(output) {
        Ok(Value::Object(map)) => Value::Object(map),
        Ok(other) => json!({"result": other}),
        Err(_) => json!({"result": output}),
    }
}

fn content_json(message: &ChatMessage) -> Option<Value> {
    match message.role {
        ChatRole::System => None,
        ChatRole::User => Some(json!({"role": "user", "parts": [{"text": message.content}]})),
        ChatRole::Assistant => {
            let mut parts = Vec::new();
            if !message.content.is_empty() {
                parts.push(json!({"text": message.content}));
            }
            for call in &message.tool_calls {
                parts.push(json!({"functionCall": {"name": call.name, "args": call.arguments}}));
            }
            Some(json!({"role": "model", "parts": parts}))
        }
        ChatRole::Tool => Some(json!({
            "role": "user",
            "parts": [{"functionResponse": {
                "name": message.name.as_deref().unwrap_or_default(),
                "response": function_response(&message.content),
            }}],
        })),
    }
}

pub struct GeminiLLM {
    config: GeminiLLMConfig,
    client: reqwest::Client,
}

impl GeminiLLM {
    pub fn new(config: GeminiLLMConfig) -> ProviderResult<Self> {
        if config.api_key.expose().is_empty() {
            return Err(ProviderError::AuthenticationFailed(
                "API key is required".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }

    fn request_body(&self, messages: &[ChatMessage]) -> Value {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str())
            .collect();
        let mut body = json!({
            "contents": messages.iter().filter_map(content_json).collect::<Vec<_>>(),
            "generationConfig": {"temperature": self.config.temperature},
        });
        if !system.is_empty() {
            body["systemInstruction"] = json!({"parts": [{"text": system.join("\n\n")}]});
        }
        if !self.config.tools.is_empty() {
            body["tools"] = json!([{"functionDeclarations": self.config.tools}]);
        }
        body
    }

    fn build_http_request(&self, messages: &[ChatMessage]) -> reqwest::RequestBuilder {
        self.client
            .post(self.endpoint())
            .query(&[("alt", "sse"), ("key", self.config.api_key.expose())])
            .json(&self.request_body(messages))
    }
}

#[async_trait]
impl LanguageModel for GeminiLLM {
    fn provider(&self) -> &'static str {
        "google"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn stream_completion(
        &self,
        messages: &[ChatMessage],
        events: mpsc::Sender<LlmEvent>,
        cancel: CancellationToken,
    ) -> ProviderResult<()> {
        debug!(model = %self.config.model, messages = messages.len(), "Gemini completion");
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            response = self.build_http_request(messages).send() => response?,
        };
        if !response.status().is_success() {
            return Err(ProviderError::from_response(response).await);
        }
        drive_completion(response, &mut GeminiStreamParser::default(), &events, &cancel).await
    }
}
