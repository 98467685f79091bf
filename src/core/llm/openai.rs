//! OpenAI chat completions with streamed tool calls.
//!
//! # API Reference
//!
//! - Endpoint: `POST https://api.openai.com/v1/chat/completions`
//! - Auth: `Authorization: Bearer <key>`
//! - Streaming: SSE, `data: [DONE]` terminator
//! - Tools: nested `{type: "function", function: {...}}` dialect

use std::collections::BTreeMap;
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

pub const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Clone)]
pub struct OpenAILLMConfig {
    pub api_key: ApiKey,
    pub model: String,
    pub temperature: f32,
    /// Tool definitions already in the nested dialect
    pub tools: Vec<Value>,
    pub request_timeout: Duration,
    pub base_url: String,
}

impl OpenAILLMConfig {
    pub fn new(api_key: ApiKey, model: impl Into<String>, temperature: f32) -> Self {
        Self {
            api_key,
            model: model.into(),
            temperature,
            tools: Vec::new(),
            request_timeout: Duration::from_secs(30),
            base_url: OPENAI_CHAT_URL.to_string(),
        }
    }
}

// =============================================================================
// Stream Chunks
// =============================================================================

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: FunctionDelta,
}

#[derive(Debug, Default, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Default)]
struct PartialCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Tool call fragments keyed by their index in the response.
#[derive(Debug, Default)]
struct ChatStreamParser {
    calls: BTreeMap<u32, PartialCall>,
}

impl CompletionParser for ChatStreamParser {
    fn on_payload(&mut self, payload: &str) -> ProviderResult<Option<String>> {
        if payload.trim() == "[DONE]" {
            return Ok(None);
        }
        let chunk: ChatChunk = serde_json::from_str(payload)?;
        if let Some(error) = chunk.error {
            return Err(ProviderError::Protocol(format!("OpenAI stream error: {error}")));
        }

        let mut text = String::new();
        for choice in chunk.choices {
            if let Some(content) = choice.delta.content {
                text.push_str(&content);
            }
            for delta in choice.delta.tool_calls {
                let call = self.calls.entry(delta.index).or_default();
                if delta.id.is_some() {
                    call.id = delta.id;
                }
                if let Some(name) = delta.function.name {
                    call.name.push_str(&name);
                }
                if let Some(arguments) = delta.function.arguments {
                    call.arguments.push_str(&arguments);
                }
            }
        }
        Ok(Some(text))
    }

    fn take_tool_calls(&mut self) -> Vec<ToolCall> {
        std::mem::take(&mut self.calls)
            .into_values()
            .filter(|call| !call.name.is_empty())
            .map(|call| assemble_tool_call(call.id, call.name, &call.arguments))
            .collect()
    }
}

// =============================================================================
// Client
// =============================================================================

fn arguments_string(arguments: &Value) -> String {
    match arguments {
        Value::String(raw) => raw.clone(),
        other => other.to_string(),
    }
}

fn message_json(message: &ChatMessage) -> Value {
    match message.role {
        ChatRole::Tool => json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id,
            "content": message.content,
        }),
        ChatRole::Assistant if !message.tool_calls.is_empty() => {
            let calls: Vec<Value> = message
                .tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": arguments_string(&call.arguments),
                        },
                    })
                })
                .collect();
            let content = if message.content.is_empty() {
                Value::Null
            } else {
                json!(message.content)
            };
            json!({"role": "assistant", "content": content, "tool_calls": calls})
        }
        role => json!({"role": role.as_str(), "content": message.content}),
    }
}

pub struct OpenAILLM {
    config: OpenAILLMConfig,
    client: reqwest::Client,
}

impl OpenAILLM {
    pub fn new(config: OpenAILLMConfig) -> ProviderResult<Self> {
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

    pub fn tools(&self) -> &[Value] {
        &self.config.tools
    }

    fn request_body(&self, messages: &[ChatMessage]) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "messages": messages.iter().map(message_json).collect::<Vec<_>>(),
            "temperature": self.config.temperature,
            "stream": true,
        });
        if !self.config.tools.is_empty() {
            body["tools"] = json!(self.config.tools);
            body["tool_choice"] = json!("auto");
        }
        body
    }

    fn build_http_request(&self, messages: &[ChatMessage]) -> reqwest::RequestBuilder {
        self.client
            .post(&self.config.base_url)
            .bearer_auth(self.config.api_key.expose())
            .json(&self.request_body(messages))
    }
}

#[async_trait]
impl LanguageModel for OpenAILLM {
    fn provider(&self) -> &'static str {
        "openai"
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
        debug!(model = %self.config.model, messages = messages.len(), "OpenAI completion");
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            response = self.build_http_request(messages).send() => response?,
        };
        if !response.status().is_success() {
            return Err(ProviderError::from_response(response).await);
        }
        drive_completion(response, &mut ChatStreamParser::default(), &events, &cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sse(payloads: &[&str]) -> String {
        payloads
            .iter()
            .map(|p| format!("data: {p}\n\n"))
            .collect::<String>()
    }

    fn llm(server: &MockServer, tools: Vec<Value>) -> OpenAILLM {
        let mut config = OpenAILLMConfig::new(ApiKey::new("sk-test"), "gpt-4o", 0.7);
        config.base_url = format!("{}/v1/chat/completions", server.uri());
        config.tools = tools;
        OpenAILLM::new(config).unwrap()
    }

    async fn collect(mut rx: mpsc::Receiver<LlmEvent>) -> Vec<LlmEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_parser_assembles_tool_call_fragments() {
        let mut parser = ChatStreamParser::default();
        parser
            .on_payload(r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"crm_lookup_contact","arguments":""}}]}}]}"#)
            .unwrap();
        parser
            .on_payload(r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"phone_number\":"}}]}}]}"#)
            .unwrap();
        parser
            .on_payload(r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"+15551234567\"}"}}]}}]}"#)
            .unwrap();

        let calls = parser.take_tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id.as_deref(), Some("call_1"));
        assert_eq!(calls[0].name, "crm_lookup_contact");
        assert_eq!(calls[0].arguments, json!({"phone_number": "+15551234567"}));
    }

    #[test]
    fn test_stream_error_payload() {
        let mut parser = ChatStreamParser::default();
        assert!(parser.on_payload(r#"{"error":{"message":"overloaded"}}"#).is_err());
    }

    #[test]
    fn test_message_json_dialect() {
        let call = ToolCall::new(Some("c1".into()), "sheets_search", json!({"query": "x"}));
        let assistant = message_json(&ChatMessage::assistant_tool_calls("", vec![call.clone()]));
        assert_eq!(assistant["content"], Value::Null);
        assert_eq!(assistant["tool_calls"][0]["function"]["arguments"], r#"{"query":"x"}"#);

        let tool = message_json(&ChatMessage::tool_result(&call, "{}"));
        assert_eq!(tool["role"], "tool");
        assert_eq!(tool["tool_call_id"], "c1");
    }

    #[tokio::test]
    async fn test_streams_text_deltas() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({"model": "gpt-4o", "stream": true})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "text/event-stream")
                    .set_body_string(sse(&[
                        r#"{"choices":[{"delta":{"role":"assistant","content":"Hello"}}]}"#,
                        r#"{"choices":[{"delta":{"content":" there."}}]}"#,
                        "[DONE]",
                    ])),
            )
            .mount(&server)
            .await;

        let (tx, rx) = mpsc::channel(16);
        llm(&server, Vec::new())
            .stream_completion(&[ChatMessage::user("hi")], tx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            collect(rx).await,
            vec![
                LlmEvent::TextDelta("Hello".into()),
                LlmEvent::TextDelta(" there.".into()),
                LlmEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_sends_tools_in_nested_dialect() {
        let server = MockServer::start().await;
        let tool = json!({"type": "function", "function": {"name": "sheets_search", "description": "d", "parameters": {"type": "object"}}});
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"tools": [tool.clone()], "tool_choice": "auto"})))
            .respond_with(ResponseTemplate::new(200).set_body_string(sse(&[
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c9","function":{"name":"sheets_search","arguments":"{\"query\":\"fries\"}"}}]}}]}"#,
                "[DONE]",
            ])))
            .mount(&server)
            .await;

        let (tx, rx) = mpsc::channel(16);
        llm(&server, vec![tool])
            .stream_completion(&[ChatMessage::user("fries?")], tx, CancellationToken::new())
            .await
            .unwrap();
        let events = collect(rx).await;
        assert_eq!(
            events,
            vec![
                LlmEvent::ToolCalls(vec![ToolCall::new(
                    Some("c9".into()),
                    "sheets_search",
                    json!({"query": "fries"})
                )]),
                LlmEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;
        let (tx, _rx) = mpsc::channel(16);
        let result = llm(&server, Vec::new())
            .stream_completion(&[ChatMessage::user("hi")], tx, CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ProviderError::Http { status: 500, .. })));
    }
}
