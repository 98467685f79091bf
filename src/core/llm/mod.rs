//! Language-model stage of the pipeline.

pub mod gemini;
pub mod openai;
mod sse;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::tools::ToolCall;
use crate::errors::{ProviderError, ProviderResult};

pub use gemini::{GEMINI_API_URL, GeminiLLM, GeminiLLMConfig};
pub use openai::{OPENAI_CHAT_URL, OpenAILLM, OpenAILLMConfig};
pub use sse::SseDecoder;

/// Channel capacity for streamed completion events.
pub const LLM_EVENT_CAPACITY: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
            ChatRole::Tool => "tool",
        }
    }
}

/// One message of the conversational context.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    /// Calls requested by an assistant message
    pub tool_calls: Vec<ToolCall>,
    /// Call answered by a tool message
    pub tool_call_id: Option<String>,
    /// Tool name for tool messages
    pub name: Option<String>,
}

impl ChatMessage {
    fn plain(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::Assistant, content)
    }

    /// Assistant turn that requested tool calls, with any text spoken first.
    pub fn assistant_tool_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::plain(ChatRole::Assistant, content)
        }
    }

    pub fn tool_result(call: &ToolCall, output: impl Into<String>) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            name: Some(call.name.clone()),
            ..Self::plain(ChatRole::Tool, output)
        }
    }
}

/// Streamed completion output.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmEvent {
    TextDelta(String),
    /// The model wants these tools run before it continues
    ToolCalls(Vec<ToolCall>),
    Done,
}

/// Build a call from streamed parts. Arguments that are not valid JSON are
/// kept as a raw string so the call still gets a (failed) result.
pub(crate) fn assemble_tool_call(id: Option<String>, name: String, raw_arguments: &str) -> ToolCall {
    match ToolCall::from_raw(id.clone(), name.clone(), raw_arguments) {
        Ok(call) => call,
        Err(e) => {
            tracing::warn!(tool = %name, error = %e, "Model sent malformed tool arguments");
            ToolCall::new(id, name, serde_json::Value::String(raw_arguments.to_string()))
        }
    }
}

/// Provider-specific interpretation of streamed completion payloads.
pub(crate) trait CompletionParser: Send {
    /// Handle one SSE payload, returning text to speak.
    fn on_payload(&mut self, payload: &str) -> ProviderResult<Option<String>>;

    /// Tool calls assembled over the whole stream.
    fn take_tool_calls(&mut self) -> Vec<ToolCall>;
}

/// Read an SSE completion body to the end, forwarding text deltas as they
/// arrive and tool calls once the stream is complete.
pub(crate) async fn drive_completion<P: CompletionParser>(
    response: reqwest::Response,
    parser: &mut P,
    events: &mpsc::Sender<LlmEvent>,
    cancel: &CancellationToken,
) -> ProviderResult<()> {
    let mut body = response.bytes_stream();
    let mut decoder = SseDecoder::new();
    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            chunk = body.next() => chunk,
        };
        let (payloads, finished) = match chunk {
            Some(Ok(bytes)) => (decoder.push(&bytes), false),
            Some(Err(e)) => return Err(e.into()),
            None => (decoder.finish().into_iter().collect(), true),
        };
        for payload in payloads {
            if let Some(text) = parser.on_payload(&payload)?
                && !text.is_empty()
                && events.send(LlmEvent::TextDelta(text)).await.is_err()
            {
                return Err(ProviderError::Cancelled);
            }
        }
        if finished {
            break;
        }
    }

    let calls = parser.take_tool_calls();
    if !calls.is_empty() && events.send(LlmEvent::ToolCalls(calls)).await.is_err() {
        return Err(ProviderError::Cancelled);
    }
    let _ = events.send(LlmEvent::Done).await;
    Ok(())
}

/// Streaming chat-completion backend. Tool definitions are bound at
/// construction in the provider's own schema dialect.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Provider name as used in agent configuration.
    fn provider(&self) -> &'static str;

    fn model(&self) -> &str;

    /// Stream one completion over `messages`. Ends with `LlmEvent::Done`
    /// unless cancelled, in which case `ProviderError::Cancelled` is returned.
    async fn stream_completion(
        &self,
        messages: &[ChatMessage],
        events: mpsc::Sender<LlmEvent>,
        cancel: CancellationToken,
    ) -> ProviderResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_assemble_tool_call() {
        let call = assemble_tool_call(Some("c".into()), "docs_search_knowledge".into(), r#"{"query":"hours"}"#);
        assert_eq!(call.arguments, json!({"query": "hours"}));
        let broken = assemble_tool_call(None, "docs_search_knowledge".into(), "{\"query\":");
        assert!(broken.arguments.is_string());
    }

    #[test]
    fn test_tool_result_links_call() {
        let call = ToolCall::new(Some("call_1".into()), "crm_lookup_contact", json!({}));
        let message = ChatMessage::tool_result(&call, "{\"success\":true}");
        assert_eq!(message.role, ChatRole::Tool);
        assert_eq!(message.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(message.name.as_deref(), Some("crm_lookup_contact"));
    }
}
