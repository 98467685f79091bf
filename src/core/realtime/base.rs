//! Speech-to-speech capability used by integrated sessions.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::core::tools::ToolCall;
use crate::errors::ProviderResult;

/// Channel capacity for provider events. Audio deltas dominate.
pub const REALTIME_EVENT_CAPACITY: usize = 512;

/// Event surfaced by an integrated provider.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    /// Provider accepted the session configuration
    SessionCreated { session_id: String },
    /// Assistant audio (µ-law 8 kHz) belonging to `item_id`
    Audio { data: Bytes, item_id: String },
    AssistantTranscriptDelta(String),
    /// Complete text of the assistant's current utterance
    AssistantTranscriptDone(String),
    /// Transcription of a finished caller turn
    UserTranscript(String),
    /// Provider VAD detected caller speech
    SpeechStarted,
    ToolCall(ToolCall),
    ResponseDone,
    /// Provider-reported error. The session keeps running.
    Error(String),
    /// Provider connection ended
    Closed,
}

/// A model that hears caller audio and answers with audio, handling turn
/// detection and tool calls on its own.
#[async_trait]
pub trait SpeechToSpeech: Send + Sync {
    /// Provider name as used in agent configuration.
    fn provider(&self) -> &'static str;

    /// Open the provider connection and apply the session configuration.
    async fn connect(&self) -> ProviderResult<mpsc::Receiver<RealtimeEvent>>;

    /// Forward a chunk of µ-law caller audio.
    async fn send_audio(&self, audio: Bytes) -> ProviderResult<()>;

    /// Return a tool result to the conversation. Does not start a response.
    async fn submit_tool_result(&self, call_id: &str, output: String) -> ProviderResult<()>;

    /// Ask the model to respond now.
    async fn create_response(&self) -> ProviderResult<()>;

    /// Stop the response in progress.
    async fn cancel_response(&self) -> ProviderResult<()>;

    /// Cut an assistant item down to the audio the caller actually heard.
    async fn truncate(&self, item_id: &str, audio_end_ms: u64) -> ProviderResult<()>;

    /// Close the connection. Safe to call more than once.
    async fn disconnect(&self) -> ProviderResult<()>;
}
