//! Speech-to-text capability shared by pipeline STT backends.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::errors::ProviderResult;

/// Channel capacity for recognition events.
pub const STT_EVENT_CAPACITY: usize = 256;

/// Event emitted by a recognizer.
#[derive(Debug, Clone, PartialEq)]
pub enum SttEvent {
    /// Recognized text. `speech_final` marks the end of the caller's utterance.
    Transcript {
        text: String,
        is_final: bool,
        speech_final: bool,
    },
    /// Provider-side voice activity detected caller speech
    SpeechStarted,
    /// Provider-side end of utterance after a final transcript
    UtteranceEnd,
}

impl SttEvent {
    pub fn final_transcript(text: impl Into<String>) -> Self {
        SttEvent::Transcript {
            text: text.into(),
            is_final: true,
            speech_final: true,
        }
    }
}

/// Streaming speech recognizer for µ-law 8 kHz caller audio.
///
/// All methods take `&self`; implementations keep connection state behind
/// interior mutability so a session can share one instance across tasks.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Provider name as used in agent configuration.
    fn provider(&self) -> &'static str;

    /// Open the recognizer. Events arrive on the returned channel until
    /// `disconnect` or the provider closes the stream.
    async fn connect(&self) -> ProviderResult<mpsc::Receiver<SttEvent>>;

    /// Forward a chunk of caller audio.
    async fn send_audio(&self, audio: Bytes) -> ProviderResult<()>;

    /// Local VAD saw the caller stop talking. Streaming recognizers segment
    /// on their own; batch recognizers transcribe the buffered utterance here.
    async fn end_of_speech(&self) -> ProviderResult<()> {
        Ok(())
    }

    /// Close the recognizer. Safe to call more than once.
    async fn disconnect(&self) -> ProviderResult<()>;
}
