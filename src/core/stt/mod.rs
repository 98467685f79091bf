mod base;
pub mod deepgram;
pub mod google;

pub use base::{STT_EVENT_CAPACITY, SpeechToText, SttEvent};
pub use deepgram::{DEEPGRAM_STT_URL, DeepgramSTT, DeepgramSTTConfig};
pub use google::{GOOGLE_STT_URL, GoogleSTT, GoogleSTTConfig};

/// Supported STT providers
pub fn get_supported_stt_providers() -> Vec<&'static str> {
    vec!["deepgram", "google"]
}
