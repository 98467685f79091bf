mod base;
pub mod elevenlabs;
pub mod google;

pub use base::{AUDIO_CHUNK_BYTES, TextToSpeech};
pub use elevenlabs::{ELEVENLABS_TTS_URL, ElevenLabsTTS, ElevenLabsTTSConfig};
pub use google::{GOOGLE_TTS_URL, GoogleTTS, GoogleTTSConfig};

/// Supported TTS providers
pub fn get_supported_tts_providers() -> Vec<&'static str> {
    vec!["elevenlabs", "google"]
}
