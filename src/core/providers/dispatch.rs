//! Provider name resolution.
//!
//! Agent configurations name providers as free-form strings. These maps
//! resolve names and aliases to the built-in backends.

use phf::phf_map;

use crate::core::realtime::RealtimeVendor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinSttProvider {
    Deepgram,
    Google,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinTtsProvider {
    ElevenLabs,
    Google,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinLlmProvider {
    OpenAI,
    Google,
    /// Not wired up; served by OpenAI instead
    Cerebras,
}

pub static STT_PROVIDER_MAP: phf::Map<&'static str, BuiltinSttProvider> = phf_map! {
    "deepgram" => BuiltinSttProvider::Deepgram,
    "google" => BuiltinSttProvider::Google,
    // Aliases
    "google-stt" => BuiltinSttProvider::Google,
};

pub static TTS_PROVIDER_MAP: phf::Map<&'static str, BuiltinTtsProvider> = phf_map! {
    "elevenlabs" => BuiltinTtsProvider::ElevenLabs,
    "google" => BuiltinTtsProvider::Google,
    // Aliases
    "eleven-labs" => BuiltinTtsProvider::ElevenLabs,
    "eleven_labs" => BuiltinTtsProvider::ElevenLabs,
    "google-tts" => BuiltinTtsProvider::Google,
};

pub static LLM_PROVIDER_MAP: phf::Map<&'static str, BuiltinLlmProvider> = phf_map! {
    "openai" => BuiltinLlmProvider::OpenAI,
    "google" => BuiltinLlmProvider::Google,
    "cerebras" => BuiltinLlmProvider::Cerebras,
    // Aliases
    "openai-realtime" => BuiltinLlmProvider::OpenAI,
    "gemini" => BuiltinLlmProvider::Google,
};

pub static REALTIME_PROVIDER_MAP: phf::Map<&'static str, RealtimeVendor> = phf_map! {
    "openai" => RealtimeVendor::OpenAI,
    "grok" => RealtimeVendor::Grok,
    "xai" => RealtimeVendor::Grok,
};

// Maps are keyed by lowercase names.
fn normalize(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

pub fn resolve_stt_provider(name: &str) -> Option<BuiltinSttProvider> {
    STT_PROVIDER_MAP.get(normalize(name).as_str()).copied()
}

pub fn resolve_tts_provider(name: &str) -> Option<BuiltinTtsProvider> {
    TTS_PROVIDER_MAP.get(normalize(name).as_str()).copied()
}

pub fn resolve_llm_provider(name: &str) -> Option<BuiltinLlmProvider> {
    LLM_PROVIDER_MAP.get(normalize(name).as_str()).copied()
}

pub fn resolve_realtime_provider(name: &str) -> Option<RealtimeVendor> {
    REALTIME_PROVIDER_MAP.get(normalize(name).as_str()).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_is_case_insensitive() {
        assert_eq!(resolve_stt_provider("Deepgram"), Some(BuiltinSttProvider::Deepgram));
        assert_eq!(resolve_tts_provider(" ElevenLabs "), Some(BuiltinTtsProvider::ElevenLabs));
        assert_eq!(resolve_realtime_provider("XAI"), Some(RealtimeVendor::Grok));
    }

    #[test]
    fn test_aliases() {
        assert_eq!(resolve_llm_provider("openai-realtime"), Some(BuiltinLlmProvider::OpenAI));
        assert_eq!(resolve_llm_provider("gemini"), Some(BuiltinLlmProvider::Google));
        assert_eq!(resolve_realtime_provider("grok"), Some(RealtimeVendor::Grok));
    }

    #[test]
    fn test_unknown_names() {
        assert_eq!(resolve_stt_provider("whisper"), None);
        assert_eq!(resolve_tts_provider("polly"), None);
        assert_eq!(resolve_llm_provider("anthropic"), None);
        assert_eq!(resolve_realtime_provider("hume"), None);
    }
}
