//! Per-call agent configuration.
//!
//! An agent configuration is the flat option mapping stored with a voice agent.
//! Every option has a default, so a partial mapping always deserializes; problems
//! surface later when a provider needs a credential or a provider-specific value.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::ConfigError;

pub const DEFAULT_STT_PROVIDER: &str = "deepgram";
pub const DEFAULT_STT_MODEL: &str = "nova-3";
pub const DEFAULT_TTS_PROVIDER: &str = "elevenlabs";
pub const DEFAULT_TTS_MODEL: &str = "eleven_turbo_v2_5";
pub const DEFAULT_TTS_VOICE_ID: &str = "21m00Tcm4TlvDq8ikWAM";
pub const DEFAULT_LLM_PROVIDER: &str = "openai";
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o";
pub const DEFAULT_VOICE: &str = "marin";
pub const DEFAULT_LANGUAGE: &str = "en-US";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful voice assistant.";

/// Pipeline sessions sample a little warmer than integrated ones.
pub const DEFAULT_PIPELINE_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_REALTIME_TEMPERATURE: f32 = 0.6;

/// Which session shape an agent configuration selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// One speech-to-speech provider handles audio, turns and reasoning
    Realtime,
    /// Separate STT, LLM and TTS stages
    Pipeline,
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMode::Realtime => "realtime",
            SessionMode::Pipeline => "pipeline",
        }
    }
}

/// Turn detection tuning shared by provider-side and local VAD.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TurnDetectionSettings {
    /// Speech activation threshold (0.0 to 1.0)
    pub threshold: f32,
    /// Audio kept before detected speech onset
    pub prefix_padding_ms: u32,
    /// Silence required to end a turn
    pub silence_duration_ms: u32,
}

/// Immutable configuration of one voice agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfiguration {
    pub stt_provider: String,
    pub stt_model: String,
    pub tts_provider: String,
    pub tts_model: String,
    pub tts_voice_id: String,
    pub llm_provider: String,
    pub llm_model: String,

    /// Selects integrated speech-to-speech mode when set
    #[serde(alias = "realtime")]
    pub realtime_provider: Option<String>,
    pub realtime_model: Option<String>,

    /// Integrated-mode voice, in OpenAI voice vocabulary
    pub voice: String,
    pub temperature: Option<f32>,

    pub turn_detection_threshold: f32,
    pub turn_detection_prefix_padding_ms: u32,
    pub turn_detection_silence_duration_ms: u32,

    pub enabled_tools: Vec<String>,
    pub initial_greeting: Option<String>,
    pub language: String,
    pub system_prompt: String,
    pub timezone: Option<String>,
}

impl Default for AgentConfiguration {
    fn default() -> Self {
        Self {
            stt_provider: DEFAULT_STT_PROVIDER.to_string(),
            stt_model: DEFAULT_STT_MODEL.to_string(),
            tts_provider: DEFAULT_TTS_PROVIDER.to_string(),
            tts_model: DEFAULT_TTS_MODEL.to_string(),
            tts_voice_id: DEFAULT_TTS_VOICE_ID.to_string(),
            llm_provider: DEFAULT_LLM_PROVIDER.to_string(),
            llm_model: DEFAULT_LLM_MODEL.to_string(),
            realtime_provider: None,
            realtime_model: None,
            voice: DEFAULT_VOICE.to_string(),
            temperature: None,
            turn_detection_threshold: 0.7,
            turn_detection_prefix_padding_ms: 200,
            turn_detection_silence_duration_ms: 600,
            enabled_tools: Vec::new(),
            initial_greeting: None,
            language: DEFAULT_LANGUAGE.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            timezone: None,
        }
    }
}

impl AgentConfiguration {
    /// Parse from a JSON option mapping.
    pub fn from_json(value: serde_json::Value) -> Result<Self, ConfigError> {
        Ok(serde_json::from_value(value)?)
    }

    /// Parse from a YAML document.
    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Load from a `.json`, `.yaml` or `.yml` file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Ok(serde_json::from_str(&contents)?),
            _ => Self::from_yaml_str(&contents),
        }
    }

    /// Integrated provider name, if integrated mode is selected.
    pub fn realtime_provider(&self) -> Option<&str> {
        self.realtime_provider
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }

    pub fn mode(&self) -> SessionMode {
        if self.realtime_provider().is_some() {
            SessionMode::Realtime
        } else {
            SessionMode::Pipeline
        }
    }

    /// Sampling temperature with the mode-specific default applied.
    pub fn effective_temperature(&self) -> f32 {
        self.temperature.unwrap_or(match self.mode() {
            SessionMode::Realtime => DEFAULT_REALTIME_TEMPERATURE,
            SessionMode::Pipeline => DEFAULT_PIPELINE_TEMPERATURE,
        })
    }

    /// Greeting text, ignoring blank values.
    pub fn initial_greeting(&self) -> Option<&str> {
        self.initial_greeting
            .as_deref()
            .map(str::trim)
            .filter(|g| !g.is_empty())
    }

    pub fn timezone_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.timezone
            .as_deref()
            .map(str::trim)
            .filter(|tz| !tz.is_empty())
            .unwrap_or(fallback)
    }

    pub fn turn_detection(&self) -> TurnDetectionSettings {
        TurnDetectionSettings {
            threshold: self.turn_detection_threshold.clamp(0.0, 1.0),
            prefix_padding_ms: self.turn_detection_prefix_padding_ms,
            silence_duration_ms: self.turn_detection_silence_duration_ms,
        }
    }
}
