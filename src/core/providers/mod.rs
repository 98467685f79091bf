//! Provider construction from agent configuration.
//!
//! A [`ProviderFactory`] turns an agent configuration, the session's
//! credential set and its canonical tool definitions into a [`ProviderSet`]:
//! either one integrated speech-to-speech backend or the three pipeline
//! stages. Construction does not open connections; sessions connect the
//! providers themselves so failures can be cleaned up in one place.

pub mod dispatch;
pub mod factory;
pub mod instructions;
pub mod voices;

use std::fmt;
use std::sync::Arc;

use crate::config::{AgentConfiguration, OrchestratorConfig};
use crate::core::credentials::CredentialSet;
use crate::core::llm::LanguageModel;
use crate::core::realtime::SpeechToSpeech;
use crate::core::stt::SpeechToText;
use crate::core::tools::ToolDefinition;
use crate::core::tts::TextToSpeech;
use crate::errors::SessionResult;

pub use dispatch::{
    BuiltinLlmProvider, BuiltinSttProvider, BuiltinTtsProvider, resolve_llm_provider,
    resolve_realtime_provider, resolve_stt_provider, resolve_tts_provider,
};
pub use factory::DefaultProviderFactory;
pub use instructions::build_instructions;
pub use voices::map_grok_voice;

/// Provider slot named in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderStage {
    Stt,
    Tts,
    Llm,
    Realtime,
}

impl ProviderStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderStage::Stt => "stt",
            ProviderStage::Tts => "tts",
            ProviderStage::Llm => "llm",
            ProviderStage::Realtime => "realtime",
        }
    }
}

impl fmt::Display for ProviderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three stages of a pipeline session.
#[derive(Clone)]
pub struct PipelineProviders {
    pub stt: Arc<dyn SpeechToText>,
    pub llm: Arc<dyn LanguageModel>,
    pub tts: Arc<dyn TextToSpeech>,
}

/// Backends selected for one session.
#[derive(Clone)]
pub enum ProviderSet {
    Realtime(Arc<dyn SpeechToSpeech>),
    Pipeline(PipelineProviders),
}

impl ProviderSet {
    /// Provider names for logs, e.g. `deepgram+openai+elevenlabs`.
    pub fn describe(&self) -> String {
        match self {
            ProviderSet::Realtime(provider) => provider.provider().to_string(),
            ProviderSet::Pipeline(stages) => format!(
                "{}+{}+{}",
                stages.stt.provider(),
                stages.llm.provider(),
                stages.tts.provider()
            ),
        }
    }
}

/// Builds the provider set for a session. Fails with `UnsupportedProvider`
/// for unknown names and `MissingCredential` for absent keys.
pub trait ProviderFactory: Send + Sync {
    fn build(
        &self,
        agent: &AgentConfiguration,
        credentials: &CredentialSet,
        tools: &[ToolDefinition],
        config: &OrchestratorConfig,
    ) -> SessionResult<ProviderSet>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_display() {
        assert_eq!(ProviderStage::Stt.to_string(), "stt");
        assert_eq!(ProviderStage::Realtime.to_string(), "realtime");
    }
}
