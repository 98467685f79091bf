//! Default provider factory.

use std::sync::Arc;

use tracing::{debug, warn};

use super::dispatch::{
    BuiltinLlmProvider, BuiltinSttProvider, BuiltinTtsProvider, resolve_llm_provider,
    resolve_realtime_provider, resolve_stt_provider, resolve_tts_provider,
};
use super::instructions::build_instructions;
use super::voices::map_grok_voice;
use super::{PipelineProviders, ProviderFactory, ProviderSet, ProviderStage};
use crate::config::agent::DEFAULT_STT_MODEL;
use crate::config::{AgentConfiguration, OrchestratorConfig};
use crate::core::credentials::CredentialSet;
use crate::core::llm::{GeminiLLM, GeminiLLMConfig, LanguageModel, OpenAILLM, OpenAILLMConfig};
use crate::core::realtime::{RealtimeClient, RealtimeClientConfig, RealtimeVendor, SpeechToSpeech};
use crate::core::stt::{DeepgramSTT, DeepgramSTTConfig, GoogleSTT, GoogleSTTConfig, SpeechToText};
use crate::core::tools::schema::render_all;
use crate::core::tools::{ToolDefinition, ToolSchemaDialect};
use crate::core::tts::{
    ElevenLabsTTS, ElevenLabsTTSConfig, GoogleTTS, GoogleTTSConfig, TextToSpeech,
};
use crate::errors::{ProviderError, SessionError, SessionResult};

/// Chat model used whenever the configured OpenAI model cannot serve chat
/// completions.
pub const OPENAI_FALLBACK_MODEL: &str = "gpt-4o";
pub const GEMINI_DEFAULT_MODEL: &str = "gemini-2.0-flash-exp";

/// Credential-store key shared by every Google stage.
const GOOGLE_CREDENTIAL: &str = "google";

/// Builds the built-in HTTP and WebSocket backends.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultProviderFactory;

impl DefaultProviderFactory {
    pub fn new() -> Self {
        Self
    }

    fn build_realtime(
        &self,
        name: &str,
        agent: &AgentConfiguration,
        credentials: &CredentialSet,
        tools: &[ToolDefinition],
        config: &OrchestratorConfig,
    ) -> SessionResult<Arc<dyn SpeechToSpeech>> {
        let vendor = resolve_realtime_provider(name).ok_or_else(|| unsupported(ProviderStage::Realtime, name))?;
        let api_key = credentials.require(vendor.credential_provider())?.clone();

        let mut client_config = RealtimeClientConfig::new(vendor, api_key);
        if let Some(model) = non_blank(agent.realtime_model.as_deref()) {
            client_config.model = model.to_string();
        }
        client_config.voice = match vendor {
            RealtimeVendor::OpenAI => agent.voice.clone(),
            RealtimeVendor::Grok => {
                let mapped = map_grok_voice(&agent.voice);
                debug!(voice = %agent.voice, mapped, "Mapped voice for Grok");
                mapped.to_string()
            }
        };
        client_config.instructions = build_instructions(
            &agent.system_prompt,
            agent.initial_greeting(),
            &agent.language,
            agent.timezone_or(&config.default_timezone),
        );
        client_config.temperature = agent.effective_temperature();
        client_config.turn_detection = agent.turn_detection();
        client_config.tools = tools.to_vec();
        client_config.connect_timeout = config.connect_timeout;

        let client = RealtimeClient::new(client_config).map_err(|e| invalid(vendor.as_str(), e))?;
        Ok(Arc::new(client))
    }

    fn build_stt(
        &self,
        agent: &AgentConfiguration,
        credentials: &CredentialSet,
        config: &OrchestratorConfig,
    ) -> SessionResult<Arc<dyn SpeechToText>> {
        let name = agent.stt_provider.as_str();
        match resolve_stt_provider(name).ok_or_else(|| unsupported(ProviderStage::Stt, name))? {
            BuiltinSttProvider::Deepgram => {
                let api_key = credentials.require("deepgram")?.clone();
                let mut stt_config = DeepgramSTTConfig::new(api_key, &agent.stt_model, &agent.language);
                stt_config.connect_timeout = config.connect_timeout;
                let stt = DeepgramSTT::new(stt_config).map_err(|e| invalid("deepgram", e))?;
                Ok(Arc::new(stt))
            }
            BuiltinSttProvider::Google => {
                let api_key = credentials.require(GOOGLE_CREDENTIAL)?.clone();
                let mut stt_config = GoogleSTTConfig::new(api_key, &agent.language);
                // The default model name is a Deepgram model.
                if agent.stt_model != DEFAULT_STT_MODEL {
                    stt_config.model = non_blank(Some(&agent.stt_model)).map(str::to_string);
                }
                stt_config.request_timeout = config.provider_timeout;
                let stt = GoogleSTT::new(stt_config).map_err(|e| invalid("google", e))?;
                Ok(Arc::new(stt))
            }
        }
    }

    fn build_llm(
        &self,
        agent: &AgentConfiguration,
        credentials: &CredentialSet,
        tools: &[ToolDefinition],
        config: &OrchestratorConfig,
    ) -> SessionResult<Arc<dyn LanguageModel>> {
        let name = agent.llm_provider.as_str();
        let temperature = agent.effective_temperature();
        let provider = resolve_llm_provider(name).ok_or_else(|| unsupported(ProviderStage::Llm, name))?;

        let openai = |model: &str| -> SessionResult<Arc<dyn LanguageModel>> {
            let api_key = credentials.require("openai")?.clone();
            let mut llm_config = OpenAILLMConfig::new(api_key, model, temperature);
            llm_config.tools = render_all(tools, ToolSchemaDialect::Nested);
            llm_config.request_timeout = config.provider_timeout;
            let llm = OpenAILLM::new(llm_config).map_err(|e| invalid("openai", e))?;
            Ok(Arc::new(llm))
        };

        match provider {
            BuiltinLlmProvider::OpenAI => {
                let model = if agent.llm_model.contains("realtime") {
                    warn!(model = %agent.llm_model, fallback = OPENAI_FALLBACK_MODEL, "Realtime model cannot serve chat completions");
                    OPENAI_FALLBACK_MODEL
                } else {
                    non_blank(Some(&agent.llm_model)).unwrap_or(OPENAI_FALLBACK_MODEL)
                };
                openai(model)
            }
            BuiltinLlmProvider::Cerebras => {
                warn!(fallback = OPENAI_FALLBACK_MODEL, "Cerebras is not available; using OpenAI");
                openai(OPENAI_FALLBACK_MODEL)
            }
            BuiltinLlmProvider::Google => {
                let api_key = credentials.require(GOOGLE_CREDENTIAL)?.clone();
                let model = if agent.llm_model.starts_with("gemini") {
                    agent.llm_model.as_str()
                } else {
                    if agent.llm_model != "built-in" {
                        warn!(model = %agent.llm_model, fallback = GEMINI_DEFAULT_MODEL, "Not a Gemini model");
                    }
                    GEMINI_DEFAULT_MODEL
                };
                let mut llm_config = GeminiLLMConfig::new(api_key, model, temperature);
                llm_config.tools = render_all(tools, ToolSchemaDialect::Flat);
                llm_config.request_timeout = config.provider_timeout;
                let llm = GeminiLLM::new(llm_config).map_err(|e| invalid("google", e))?;
                Ok(Arc::new(llm))
            }
        }
    }

    fn build_tts(
        &self,
        agent: &AgentConfiguration,
        credentials: &CredentialSet,
        config: &OrchestratorConfig,
    ) -> SessionResult<Arc<dyn TextToSpeech>> {
        let name = agent.tts_provider.as_str();
        match resolve_tts_provider(name).ok_or_else(|| unsupported(ProviderStage::Tts, name))? {
            BuiltinTtsProvider::ElevenLabs => {
                let api_key = credentials.require("elevenlabs")?.clone();
                let mut tts_config =
                    ElevenLabsTTSConfig::new(api_key, &agent.tts_voice_id, &agent.tts_model);
                tts_config.request_timeout = config.provider_timeout;
                let tts = ElevenLabsTTS::new(tts_config).map_err(|e| invalid("elevenlabs", e))?;
                Ok(Arc::new(tts))
            }
            BuiltinTtsProvider::Google => {
                let api_key = credentials.require(GOOGLE_CREDENTIAL)?.clone();
                let mut tts_config = GoogleTTSConfig::new(api_key, &agent.language);
                tts_config.voice_name = google_voice_name(&agent.tts_voice_id, &agent.language);
                tts_config.request_timeout = config.provider_timeout;
                let tts = GoogleTTS::new(tts_config).map_err(|e| invalid("google", e))?;
                Ok(Arc::new(tts))
            }
        }
    }
}

impl ProviderFactory for DefaultProviderFactory {
    fn build(
        &self,
        agent: &AgentConfiguration,
        credentials: &CredentialSet,
        tools: &[ToolDefinition],
        config: &OrchestratorConfig,
    ) -> SessionResult<ProviderSet> {
        if let Some(name) = agent.realtime_provider() {
            let provider = self.build_realtime(name, agent, credentials, tools, config)?;
            return Ok(ProviderSet::Realtime(provider));
        }
        Ok(ProviderSet::Pipeline(PipelineProviders {
            stt: self.build_stt(agent, credentials, config)?,
            llm: self.build_llm(agent, credentials, tools, config)?,
            tts: self.build_tts(agent, credentials, config)?,
        }))
    }
}

fn unsupported(stage: ProviderStage, value: &str) -> SessionError {
    SessionError::UnsupportedProvider {
        stage,
        value: value.to_string(),
    }
}

fn invalid(provider: &str, err: ProviderError) -> SessionError {
    SessionError::InvalidConfiguration(format!("{provider}: {err}"))
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Google voice names embed the locale (`en-US-Neural2-F`). Anything else is
/// a voice id for another vendor and is ignored.
fn google_voice_name(voice_id: &str, language: &str) -> Option<String> {
    let voice_id = voice_id.trim();
    let language = language.trim();
    let prefixed = voice_id
        .get(..language.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(language));
    (!language.is_empty() && prefixed && voice_id.len() > language.len())
        .then(|| voice_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn agent(value: serde_json::Value) -> AgentConfiguration {
        AgentConfiguration::from_json(value).unwrap()
    }

    fn credentials(keys: &[&str]) -> CredentialSet {
        keys.iter().fold(
            CredentialSet::new("tenant-a".into(), Some("ws-1".into())),
            |set, provider| set.with_key(provider, format!("{provider}-key")),
        )
    }

    fn build(agent: &AgentConfiguration, keys: &[&str]) -> SessionResult<ProviderSet> {
        DefaultProviderFactory::new().build(agent, &credentials(keys), &[], &OrchestratorConfig::default())
    }

    #[test]
    fn test_default_pipeline() {
        let set = build(&agent(json!({})), &["deepgram", "openai", "elevenlabs"]).unwrap();
        assert_eq!(set.describe(), "deepgram+openai+elevenlabs");
    }

    #[test]
    fn test_missing_deepgram_key() {
        let err = build(&agent(json!({"stt_provider": "deepgram"})), &["openai", "elevenlabs"])
            .err()
            .unwrap();
        assert!(matches!(err, SessionError::MissingCredential { ref provider } if provider == "deepgram"));
    }

    #[test]
    fn test_unknown_provider_names_stage() {
        let err = build(&agent(json!({"tts_provider": "acme"})), &["deepgram", "openai", "elevenlabs"])
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "Unsupported tts provider: acme");
    }

    #[test]
    fn test_realtime_selects_vendor_key() {
        let grok = agent(json!({"realtime": "grok", "voice": "cedar"}));
        let set = build(&grok, &["xai"]).unwrap();
        assert!(matches!(set, ProviderSet::Realtime(ref p) if p.provider() == "grok"));

        let err = build(&grok, &["openai"]).err().unwrap();
        assert!(matches!(err, SessionError::MissingCredential { ref provider } if provider == "xai"));
    }

    #[test]
    fn test_unknown_realtime_provider() {
        let err = build(&agent(json!({"realtime_provider": "hume"})), &["openai"])
            .err()
            .unwrap();
        assert!(matches!(
            err,
            SessionError::UnsupportedProvider { stage: ProviderStage::Realtime, .. }
        ));
    }

    #[test]
    fn test_cerebras_falls_back_to_openai() {
        let set = build(
            &agent(json!({"llm_provider": "cerebras", "llm_model": "llama-3.3-70b"})),
            &["deepgram", "openai", "elevenlabs"],
        )
        .unwrap();
        match set {
            ProviderSet::Pipeline(stages) => {
                assert_eq!(stages.llm.provider(), "openai");
                assert_eq!(stages.llm.model(), OPENAI_FALLBACK_MODEL);
            }
            ProviderSet::Realtime(_) => panic!("expected pipeline"),
        }
    }

    #[test]
    fn test_openai_realtime_model_is_replaced() {
        let set = build(
            &agent(json!({"llm_provider": "openai-realtime", "llm_model": "gpt-4o-realtime-preview"})),
            &["deepgram", "openai", "elevenlabs"],
        )
        .unwrap();
        let ProviderSet::Pipeline(stages) = set else {
            panic!("expected pipeline");
        };
        assert_eq!(stages.llm.model(), "gpt-4o");
    }

    #[test]
    fn test_google_stages_share_one_key() {
        let config = agent(json!({
            "stt_provider": "google",
            "llm_provider": "google",
            "llm_model": "built-in",
            "tts_provider": "google"
        }));
        let ProviderSet::Pipeline(stages) = build(&config, &["google"]).unwrap() else {
            panic!("expected pipeline");
        };
        assert_eq!(stages.llm.model(), GEMINI_DEFAULT_MODEL);
        assert_eq!(ProviderSet::Pipeline(stages).describe(), "google+google+google");
    }

    #[test]
    fn test_google_voice_name() {
        assert_eq!(
            google_voice_name("en-US-Neural2-F", "en-US").as_deref(),
            Some("en-US-Neural2-F")
        );
        assert_eq!(google_voice_name("21m00Tcm4TlvDq8ikWAM", "en-US"), None);
        assert_eq!(google_voice_name("en-US", "en-US"), None);
    }
}
