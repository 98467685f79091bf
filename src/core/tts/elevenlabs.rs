//! ElevenLabs streaming TTS.
//!
//! # API Reference
//!
//! - Endpoint: `POST https://api.elevenlabs.io/v1/text-to-speech/{voice_id}/stream`
//! - Auth: `xi-api-key` header
//! - Output: `ulaw_8000`, streamed as the body is generated

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::base::{TextToSpeech, forward_body};
use crate::core::credentials::ApiKey;
use crate::errors::{ProviderError, ProviderResult};

pub const ELEVENLABS_TTS_URL: &str = "https://api.elevenlabs.io/v1/text-to-speech";

const OUTPUT_FORMAT: &str = "ulaw_8000";

#[derive(Debug, Clone)]
pub struct ElevenLabsTTSConfig {
    pub api_key: ApiKey,
    pub voice_id: String,
    pub model: String,
    pub request_timeout: Duration,
    pub base_url: String,
}

impl ElevenLabsTTSConfig {
    pub fn new(api_key: ApiKey, voice_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key,
            voice_id: voice_id.into(),
            model: model.into(),
            request_timeout: Duration::from_secs(30),
            base_url: ELEVENLABS_TTS_URL.to_string(),
        }
    }
}

pub struct ElevenLabsTTS {
    config: ElevenLabsTTSConfig,
    client: reqwest::Client,
}

impl ElevenLabsTTS {
    pub fn new(config: ElevenLabsTTSConfig) -> ProviderResult<Self> {
        if config.api_key.expose().is_empty() {
            return Err(ProviderError::AuthenticationFailed(
                "API key is required".to_string(),
            ));
        }
        if config.voice_id.trim().is_empty() {
            return Err(ProviderError::InvalidConfiguration(
                "voice_id is required".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { config, client })
    }

    fn build_http_request(&self, text: &str) -> reqwest::RequestBuilder {
        let url = format!(
            "{}/{}/stream",
            self.config.base_url.trim_end_matches('/'),
            self.config.voice_id
        );
        self.client
            .post(url)
            .query(&[("output_format", OUTPUT_FORMAT)])
            .header("xi-api-key", self.config.api_key.expose())
            .header("Accept", "audio/basic")
            .json(&json!({
                "text": text,
                "model_id": self.config.model,
            }))
    }
}

#[async_trait]
impl TextToSpeech for ElevenLabsTTS {
    fn provider(&self) -> &'static str {
        "elevenlabs"
    }

    async fn synthesize(
        &self,
        text: &str,
        audio: mpsc::Sender<Bytes>,
        cancel: CancellationToken,
    ) -> ProviderResult<()> {
        debug!(chars = text.len(), voice = %self.config.voice_id, "ElevenLabs synthesis");
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            response = self.build_http_request(text).send() => response?,
        };
        if !response.status().is_success() {
            return Err(ProviderError::from_response(response).await);
        }
        forward_body(response, &audio, &cancel).await
    }
}
