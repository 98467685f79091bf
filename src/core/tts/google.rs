//! Google Cloud Text-to-Speech over REST `text:synthesize`.

use std::time::Duration;

use async_trait::async_trait;
use base64::prelude::*;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::base::{TextToSpeech, forward_chunked};
use crate::core::audio::MULAW_SAMPLE_RATE;
use crate::core::credentials::ApiKey;
use crate::errors::{ProviderError, ProviderResult};

pub const GOOGLE_TTS_URL: &str = "https://texttospeech.googleapis.com/v1/text:synthesize";

#[derive(Debug, Clone)]
pub struct GoogleTTSConfig {
    pub api_key: ApiKey,
    pub language: String,
    /// Voice name such as `en-US-Neural2-F`; Google picks one when unset
    pub voice_name: Option<String>,
    pub request_timeout: Duration,
    pub base_url: String,
}

impl GoogleTTSConfig {
    pub fn new(api_key: ApiKey, language: impl Into<String>) -> Self {
        Self {
            api_key,
            language: language.into(),
            voice_name: None,
            request_timeout: Duration::from_secs(30),
            base_url: GOOGLE_TTS_URL.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeResponse {
    #[serde(default)]
    audio_content: String,
}

/// Google wraps MULAW output in a WAV container; return the raw samples.
fn strip_wav_header(data: &[u8]) -> &[u8] {
    if data.len() < 12 || &data[0..4] != b"RIFF" || &data[8..12] != b"WAVE" {
        return data;
    }
    let mut offset = 12;
    while offset + 8 <= data.len() {
        let id = &data[offset..offset + 4];
        let size = u32::from_le_bytes([
            data[offset + 4],
            data[offset + 5],
            data[offset + 6],
            data[offset + 7],
        ]) as usize;
        let body = offset + 8;
        if id == b"data" {
            let end = body.saturating_add(size).min(data.len());
            return &data[body..end];
        }
        offset = body.saturating_add(size + (size & 1));
    }
    data
}

pub struct GoogleTTS {
    config: GoogleTTSConfig,
    client: reqwest::Client,
}

impl GoogleTTS {
    pub fn new(config: GoogleTTSConfig) -> ProviderResult<Self> {
        if config.api_key.expose().is_empty() {
            return Err(ProviderError::AuthenticationFailed(
                "API key is required".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { config, client })
    }

    fn build_http_request(&self, text: &str) -> reqwest::RequestBuilder {
        let mut voice = json!({"languageCode": self.config.language});
        if let Some(name) = &self.config.voice_name {
            voice["name"] = json!(name);
        }
        self.client
            .post(&self.config.base_url)
            .query(&[("key", self.config.api_key.expose())])
            .json(&json!({
                "input": {"text": text},
                "voice": voice,
                "audioConfig": {
                    "audioEncoding": "MULAW",
                    "sampleRateHertz": MULAW_SAMPLE_RATE,
                },
            }))
    }
}

#[async_trait]
impl TextToSpeech for GoogleTTS {
    fn provider(&self) -> &'static str {
        "google"
    }

    async fn synthesize(
        &self,
        text: &str,
        audio: mpsc::Sender<Bytes>,
        cancel: CancellationToken,
    ) -> ProviderResult<()> {
        debug!(chars = text.len(), "Google TTS synthesis");
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            response = self.build_http_request(text).send() => response?,
        };
        if !response.status().is_success() {
            return Err(ProviderError::from_response(response).await);
        }
        let parsed: SynthesizeResponse = response.json().await?;
        let decoded = BASE64_STANDARD
            .decode(parsed.audio_content.as_bytes())
            .map_err(|e| ProviderError::Protocol(format!("Invalid audioContent: {e}")))?;
        let samples = Bytes::copy_from_slice(strip_wav_header(&decoded));
        forward_chunked(samples, &audio, &cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn wav(samples: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + samples.len() as u32).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&[0u8; 16]);
        out.extend_from_slice(b"data");
        out.extend_from_slice(&(samples.len() as u32).to_le_bytes());
        out.extend_from_slice(samples);
        out
    }

    #[test]
    fn test_strip_wav_header() {
        let samples = vec![0x55u8; 10];
        assert_eq!(strip_wav_header(&wav(&samples)), samples.as_slice());
        assert_eq!(strip_wav_header(&[1, 2, 3]), &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_synthesize_decodes_audio_content() {
        let server = MockServer::start().await;
        let samples = vec![0x42u8; 1000];
        Mock::given(method("POST"))
            .and(query_param("key", "g-key"))
            .and(body_partial_json(json!({
                "input": {"text": "Hello"},
                "voice": {"languageCode": "es-ES"},
                "audioConfig": {"audioEncoding": "MULAW", "sampleRateHertz": 8000}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "audioContent": BASE64_STANDARD.encode(wav(&samples))
            })))
            .mount(&server)
            .await;

        let mut config = GoogleTTSConfig::new(ApiKey::new("g-key"), "es-ES");
        config.base_url = format!("{}/v1/text:synthesize", server.uri());
        let (tx, mut rx) = mpsc::channel(16);
        GoogleTTS::new(config)
            .unwrap()
            .synthesize("Hello", tx, CancellationToken::new())
            .await
            .unwrap();

        let mut received = Vec::new();
        while let Some(chunk) = rx.recv().await {
            received.extend_from_slice(&chunk);
        }
        assert_eq!(received, samples);
    }
}
