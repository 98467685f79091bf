//! Google Cloud Speech-to-Text over the REST `recognize` endpoint.
//!
//! Google's REST API is not streaming, so caller audio is buffered and one
//! recognition request is issued per utterance when the local VAD reports
//! end of speech.

use std::time::Duration;

use async_trait::async_trait;
use base64::prelude::*;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, warn};

use super::base::{STT_EVENT_CAPACITY, SpeechToText, SttEvent};
use crate::core::audio::{MULAW_SAMPLE_RATE, mulaw_duration_ms};
use crate::core::credentials::ApiKey;
use crate::errors::{ProviderError, ProviderResult};

pub const GOOGLE_STT_URL: &str = "https://speech.googleapis.com/v1/speech:recognize";

/// Utterances shorter than this are noise, not speech.
const MIN_UTTERANCE_MS: u64 = 200;
/// Google's synchronous recognize limit.
const MAX_UTTERANCE_BYTES: usize = MULAW_SAMPLE_RATE as usize * 60;

#[derive(Debug, Clone)]
pub struct GoogleSTTConfig {
    pub api_key: ApiKey,
    pub language: String,
    pub model: Option<String>,
    pub request_timeout: Duration,
    pub base_url: String,
}

impl GoogleSTTConfig {
    pub fn new(api_key: ApiKey, language: impl Into<String>) -> Self {
        Self {
            api_key,
            language: language.into(),
            model: None,
            request_timeout: Duration::from_secs(30),
            base_url: GOOGLE_STT_URL.to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RecognizeResponse {
    #[serde(default)]
    results: Vec<RecognitionResult>,
}

#[derive(Debug, Deserialize)]
struct RecognitionResult {
    #[serde(default)]
    alternatives: Vec<RecognitionAlternative>,
}

#[derive(Debug, Deserialize)]
struct RecognitionAlternative {
    #[serde(default)]
    transcript: String,
}

impl RecognizeResponse {
    /// Best alternative of every result, joined.
    fn transcript(&self) -> String {
        self.results
            .iter()
            .filter_map(|r| r.alternatives.first())
            .map(|a| a.transcript.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub struct GoogleSTT {
    config: GoogleSTTConfig,
    client: reqwest::Client,
    buffer: Mutex<Vec<u8>>,
    events_tx: Mutex<Option<mpsc::Sender<SttEvent>>>,
    /// In-flight recognize requests, awaited on disconnect
    requests: TaskTracker,
    /// Cancels the requests of the current connection
    cancel: Mutex<CancellationToken>,
}

impl GoogleSTT {
    pub fn new(config: GoogleSTTConfig) -> ProviderResult<Self> {
        if config.api_key.expose().is_empty() {
            return Err(ProviderError::AuthenticationFailed(
                "API key is required".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            config,
            client,
            buffer: Mutex::new(Vec::new()),
            events_tx: Mutex::new(None),
            requests: TaskTracker::new(),
            cancel: Mutex::new(CancellationToken::new()),
        })
    }

    fn request_body(&self, audio: &[u8]) -> serde_json::Value {
        let mut config = json!({
            "encoding": "MULAW",
            "sampleRateHertz": MULAW_SAMPLE_RATE,
            "languageCode": self.config.language,
            "enableAutomaticPunctuation": true,
        });
        if let Some(model) = &self.config.model {
            config["model"] = json!(model);
        }
        json!({
            "config": config,
            "audio": {"content": BASE64_STANDARD.encode(audio)},
        })
    }

    async fn recognize(
        client: reqwest::Client,
        url: String,
        api_key: ApiKey,
        body: serde_json::Value,
    ) -> ProviderResult<String> {
        let response = client
            .post(url)
            .query(&[("key", api_key.expose())])
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ProviderError::from_response(response).await);
        }
        let parsed: RecognizeResponse = response.json().await?;
        Ok(parsed.transcript())
    }
}

#[async_trait]
impl SpeechToText for GoogleSTT {
    fn provider(&self) -> &'static str {
        "google"
    }

    async fn connect(&self) -> ProviderResult<mpsc::Receiver<SttEvent>> {
        let (tx, rx) = mpsc::channel(STT_EVENT_CAPACITY);
        *self.events_tx.lock() = Some(tx);
        *self.cancel.lock() = CancellationToken::new();
        self.requests.reopen();
        self.buffer.lock().clear();
        Ok(rx)
    }

    async fn send_audio(&self, audio: Bytes) -> ProviderResult<()> {
        if self.events_tx.lock().is_none() {
            return Err(ProviderError::NotConnected);
        }
        let mut buffer = self.buffer.lock();
        if buffer.len() + audio.len() > MAX_UTTERANCE_BYTES {
            let overflow = buffer.len() + audio.len() - MAX_UTTERANCE_BYTES;
            let cut = overflow.min(buffer.len());
            buffer.drain(..cut);
        }
        buffer.extend_from_slice(&audio);
        Ok(())
    }

    async fn end_of_speech(&self) -> ProviderResult<()> {
        let events = self
            .events_tx
            .lock()
            .clone()
            .ok_or(ProviderError::NotConnected)?;
        let audio = std::mem::take(&mut *self.buffer.lock());
        if mulaw_duration_ms(audio.len()) < MIN_UTTERANCE_MS {
            debug!(bytes = audio.len(), "Utterance too short to recognize");
            return Ok(());
        }

        let body = self.request_body(&audio);
        let client = self.client.clone();
        let url = self.config.base_url.clone();
        let api_key = self.config.api_key.clone();
        let cancel = self.cancel.lock().clone();
        self.requests.spawn(
            async move {
                let result = tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Google STT recognition cancelled");
                        return;
                    }
                    result = Self::recognize(client, url, api_key, body) => result,
                };
                match result {
                    Ok(text) if !text.is_empty() => {
                        if events.send(SttEvent::final_transcript(text)).await.is_err() {
                            warn!("Google STT transcript dropped: recognizer events closed");
                        }
                    }
                    Ok(_) => debug!("Google STT returned no transcript"),
                    Err(e) => warn!(error = %e, "Google STT recognition failed"),
                }
            }
            .in_current_span(),
        );
        Ok(())
    }

    /// Cancel in-flight recognition and wait for it before returning.
    async fn disconnect(&self) -> ProviderResult<()> {
        self.events_tx.lock().take();
        self.cancel.lock().cancel();
        self.requests.close();
        self.requests.wait().await;
        self.buffer.lock().clear();
        Ok(())
    }
}
