//! Deepgram streaming speech-to-text.
//!
//! # API Reference
//!
//! - Endpoint: `wss://api.deepgram.com/v1/listen`
//! - Auth: `Authorization: Token <key>`
//! - Audio: raw µ-law 8 kHz binary frames
//! - Close: `{"type": "CloseStream"}`

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{Instrument, debug, info, warn};
use url::Url;

use super::base::{STT_EVENT_CAPACITY, SpeechToText, SttEvent};
use crate::core::audio::MULAW_SAMPLE_RATE;
use crate::core::credentials::ApiKey;
use crate::core::ws::{connect_websocket, websocket_request};
use crate::errors::{ProviderError, ProviderResult};

pub const DEEPGRAM_STT_URL: &str = "wss://api.deepgram.com/v1/listen";

/// Silence after the last final word before Deepgram sends `UtteranceEnd`.
const UTTERANCE_END_MS: u32 = 1000;

const AUDIO_CHANNEL_CAPACITY: usize = 64;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct DeepgramSTTConfig {
    pub api_key: ApiKey,
    pub model: String,
    pub language: String,
    pub connect_timeout: Duration,
    pub base_url: String,
}

impl DeepgramSTTConfig {
    pub fn new(api_key: ApiKey, model: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            api_key,
            model: model.into(),
            language: language.into(),
            connect_timeout: Duration::from_secs(10),
            base_url: DEEPGRAM_STT_URL.to_string(),
        }
    }

    pub fn build_websocket_url(&self) -> ProviderResult<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ProviderError::InvalidConfiguration(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("model", &self.model)
            .append_pair("language", &self.language)
            .append_pair("encoding", "mulaw")
            .append_pair("sample_rate", &MULAW_SAMPLE_RATE.to_string())
            .append_pair("channels", "1")
            .append_pair("interim_results", "true")
            .append_pair("vad_events", "true")
            .append_pair("utterance_end_ms", &UTTERANCE_END_MS.to_string())
            .append_pair("punctuate", "true")
            .append_pair("smart_format", "true");
        Ok(url)
    }
}

// =============================================================================
// Messages
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum DeepgramMessage {
    Results {
        #[serde(default)]
        channel: Channel,
        #[serde(default)]
        is_final: bool,
        #[serde(default)]
        speech_final: bool,
    },
    UtteranceEnd {},
    SpeechStarted {},
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct Channel {
    #[serde(default)]
    alternatives: Vec<Alternative>,
}

#[derive(Debug, Deserialize)]
struct Alternative {
    #[serde(default)]
    transcript: String,
}

/// Translate one server text frame. Empty transcripts and bookkeeping
/// messages yield nothing.
fn parse_message(text: &str) -> Option<SttEvent> {
    let message = match serde_json::from_str::<DeepgramMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "Failed to parse Deepgram message");
            return None;
        }
    };
    match message {
        DeepgramMessage::Results {
            channel,
            is_final,
            speech_final,
        } => {
            let text = channel
                .alternatives
                .into_iter()
                .next()
                .map(|a| a.transcript)
                .unwrap_or_default();
            if text.trim().is_empty() {
                return None;
            }
            Some(SttEvent::Transcript {
                text,
                is_final,
                speech_final,
            })
        }
        DeepgramMessage::UtteranceEnd {} => Some(SttEvent::UtteranceEnd),
        DeepgramMessage::SpeechStarted {} => Some(SttEvent::SpeechStarted),
        DeepgramMessage::Other => None,
    }
}

// =============================================================================
// Client
// =============================================================================

pub struct DeepgramSTT {
    config: DeepgramSTTConfig,
    audio_tx: Mutex<Option<mpsc::Sender<Bytes>>>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    connection_handle: Mutex<Option<JoinHandle<()>>>,
}

impl DeepgramSTT {
    pub fn new(config: DeepgramSTTConfig) -> ProviderResult<Self> {
        if config.api_key.expose().is_empty() {
            return Err(ProviderError::AuthenticationFailed(
                "API key is required".to_string(),
            ));
        }
        Ok(Self {
            config,
            audio_tx: Mutex::new(None),
            shutdown_tx: Mutex::new(None),
            connection_handle: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &DeepgramSTTConfig {
        &self.config
    }
}

#[async_trait]
impl SpeechToText for DeepgramSTT {
    fn provider(&self) -> &'static str {
        "deepgram"
    }

    async fn connect(&self) -> ProviderResult<mpsc::Receiver<SttEvent>> {
        let url = self.config.build_websocket_url()?;
        let request = websocket_request(
            &url,
            &[(
                "Authorization",
                format!("Token {}", self.config.api_key.expose()),
            )],
        )?;
        let socket = connect_websocket(request, self.config.connect_timeout).await?;
        info!(model = %self.config.model, "Connected to Deepgram STT");

        let (mut ws_sink, mut ws_stream) = socket.split();
        let (audio_tx, mut audio_rx) = mpsc::channel::<Bytes>(AUDIO_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel::<SttEvent>(STT_EVENT_CAPACITY);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(
            async move {
                loop {
                    tokio::select! {
                        Some(audio) = audio_rx.recv() => {
                            if let Err(e) = ws_sink.send(Message::Binary(audio)).await {
                                warn!(error = %e, "Failed to send audio to Deepgram");
                                break;
                            }
                        }

                        _ = &mut shutdown_rx => {
                            let _ = ws_sink
                                .send(Message::Text(r#"{"type":"CloseStream"}"#.into()))
                                .await;
                            let _ = ws_sink.send(Message::Close(None)).await;
                            break;
                        }

                        message = ws_stream.next() => match message {
                            Some(Ok(Message::Text(text))) => {
                                if let Some(event) = parse_message(&text)
                                    && events_tx.send(event).await.is_err()
                                {
                                    debug!("STT event receiver dropped");
                                    break;
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                let _ = ws_sink.send(Message::Pong(data)).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                info!("Deepgram closed the stream");
                                break;
                            }
                            Some(Err(e)) => {
                                warn!(error = %e, "Deepgram WebSocket error");
                                break;
                            }
                            Some(Ok(_)) => {}
                        },
                    }
                }
                debug!("Deepgram connection task ended");
            }
            .in_current_span(),
        );

        *self.audio_tx.lock() = Some(audio_tx);
        *self.shutdown_tx.lock() = Some(shutdown_tx);
        *self.connection_handle.lock() = Some(handle);
        Ok(events_rx)
    }

    async fn send_audio(&self, audio: Bytes) -> ProviderResult<()> {
        let sender = self
            .audio_tx
            .lock()
            .clone()
            .ok_or(ProviderError::NotConnected)?;
        sender
            .send(audio)
            .await
            .map_err(|_| ProviderError::ConnectionFailed("Deepgram stream closed".to_string()))
    }

    async fn disconnect(&self) -> ProviderResult<()> {
        self.audio_tx.lock().take();
        if let Some(shutdown) = self.shutdown_tx.lock().take() {
            let _ = shutdown.send(());
        }
        let handle = self.connection_handle.lock().take();
        if let Some(handle) = handle {
            let abort = handle.abort_handle();
            if tokio::time::timeout(Duration::from_secs(2), handle)
                .await
                .is_err()
            {
                abort.abort();
            }
        }
        Ok(())
    }
}
