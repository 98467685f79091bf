//! Realtime speech-to-speech client for OpenAI and xAI (Grok).
//!
//! # API Reference
//!
//! - OpenAI: `wss://api.openai.com/v1/realtime?model=<model>`, `OpenAI-Beta: realtime=v1`
//! - xAI: `wss://api.x.ai/v1/realtime`
//! - Auth: `Authorization: Bearer <key>`
//! - Audio: g711 µ-law 8 kHz, base64 in JSON events, both directions

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::prelude::*;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{Instrument, debug, info, warn};
use url::Url;

use super::base::{REALTIME_EVENT_CAPACITY, RealtimeEvent, SpeechToSpeech};
use super::messages::{
    ClientEvent, ConversationItem, G711_ULAW, InputAudioTranscription, ServerEvent, SessionConfig,
    ToolDef,
};
use crate::config::TurnDetectionSettings;
use crate::core::credentials::ApiKey;
use crate::core::llm::assemble_tool_call;
use crate::core::tools::ToolDefinition;
use crate::core::ws::{ProviderSocket, connect_websocket, websocket_request};
use crate::errors::{ProviderError, ProviderResult};

pub const OPENAI_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";
pub const XAI_REALTIME_URL: &str = "wss://api.x.ai/v1/realtime";

pub const DEFAULT_OPENAI_REALTIME_MODEL: &str = "gpt-realtime";
pub const DEFAULT_XAI_REALTIME_MODEL: &str = "grok-2-realtime";

/// Channel capacity for outgoing client events.
const WS_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// Vendors
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealtimeVendor {
    OpenAI,
    Grok,
}

impl RealtimeVendor {
    pub fn as_str(&self) -> &'static str {
        match self {
            RealtimeVendor::OpenAI => "openai",
            RealtimeVendor::Grok => "grok",
        }
    }

    /// Credential-store provider holding this vendor's key.
    pub fn credential_provider(&self) -> &'static str {
        match self {
            RealtimeVendor::OpenAI => "openai",
            RealtimeVendor::Grok => "xai",
        }
    }

    pub fn default_url(&self) -> &'static str {
        match self {
            RealtimeVendor::OpenAI => OPENAI_REALTIME_URL,
            RealtimeVendor::Grok => XAI_REALTIME_URL,
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            RealtimeVendor::OpenAI => DEFAULT_OPENAI_REALTIME_MODEL,
            RealtimeVendor::Grok => DEFAULT_XAI_REALTIME_MODEL,
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct RealtimeClientConfig {
    pub vendor: RealtimeVendor,
    pub api_key: ApiKey,
    pub model: String,
    /// Vendor voice name, already mapped
    pub voice: String,
    pub instructions: String,
    pub temperature: f32,
    pub turn_detection: TurnDetectionSettings,
    pub tools: Vec<ToolDefinition>,
    pub connect_timeout: Duration,
    pub base_url: String,
}

impl RealtimeClientConfig {
    pub fn new(vendor: RealtimeVendor, api_key: ApiKey) -> Self {
        Self {
            vendor,
            api_key,
            model: vendor.default_model().to_string(),
            voice: String::new(),
            instructions: String::new(),
            temperature: crate::config::agent::DEFAULT_REALTIME_TEMPERATURE,
            turn_detection: TurnDetectionSettings {
                threshold: 0.7,
                prefix_padding_ms: 200,
                silence_duration_ms: 600,
            },
            tools: Vec::new(),
            connect_timeout: Duration::from_secs(10),
            base_url: vendor.default_url().to_string(),
        }
    }

    pub fn build_websocket_url(&self) -> ProviderResult<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ProviderError::InvalidConfiguration(format!("Invalid realtime URL: {e}")))?;
        if self.vendor == RealtimeVendor::OpenAI {
            url.query_pairs_mut().append_pair("model", &self.model);
        }
        Ok(url)
    }

    pub fn session_config(&self) -> SessionConfig {
        // xAI transcribes caller audio without being asked.
        let input_audio_transcription = match self.vendor {
            RealtimeVendor::OpenAI => Some(InputAudioTranscription {
                model: "whisper-1".to_string(),
            }),
            RealtimeVendor::Grok => None,
        };
        SessionConfig {
            modalities: vec!["text".to_string(), "audio".to_string()],
            instructions: self.instructions.clone(),
            voice: self.voice.clone(),
            input_audio_format: G711_ULAW.to_string(),
            output_audio_format: G711_ULAW.to_string(),
            input_audio_transcription,
            turn_detection: self.turn_detection.into(),
            tools: self.tools.iter().map(ToolDef::from).collect(),
            tool_choice: (!self.tools.is_empty()).then(|| "auto".to_string()),
            temperature: self.temperature,
        }
    }

    fn handshake_headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![(
            "Authorization",
            format!("Bearer {}", self.api_key.expose()),
        )];
        if self.vendor == RealtimeVendor::OpenAI {
            headers.push(("OpenAI-Beta", "realtime=v1".to_string()));
        }
        headers
    }
}

// =============================================================================
// Server Event Mapping
// =============================================================================

/// Turns wire events into session events. Function names arrive in
/// `response.output_item.added`, arguments later in
/// `response.function_call_arguments.done`.
#[derive(Debug, Default)]
struct EventMapper {
    pending_calls: HashMap<String, String>,
}

impl EventMapper {
    fn map(&mut self, event: ServerEvent) -> Option<RealtimeEvent> {
        match event {
            ServerEvent::Error { error } => {
                warn!(error_type = %error.error_type, message = %error.message, "Realtime provider error");
                Some(RealtimeEvent::Error(format!(
                    "{}: {}",
                    error.error_type, error.message
                )))
            }
            ServerEvent::SessionCreated { session } => {
                info!(provider_session = %session.id, "Realtime session created");
                Some(RealtimeEvent::SessionCreated {
                    session_id: session.id,
                })
            }
            ServerEvent::SpeechStarted { audio_start_ms } => {
                debug!(audio_start_ms, "Caller speech started");
                Some(RealtimeEvent::SpeechStarted)
            }
            ServerEvent::TranscriptionCompleted { transcript } => {
                Some(RealtimeEvent::UserTranscript(transcript))
            }
            ServerEvent::OutputItemAdded { item } => {
                if item.item_type == "function_call"
                    && let (Some(call_id), Some(name)) = (item.call_id, item.name)
                {
                    debug!(call_id = %call_id, tool = %name, "Tracking function call");
                    self.pending_calls.insert(call_id, name);
                }
                None
            }
            ServerEvent::AudioDelta { item_id, delta } => match BASE64_STANDARD.decode(&delta) {
                Ok(audio) => Some(RealtimeEvent::Audio {
                    data: Bytes::from(audio),
                    item_id,
                }),
                Err(e) => {
                    warn!(error = %e, "Failed to decode audio delta");
                    None
                }
            },
            ServerEvent::AudioTranscriptDelta { delta } => {
                Some(RealtimeEvent::AssistantTranscriptDelta(delta))
            }
            ServerEvent::AudioTranscriptDone { transcript } => {
                Some(RealtimeEvent::AssistantTranscriptDone(transcript))
            }
            ServerEvent::FunctionCallArgumentsDone {
                call_id,
                name,
                arguments,
            } => {
                let tracked = self.pending_calls.remove(&call_id);
                let name = name.or(tracked).unwrap_or_else(|| {
                    warn!(call_id = %call_id, "Function name not found for call");
                    String::new()
                });
                Some(RealtimeEvent::ToolCall(assemble_tool_call(
                    Some(call_id),
                    name,
                    &arguments,
                )))
            }
            ServerEvent::ResponseDone { response } => {
                if let Some(response) = response {
                    debug!(response_id = ?response.id, status = ?response.status, "Response done");
                }
                Some(RealtimeEvent::ResponseDone)
            }
            ServerEvent::Other => None,
        }
    }
}

// =============================================================================
// Client
// =============================================================================

pub struct RealtimeClient {
    config: RealtimeClientConfig,
    outbound_tx: Mutex<Option<mpsc::Sender<ClientEvent>>>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    connection_handle: Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeClient {
    pub fn new(config: RealtimeClientConfig) -> ProviderResult<Self> {
        if config.api_key.expose().is_empty() {
            return Err(ProviderError::AuthenticationFailed(
                "API key is required".to_string(),
            ));
        }
        Ok(Self {
            config,
            outbound_tx: Mutex::new(None),
            shutdown_tx: Mutex::new(None),
            connection_handle: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &RealtimeClientConfig {
        &self.config
    }

    async fn send(&self, event: ClientEvent) -> ProviderResult<()> {
        let sender = self
            .outbound_tx
            .lock()
            .clone()
            .ok_or(ProviderError::NotConnected)?;
        sender
            .send(event)
            .await
            .map_err(|_| ProviderError::NotConnected)
    }
}

async fn run_connection(
    socket: ProviderSocket,
    mut outbound: mpsc::Receiver<ClientEvent>,
    mut shutdown: oneshot::Receiver<()>,
    events: mpsc::Sender<RealtimeEvent>,
) {
    let (mut sink, mut stream) = socket.split();
    let mut mapper = EventMapper::default();

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }

            Some(event) = outbound.recv() => {
                let json = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(error = %e, "Failed to serialize realtime event");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(json.into())).await {
                    warn!(error = %e, "Failed to send realtime event");
                    let _ = events.try_send(RealtimeEvent::Error(e.to_string()));
                    break;
                }
            }

            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => {
                            if let Some(event) = mapper.map(event)
                                && events.send(event).await.is_err()
                            {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "Failed to parse realtime event"),
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = sink.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(?frame, "Realtime provider closed the connection");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "Realtime WebSocket error");
                    let _ = events.try_send(RealtimeEvent::Error(e.to_string()));
                    break;
                }
                None => break,
            }
        }
    }

    let _ = events.try_send(RealtimeEvent::Closed);
}

#[async_trait]
impl SpeechToSpeech for RealtimeClient {
    fn provider(&self) -> &'static str {
        self.config.vendor.as_str()
    }

    async fn connect(&self) -> ProviderResult<mpsc::Receiver<RealtimeEvent>> {
        if self.outbound_tx.lock().is_some() {
            return Err(ProviderError::Protocol("Already connected".to_string()));
        }

        let url = self.config.build_websocket_url()?;
        let request = websocket_request(&url, &self.config.handshake_headers())?;
        let mut socket = connect_websocket(request, self.config.connect_timeout).await?;

        let update = ClientEvent::SessionUpdate {
            session: self.config.session_config(),
        };
        socket
            .send(Message::Text(serde_json::to_string(&update)?.into()))
            .await?;

        info!(
            provider = self.provider(),
            model = %self.config.model,
            voice = %self.config.voice,
            tools = self.config.tools.len(),
            "Connected to realtime provider"
        );

        let (events_tx, events_rx) = mpsc::channel(REALTIME_EVENT_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(WS_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(
            run_connection(socket, outbound_rx, shutdown_rx, events_tx).in_current_span(),
        );

        *self.outbound_tx.lock() = Some(outbound_tx);
        *self.shutdown_tx.lock() = Some(shutdown_tx);
        *self.connection_handle.lock() = Some(handle);
        Ok(events_rx)
    }

    async fn send_audio(&self, audio: Bytes) -> ProviderResult<()> {
        if audio.is_empty() {
            return Ok(());
        }
        self.send(ClientEvent::audio_append(&audio)).await
    }

    async fn submit_tool_result(&self, call_id: &str, output: String) -> ProviderResult<()> {
        self.send(ClientEvent::ConversationItemCreate {
            item: ConversationItem::function_call_output(call_id, output),
        })
        .await
    }

    async fn create_response(&self) -> ProviderResult<()> {
        self.send(ClientEvent::ResponseCreate).await
    }

    async fn cancel_response(&self) -> ProviderResult<()> {
        self.send(ClientEvent::ResponseCancel).await
    }

    async fn truncate(&self, item_id: &str, audio_end_ms: u64) -> ProviderResult<()> {
        self.send(ClientEvent::ConversationItemTruncate {
            item_id: item_id.to_string(),
            content_index: 0,
            audio_end_ms,
        })
        .await
    }

    async fn disconnect(&self) -> ProviderResult<()> {
        self.outbound_tx.lock().take();
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
            info!(provider = self.provider(), "Realtime connection closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn config(vendor: RealtimeVendor) -> RealtimeClientConfig {
        let mut config = RealtimeClientConfig::new(vendor, ApiKey::new("rt-key"));
        config.voice = "Ara".into();
        config.instructions = "Be brief.".into();
        config
    }

    #[test]
    fn test_vendor_credentials() {
        assert_eq!(RealtimeVendor::OpenAI.credential_provider(), "openai");
        assert_eq!(RealtimeVendor::Grok.credential_provider(), "xai");
        assert_eq!(RealtimeVendor::Grok.as_str(), "grok");
    }

    #[test]
    fn test_websocket_url_per_vendor() {
        let openai = config(RealtimeVendor::OpenAI).build_websocket_url().unwrap();
        assert_eq!(openai.as_str(), "wss://api.openai.com/v1/realtime?model=gpt-realtime");
        let grok = config(RealtimeVendor::Grok).build_websocket_url().unwrap();
        assert_eq!(grok.as_str(), XAI_REALTIME_URL);
    }

    #[test]
    fn test_session_config_uses_telephony_audio() {
        let mut config = config(RealtimeVendor::Grok);
        config.tools = vec![ToolDefinition::new("sheets_search", "d", json!({"type": "object"}))];
        let session = config.session_config();
        assert_eq!(session.input_audio_format, "g711_ulaw");
        assert_eq!(session.output_audio_format, "g711_ulaw");
        assert_eq!(session.turn_detection.silence_duration_ms, 600);
        assert_eq!(session.tool_choice.as_deref(), Some("auto"));
        assert!(session.input_audio_transcription.is_none());
    }

    #[test]
    fn test_handshake_headers() {
        let openai = config(RealtimeVendor::OpenAI).handshake_headers();
        assert!(openai.contains(&("OpenAI-Beta", "realtime=v1".to_string())));
        let grok = config(RealtimeVendor::Grok).handshake_headers();
        assert_eq!(grok, vec![("Authorization", "Bearer rt-key".to_string())]);
    }

    #[test]
    fn test_empty_api_key() {
        let config = RealtimeClientConfig::new(RealtimeVendor::OpenAI, ApiKey::new(""));
        assert!(matches!(
            RealtimeClient::new(config),
            Err(ProviderError::AuthenticationFailed(_))
        ));
    }

    fn server_event(value: Value) -> ServerEvent {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_mapper_joins_function_name_and_arguments() {
        let mut mapper = EventMapper::default();
        assert_eq!(
            mapper.map(server_event(json!({
                "type": "response.output_item.added",
                "response_id": "r1",
                "output_index": 0,
                "item": {"id": "i1", "type": "function_call", "call_id": "call_1", "name": "crm_lookup_contact"}
            }))),
            None
        );
        let event = mapper.map(server_event(json!({
            "type": "response.function_call_arguments.done",
            "response_id": "r1",
            "item_id": "i1",
            "output_index": 0,
            "call_id": "call_1",
            "arguments": "{\"phone_number\":\"+15550001111\"}"
        })));
        match event {
            Some(RealtimeEvent::ToolCall(call)) => {
                assert_eq!(call.id.as_deref(), Some("call_1"));
                assert_eq!(call.name, "crm_lookup_contact");
                assert_eq!(call.arguments["phone_number"], "+15550001111");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(mapper.pending_calls.is_empty());
    }

    #[test]
    fn test_mapper_decodes_audio() {
        let mut mapper = EventMapper::default();
        let event = mapper.map(server_event(json!({
            "type": "response.audio.delta",
            "item_id": "item_9",
            "delta": BASE64_STANDARD.encode([0xFFu8, 0x7F])
        })));
        assert_eq!(
            event,
            Some(RealtimeEvent::Audio {
                data: Bytes::from_static(&[0xFF, 0x7F]),
                item_id: "item_9".into()
            })
        );
    }

    #[tokio::test]
    async fn test_session_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<Value>();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = accept_async(stream).await.unwrap();
            let (mut write, mut read) = ws.split();
            while let Some(Ok(Message::Text(text))) = read.next().await {
                let value: Value = serde_json::from_str(&text).unwrap();
                if value["type"] == "input_audio_buffer.append" {
                    let reply = json!({
                        "type": "response.audio_transcript.delta",
                        "response_id": "r1", "item_id": "i1", "output_index": 0, "content_index": 0,
                        "delta": "Hello"
                    });
                    write.send(Message::Text(reply.to_string().into())).await.unwrap();
                }
                let _ = seen_tx.send(value);
            }
        });

        let mut config = config(RealtimeVendor::Grok);
        config.base_url = format!("ws://{addr}/v1/realtime");
        let client = RealtimeClient::new(config).unwrap();
        let mut events = client.connect().await.unwrap();

        client.send_audio(Bytes::from_static(&[0xFF; 160])).await.unwrap();
        assert_eq!(
            events.recv().await,
            Some(RealtimeEvent::AssistantTranscriptDelta("Hello".into()))
        );
        client
            .submit_tool_result("call_1", "{\"success\":true}".into())
            .await
            .unwrap();
        client.create_response().await.unwrap();

        let types: Vec<String> = [
            seen_rx.recv().await.unwrap(),
            seen_rx.recv().await.unwrap(),
            seen_rx.recv().await.unwrap(),
            seen_rx.recv().await.unwrap(),
        ]
        .iter()
        .map(|v| v["type"].as_str().unwrap().to_string())
        .collect();
        assert_eq!(
            types,
            [
                "session.update",
                "input_audio_buffer.append",
                "conversation.item.create",
                "response.create"
            ]
        );

        client.disconnect().await.unwrap();
        client.disconnect().await.unwrap();
        assert!(matches!(
            client.create_response().await,
            Err(ProviderError::NotConnected)
        ));
        server.abort();
    }
}
