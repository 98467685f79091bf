//! Scripted in-process providers for session tests.
//!
//! Each fake records what the session asked of it so tests can assert on
//! provider traffic without any network.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use voice_orchestrator::config::{AgentConfiguration, OrchestratorConfig};
use voice_orchestrator::core::{
    ChatMessage, CredentialResolver, CredentialSet, InMemoryCredentialStore,
    InMemoryIntegrationStore, LanguageModel, LlmEvent, PipelineProviders, ProviderFactory,
    ProviderSet, RealtimeEvent, SpeechToSpeech, SpeechToText, SttEvent, TextToSpeech,
    ToolDefinition,
};
use voice_orchestrator::errors::{ProviderError, ProviderResult, SessionResult};
use voice_orchestrator::session::SessionDeps;

/// One chunk of fake assistant audio (100 ms of µ-law).
pub const CHUNK: usize = 800;

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

// =============================================================================
// Realtime
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeCommand {
    Audio(usize),
    ToolResult { call_id: String, output: String },
    CreateResponse,
    CancelResponse,
    Truncate { item_id: String, audio_end_ms: u64 },
}

#[derive(Default)]
pub struct FakeRealtime {
    events: Mutex<Option<mpsc::Sender<RealtimeEvent>>>,
    commands: Mutex<Vec<RealtimeCommand>>,
    pub fail_connect: bool,
    pub disconnects: AtomicUsize,
}

impl FakeRealtime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail_connect: true,
            ..Default::default()
        })
    }

    /// Deliver an event as if the provider sent it.
    pub async fn emit(&self, event: RealtimeEvent) {
        let sender = self.events.lock().clone();
        sender
            .expect("provider not connected")
            .send(event)
            .await
            .expect("session stopped listening");
    }

    pub fn commands(&self) -> Vec<RealtimeCommand> {
        self.commands.lock().clone()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    fn record(&self, command: RealtimeCommand) {
        self.commands.lock().push(command);
    }
}

#[async_trait]
impl SpeechToSpeech for FakeRealtime {
    fn provider(&self) -> &'static str {
        "fake-realtime"
    }

    async fn connect(&self) -> ProviderResult<mpsc::Receiver<RealtimeEvent>> {
        if self.fail_connect {
            return Err(ProviderError::ConnectionFailed("refused".to_string()));
        }
        let (tx, rx) = mpsc::channel(64);
        *self.events.lock() = Some(tx);
        Ok(rx)
    }

    async fn send_audio(&self, audio: Bytes) -> ProviderResult<()> {
        self.record(RealtimeCommand::Audio(audio.len()));
        Ok(())
    }

    async fn submit_tool_result(&self, call_id: &str, output: String) -> ProviderResult<()> {
        self.record(RealtimeCommand::ToolResult {
            call_id: call_id.to_string(),
            output,
        });
        Ok(())
    }

    async fn create_response(&self) -> ProviderResult<()> {
        self.record(RealtimeCommand::CreateResponse);
        Ok(())
    }

    async fn cancel_response(&self) -> ProviderResult<()> {
        self.record(RealtimeCommand::CancelResponse);
        Ok(())
    }

    async fn truncate(&self, item_id: &str, audio_end_ms: u64) -> ProviderResult<()> {
        self.record(RealtimeCommand::Truncate {
            item_id: item_id.to_string(),
            audio_end_ms,
        });
        Ok(())
    }

    async fn disconnect(&self) -> ProviderResult<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.events.lock().take();
        Ok(())
    }
}

// =============================================================================
// Pipeline stages
// =============================================================================

#[derive(Default)]
pub struct FakeStt {
    events: Mutex<Option<mpsc::Sender<SttEvent>>>,
    pub fail_connect: bool,
    pub audio_bytes: AtomicUsize,
    pub disconnects: AtomicUsize,
}

impl FakeStt {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail_connect: true,
            ..Default::default()
        })
    }

    pub async fn emit(&self, event: SttEvent) {
        let sender = self.events.lock().clone();
        sender
            .expect("recognizer not connected")
            .send(event)
            .await
            .expect("session stopped listening");
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechToText for FakeStt {
    fn provider(&self) -> &'static str {
        "fake-stt"
    }

    async fn connect(&self) -> ProviderResult<mpsc::Receiver<SttEvent>> {
        if self.fail_connect {
            return Err(ProviderError::ConnectionFailed("refused".to_string()));
        }
        let (tx, rx) = mpsc::channel(64);
        *self.events.lock() = Some(tx);
        Ok(rx)
    }

    async fn send_audio(&self, audio: Bytes) -> ProviderResult<()> {
        self.audio_bytes.fetch_add(audio.len(), Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> ProviderResult<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.events.lock().take();
        Ok(())
    }
}

/// Plays back one scripted event list per completion request.
#[derive(Default)]
pub struct FakeLlm {
    script: Mutex<VecDeque<Vec<LlmEvent>>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl FakeLlm {
    pub fn scripted(rounds: Vec<Vec<LlmEvent>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(rounds.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Context sent with each completion request, in order.
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl LanguageModel for FakeLlm {
    fn provider(&self) -> &'static str {
        "fake-llm"
    }

    fn model(&self) -> &str {
        "scripted"
    }

    async fn stream_completion(
        &self,
        messages: &[ChatMessage],
        events: mpsc::Sender<LlmEvent>,
        cancel: CancellationToken,
    ) -> ProviderResult<()> {
        self.requests.lock().push(messages.to_vec());
        let round = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| vec![LlmEvent::Done]);
        for event in round {
            if cancel.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }
            if events.send(event).await.is_err() {
                return Err(ProviderError::Cancelled);
            }
        }
        Ok(())
    }
}

/// Emits `CHUNK`-sized audio every `chunk_delay`. Text listed in `lengths`
/// gets that many chunks, anything else one.
pub struct FakeTts {
    chunk_delay: Duration,
    lengths: HashMap<String, usize>,
    spoken: Mutex<Vec<String>>,
}

impl FakeTts {
    pub fn new(chunk_delay: Duration, lengths: &[(&str, usize)]) -> Arc<Self> {
        Arc::new(Self {
            chunk_delay,
            lengths: lengths
                .iter()
                .map(|(text, chunks)| (text.to_string(), *chunks))
                .collect(),
            spoken: Mutex::new(Vec::new()),
        })
    }

    pub fn instant() -> Arc<Self> {
        Self::new(Duration::ZERO, &[])
    }

    /// Every text the session asked to synthesize.
    pub fn requested(&self) -> Vec<String> {
        self.spoken.lock().clone()
    }
}

#[async_trait]
impl TextToSpeech for FakeTts {
    fn provider(&self) -> &'static str {
        "fake-tts"
    }

    async fn synthesize(
        &self,
        text: &str,
        audio: mpsc::Sender<Bytes>,
        cancel: CancellationToken,
    ) -> ProviderResult<()> {
        self.spoken.lock().push(text.to_string());
        let chunks = self.lengths.get(text).copied().unwrap_or(1);
        for _ in 0..chunks {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                _ = tokio::time::sleep(self.chunk_delay) => {}
            }
            if audio.send(Bytes::from(vec![0xff; CHUNK])).await.is_err() {
                return Err(ProviderError::Cancelled);
            }
        }
        Ok(())
    }
}

// =============================================================================
// Factory and dependencies
// =============================================================================

/// Hands out a fixed provider set and records the tools it was given.
pub struct FakeFactory {
    set: ProviderSet,
    pub builds: AtomicUsize,
    tools: Mutex<Vec<ToolDefinition>>,
}

impl FakeFactory {
    pub fn realtime(provider: Arc<FakeRealtime>) -> Arc<Self> {
        Self::with_set(ProviderSet::Realtime(provider))
    }

    pub fn pipeline(stt: Arc<FakeStt>, llm: Arc<FakeLlm>, tts: Arc<FakeTts>) -> Arc<Self> {
        Self::with_set(ProviderSet::Pipeline(PipelineProviders { stt, llm, tts }))
    }

    fn with_set(set: ProviderSet) -> Arc<Self> {
        Arc::new(Self {
            set,
            builds: AtomicUsize::new(0),
            tools: Mutex::new(Vec::new()),
        })
    }

    /// Tool definitions passed to the last build.
    pub fn tools(&self) -> Vec<ToolDefinition> {
        self.tools.lock().clone()
    }
}

impl ProviderFactory for FakeFactory {
    fn build(
        &self,
        _agent: &AgentConfiguration,
        _credentials: &CredentialSet,
        tools: &[ToolDefinition],
        _config: &OrchestratorConfig,
    ) -> SessionResult<ProviderSet> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        *self.tools.lock() = tools.to_vec();
        Ok(self.set.clone())
    }
}

/// Dependencies over empty in-memory stores and the given factory.
pub fn deps_with(factory: Arc<dyn ProviderFactory>) -> SessionDeps {
    SessionDeps::new(
        CredentialResolver::new(Arc::new(InMemoryCredentialStore::new())),
        Arc::new(InMemoryIntegrationStore::new()),
        Arc::new(OrchestratorConfig::default()),
    )
    .with_factory(factory)
}

/// Realtime agent configuration.
pub fn realtime_agent() -> AgentConfiguration {
    AgentConfiguration {
        realtime_provider: Some("openai".to_string()),
        ..Default::default()
    }
}
