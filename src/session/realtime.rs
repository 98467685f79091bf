//! Integrated speech-to-speech session.
//!
//! Caller audio goes straight to the provider; provider audio goes straight
//! to the transport. The provider runs turn detection, so barge-in is driven
//! by its `SpeechStarted` event.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::playback::{PlaybackClock, heard_text};
use super::shared::SessionShared;
use super::transport::{CallTransport, TransportFrame};
use crate::core::providers::ProviderSet;
use crate::core::realtime::{RealtimeEvent, SpeechToSpeech};
use crate::core::tools::ToolCall;
use crate::core::transcript::TranscriptRole;
use crate::errors::{ProviderError, SessionError, SessionResult};

pub struct RealtimeSession {
    shared: Arc<SessionShared>,
    provider: Mutex<Option<Arc<dyn SpeechToSpeech>>>,
    events: Mutex<Option<mpsc::Receiver<RealtimeEvent>>>,
}

impl RealtimeSession {
    pub(super) fn new(shared: Arc<SessionShared>) -> Self {
        Self {
            shared,
            provider: Mutex::new(None),
            events: Mutex::new(None),
        }
    }

    pub(super) fn shared(&self) -> &Arc<SessionShared> {
        &self.shared
    }

    fn provider(&self) -> Option<Arc<dyn SpeechToSpeech>> {
        self.provider.lock().clone()
    }

    pub(super) async fn connect(&self, providers: ProviderSet) -> SessionResult<()> {
        let ProviderSet::Realtime(provider) = providers else {
            return Err(SessionError::InvalidConfiguration(
                "integrated session requires a speech-to-speech provider".to_string(),
            ));
        };
        // Stored first so a failed connect is still disconnected on cleanup
        *self.provider.lock() = Some(provider.clone());

        let events = provider
            .connect()
            .await
            .map_err(|e| SessionError::connection_failure(provider.provider(), e))?;
        *self.events.lock() = Some(events);
        info!(provider = provider.provider(), "Realtime provider connected");
        Ok(())
    }

    /// Ask the provider to speak the greeting its instructions carry.
    pub(super) async fn start_greeting(&self) {
        if self.shared.agent.initial_greeting().is_none() {
            return;
        }
        let Some(provider) = self.provider() else {
            return;
        };
        match provider.create_response().await {
            Ok(()) => debug!("Initial greeting requested"),
            Err(e) => warn!(provider = provider.provider(), error = %e, "Failed to request initial greeting"),
        }
    }

    pub(super) async fn send_audio(&self, audio: Bytes) {
        let Some(provider) = self.provider() else {
            warn!("Dropping caller audio: no realtime provider");
            return;
        };
        if let Err(e) = provider.send_audio(audio).await {
            warn!(
                provider = provider.provider(),
                error = %SessionError::AudioDeliveryFailure(e.to_string()),
                "Dropping caller audio"
            );
        }
    }

    pub(super) async fn run(&self, transport: CallTransport) -> SessionResult<()> {
        let provider = self.provider().ok_or_else(|| {
            SessionError::connection_failure("realtime", ProviderError::NotConnected)
        })?;
        let events = self.events.lock().take();
        let events = events.ok_or_else(|| SessionError::InvalidState {
            operation: "run",
            state: self.shared.state(),
        })?;

        let handle = self.shared.spawn(bridge(
            self.shared.clone(),
            provider,
            events,
            transport,
        ));
        match handle.await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Realtime bridge task failed");
                Ok(())
            }
        }
    }

    pub(super) async fn close(&self) {
        self.events.lock().take();
        let provider = self.provider.lock().take();
        if let Some(provider) = provider
            && let Err(e) = provider.disconnect().await
        {
            warn!(provider = provider.provider(), error = %e, "Error disconnecting realtime provider");
        }
    }
}

// =============================================================================
// Audio bridge
// =============================================================================

/// Tool outcomes reported back to the bridge.
const TOOL_RESULT_CAPACITY: usize = 16;

/// Assistant audio forwarded to the caller for the current output item.
#[derive(Debug, Default)]
struct Playback {
    item_id: Option<String>,
    clock: PlaybackClock,
    /// Between the first audio of a response and its `ResponseDone`
    response_active: bool,
    /// Item cut short by barge-in; its late audio is dropped
    cancelled_item: Option<String>,
    /// Transcript text of the interrupted response is ignored until it ends
    suppress_text: bool,
}

impl Playback {
    /// Whether the caller may still be hearing assistant audio.
    fn is_playing(&self) -> bool {
        self.response_active || self.clock.is_playing()
    }

    /// Returns `true` when `item_id` starts a new output item.
    fn record(&mut self, item_id: &str, bytes: usize) -> bool {
        let new_item = self.item_id.as_deref() != Some(item_id);
        if new_item {
            self.item_id = Some(item_id.to_string());
            self.clock.start_segment();
        }
        self.clock.record(bytes);
        self.response_active = true;
        new_item
    }
}

/// When to ask the model to continue after tool results.
///
/// The provider rejects a new response while one is still generating, so
/// the request waits until every outstanding call has answered and the
/// response that issued them is done.
#[derive(Debug, Default)]
struct ToolResumption {
    response_open: bool,
    outstanding: usize,
    submitted: bool,
}

impl ToolResumption {
    fn response_started(&mut self) {
        self.response_open = true;
    }

    fn call_started(&mut self) {
        self.outstanding += 1;
        self.response_open = true;
    }

    /// Returns `true` if a response should be requested now.
    fn call_answered(&mut self, submitted: bool) -> bool {
        self.outstanding = self.outstanding.saturating_sub(1);
        self.submitted |= submitted;
        self.take_ready()
    }

    /// Returns `true` if a response should be requested now.
    fn response_done(&mut self) -> bool {
        self.response_open = false;
        self.take_ready()
    }

    fn take_ready(&mut self) -> bool {
        if !self.submitted || self.outstanding > 0 || self.response_open {
            return false;
        }
        self.submitted = false;
        self.response_open = true;
        true
    }
}

/// Per-connection state of the audio bridge.
struct Bridge {
    shared: Arc<SessionShared>,
    provider: Arc<dyn SpeechToSpeech>,
    outbound: mpsc::Sender<TransportFrame>,
    playback: Playback,
    tools: ToolResumption,
    tool_results: mpsc::Sender<bool>,
}

async fn bridge(
    shared: Arc<SessionShared>,
    provider: Arc<dyn SpeechToSpeech>,
    mut events: mpsc::Receiver<RealtimeEvent>,
    transport: CallTransport,
) -> SessionResult<()> {
    let CallTransport {
        metadata,
        mut inbound,
        outbound,
    } = transport;
    info!(
        stream_id = ?metadata.stream_id,
        call_id = ?metadata.call_id,
        provider = provider.provider(),
        "Realtime audio bridge started"
    );

    let (tool_results, mut answered) = mpsc::channel(TOOL_RESULT_CAPACITY);
    let mut bridge = Bridge {
        shared: shared.clone(),
        provider: provider.clone(),
        outbound,
        playback: Playback::default(),
        tools: ToolResumption::default(),
        tool_results,
    };
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => {
                debug!("Realtime audio bridge cancelled");
                return Ok(());
            }
            frame = inbound.recv() => match frame {
                Some(audio) => {
                    if let Err(e) = provider.send_audio(audio).await {
                        warn!(
                            provider = provider.provider(),
                            error = %SessionError::AudioDeliveryFailure(e.to_string()),
                            "Dropping caller audio"
                        );
                    }
                }
                None => {
                    info!("Caller audio ended");
                    return Ok(());
                }
            },
            Some(submitted) = answered.recv() => {
                if bridge.tools.call_answered(submitted) {
                    bridge.resume_after_tools().await;
                }
            }
            event = events.recv() => match event {
                Some(RealtimeEvent::Closed) | None => {
                    if shared.cancel.is_cancelled() {
                        return Ok(());
                    }
                    warn!(provider = provider.provider(), "Realtime provider closed the connection");
                    return Err(SessionError::connection_failure(
                        provider.provider(),
                        ProviderError::ConnectionFailed("connection closed by provider".to_string()),
                    ));
                }
                Some(event) => {
                    if !bridge.handle_event(event).await {
                        info!("Transport closed; stopping realtime audio bridge");
                        return Ok(());
                    }
                }
            },
        }
    }
}

impl Bridge {
    /// Apply one provider event. Returns `false` once the transport is gone.
    async fn handle_event(&mut self, event: RealtimeEvent) -> bool {
        match event {
            RealtimeEvent::SessionCreated { session_id } => {
                debug!(provider_session_id = %session_id, "Realtime session created");
            }
            RealtimeEvent::Audio { data, item_id } => {
                if self.playback.cancelled_item.as_deref() == Some(item_id.as_str()) {
                    return true;
                }
                let len = data.len();
                if self.outbound.send(TransportFrame::Audio(data)).await.is_err() {
                    warn!(
                        error = %SessionError::AudioDeliveryFailure("transport closed".to_string()),
                        "Dropping assistant audio"
                    );
                    return false;
                }
                if self.playback.record(&item_id, len) {
                    // Text of an earlier reply held back while its audio played
                    self.shared.transcript.flush();
                }
                self.tools.response_started();
            }
            RealtimeEvent::AssistantTranscriptDelta(delta) => {
                if !self.playback.suppress_text {
                    self.shared.transcript.accumulate(&delta);
                }
            }
            RealtimeEvent::AssistantTranscriptDone(text) => {
                if !self.playback.suppress_text && self.shared.transcript.pending().trim().is_empty() {
                    self.shared.transcript.accumulate(&text);
                }
            }
            RealtimeEvent::UserTranscript(text) => {
                self.shared.transcript.flush();
                self.shared.transcript.append(TranscriptRole::User, &text);
            }
            RealtimeEvent::SpeechStarted => {
                if self.playback.is_playing() {
                    return self.barge_in().await;
                }
                self.shared.transcript.flush();
                debug!("Caller speech started");
            }
            RealtimeEvent::ToolCall(call) => {
                self.tools.call_started();
                dispatch_tool_call(&self.shared, &self.provider, &self.tool_results, call);
            }
            RealtimeEvent::ResponseDone => {
                self.playback.response_active = false;
                self.playback.suppress_text = false;
                // Text stays pending while its audio is still playing
                if !self.playback.clock.is_playing() {
                    self.shared.transcript.flush();
                }
                if self.tools.response_done() {
                    self.resume_after_tools().await;
                }
            }
            RealtimeEvent::Error(message) => {
                warn!(provider = self.provider.provider(), error = %message, "Realtime provider error");
            }
            RealtimeEvent::Closed => {}
        }
        true
    }

    /// Stop the assistant: cancel generation, cut the item at what the
    /// caller heard and drop audio still buffered on the telephony side.
    async fn barge_in(&mut self) -> bool {
        let forwarded_ms = self.playback.clock.forwarded_ms();
        let audio_end_ms = self.playback.clock.heard_ms();
        info!(
            item_id = ?self.playback.item_id,
            audio_end_ms,
            forwarded_ms,
            "Caller interrupted assistant"
        );

        let provider = &self.provider;
        if self.playback.response_active
            && let Err(e) = provider.cancel_response().await
        {
            warn!(provider = provider.provider(), error = %e, "Failed to cancel response");
        }
        if let Some(item_id) = self.playback.item_id.take() {
            if let Err(e) = provider.truncate(&item_id, audio_end_ms).await {
                warn!(provider = provider.provider(), error = %e, "Failed to truncate assistant item");
            }
            self.playback.cancelled_item = Some(item_id);
        }
        self.playback.clock.reset();
        self.playback.response_active = false;
        self.playback.suppress_text = true;

        let transcript = &self.shared.transcript;
        let pending = transcript.pending();
        transcript.discard_pending();
        transcript.append(
            TranscriptRole::Assistant,
            heard_text(&pending, audio_end_ms, forwarded_ms),
        );

        self.outbound.send(TransportFrame::Clear).await.is_ok()
    }

    async fn resume_after_tools(&self) {
        match self.provider.create_response().await {
            Ok(()) => debug!("Response requested after tool results"),
            Err(e) => warn!(provider = self.provider.provider(), error = %e, "Failed to resume after tool result"),
        }
    }
}

/// Run a tool on its own task and hand the result back. Audio keeps flowing
/// meanwhile; the bridge hears whether a result was submitted.
fn dispatch_tool_call(
    shared: &Arc<SessionShared>,
    provider: &Arc<dyn SpeechToSpeech>,
    answered: &mpsc::Sender<bool>,
    call: ToolCall,
) {
    let task_shared = shared.clone();
    let provider = provider.clone();
    let answered = answered.clone();
    shared.spawn(async move {
        let result = tokio::select! {
            _ = task_shared.cancel.cancelled() => return,
            result = task_shared.handle_tool_call(&call) => result,
        };
        let submitted = match call.id.as_deref() {
            Some(call_id) => match provider
                .submit_tool_result(call_id, result.to_model_output())
                .await
            {
                Ok(()) => true,
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "Failed to submit tool result");
                    false
                }
            },
            None => {
                warn!(tool = %call.name, "Tool call has no call id; result dropped");
                false
            }
        };
        if answered.send(submitted).await.is_err() {
            debug!(tool = %call.name, "Audio bridge stopped before tool result");
        }
    });
}
