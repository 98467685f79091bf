//! STT → LLM → TTS session.
//!
//! Caller audio feeds both the recognizer and a local VAD. A final transcript
//! starts an assistant turn on its own task with a per-turn cancellation
//! token. The turn streams the completion and speaks it sentence by sentence.
//! It stays open until the forwarded audio has played out, and commits to the
//! context only the sentences the caller heard in full. Caller speech during
//! a turn cancels the token and clears playback.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::playback::PlaybackClock;
use super::shared::SessionShared;
use super::transport::{CallTransport, TransportFrame};
use crate::core::llm::{ChatMessage, LLM_EVENT_CAPACITY, LlmEvent};
use crate::core::providers::{PipelineProviders, ProviderSet, build_instructions};
use crate::core::stt::SttEvent;
use crate::core::tools::ToolCall;
use crate::core::transcript::TranscriptRole;
use crate::core::vad::{EnergyVad, VadConfig};
use crate::errors::{ProviderError, SessionError, SessionResult};

/// Audio chunks buffered between a synthesizer and the transport.
const SYNTHESIS_CHANNEL_CAPACITY: usize = 32;

pub struct PipelineSession {
    shared: Arc<SessionShared>,
    stages: Mutex<Option<PipelineProviders>>,
    stt_events: Mutex<Option<mpsc::Receiver<SttEvent>>>,
}

impl PipelineSession {
    pub(super) fn new(shared: Arc<SessionShared>) -> Self {
        Self {
            shared,
            stages: Mutex::new(None),
            stt_events: Mutex::new(None),
        }
    }

    pub(super) fn shared(&self) -> &Arc<SessionShared> {
        &self.shared
    }

    fn stages(&self) -> Option<PipelineProviders> {
        self.stages.lock().clone()
    }

    /// Open the recognizer. LLM and TTS are request/response and need no
    /// connection up front.
    pub(super) async fn connect(&self, providers: ProviderSet) -> SessionResult<()> {
        let ProviderSet::Pipeline(stages) = providers else {
            return Err(SessionError::InvalidConfiguration(
                "pipeline session requires STT, LLM and TTS providers".to_string(),
            ));
        };
        *self.stages.lock() = Some(stages.clone());

        let events = stages
            .stt
            .connect()
            .await
            .map_err(|e| SessionError::connection_failure(stages.stt.provider(), e))?;
        *self.stt_events.lock() = Some(events);
        info!(
            stt = stages.stt.provider(),
            llm = stages.llm.provider(),
            model = stages.llm.model(),
            tts = stages.tts.provider(),
            "Pipeline providers connected"
        );
        Ok(())
    }

    pub(super) async fn send_audio(&self, audio: Bytes) {
        let Some(stages) = self.stages() else {
            warn!("Dropping caller audio: no recognizer");
            return;
        };
        if let Err(e) = stages.stt.send_audio(audio).await {
            warn!(
                provider = stages.stt.provider(),
                error = %SessionError::AudioDeliveryFailure(e.to_string()),
                "Dropping caller audio"
            );
        }
    }

    pub(super) async fn run(&self, transport: CallTransport) -> SessionResult<()> {
        let stages = self.stages().ok_or_else(|| {
            SessionError::connection_failure("stt", ProviderError::NotConnected)
        })?;
        let events = self.stt_events.lock().take();
        let events = events.ok_or_else(|| SessionError::InvalidState {
            operation: "run",
            state: self.shared.state(),
        })?;

        let handle = self.shared.spawn(converse(
            self.shared.clone(),
            stages,
            events,
            transport,
        ));
        match handle.await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Pipeline task failed");
                Ok(())
            }
        }
    }

    pub(super) async fn close(&self) {
        self.stt_events.lock().take();
        let stages = self.stages.lock().take();
        let Some(stages) = stages else {
            return;
        };
        if let Err(e) = stages.stt.disconnect().await {
            warn!(provider = stages.stt.provider(), error = %e, "Error disconnecting recognizer");
        }
        if let Err(e) = stages.tts.close().await {
            warn!(provider = stages.tts.provider(), error = %e, "Error closing synthesizer");
        }
    }
}

// =============================================================================
// Conversation loop
// =============================================================================

/// What starts an assistant turn.
#[derive(Debug)]
enum TurnInput {
    Greeting(String),
    User(String),
}

/// A running assistant turn and the token that interrupts it. The task
/// outlives the completion until its audio has played out.
struct ActiveTurn {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ActiveTurn {
    fn is_running(&self) -> bool {
        !self.handle.is_finished() && !self.cancel.is_cancelled()
    }
}

async fn converse(
    shared: Arc<SessionShared>,
    stages: PipelineProviders,
    mut stt_events: mpsc::Receiver<SttEvent>,
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
        "Pipeline conversation started"
    );

    let agent = &shared.agent;
    let instructions = build_instructions(
        &agent.system_prompt,
        None,
        &agent.language,
        agent.timezone_or(&shared.config().default_timezone),
    );
    let turns = Arc::new(Turns {
        shared: shared.clone(),
        stages: stages.clone(),
        outbound: outbound.clone(),
        history: Mutex::new(vec![ChatMessage::system(instructions)]),
        max_tool_rounds: shared.config().max_tool_rounds,
    });

    let mut vad = EnergyVad::new(VadConfig::for_pipeline(&agent.turn_detection()));
    let mut current: Option<ActiveTurn> = None;
    let mut utterance = String::new();

    if let Some(greeting) = agent.initial_greeting() {
        current = Some(start_turn(&turns, TurnInput::Greeting(greeting.to_string()), None));
    }

    let result = loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break Ok(()),
            frame = inbound.recv() => {
                let Some(audio) = frame else {
                    info!("Caller audio ended");
                    break Ok(());
                };
                if let Err(e) = stages.stt.send_audio(audio.clone()).await {
                    warn!(
                        provider = stages.stt.provider(),
                        error = %SessionError::AudioDeliveryFailure(e.to_string()),
                        "Dropping caller audio"
                    );
                }
                let mut transport_open = true;
                for result in vad.process_mulaw(&audio) {
                    if result.speech_start {
                        transport_open &= interrupt(current.as_ref(), &outbound).await;
                    }
                    if result.speech_end
                        && let Err(e) = stages.stt.end_of_speech().await
                    {
                        warn!(provider = stages.stt.provider(), error = %e, "End of speech not delivered");
                    }
                }
                if !transport_open {
                    info!("Transport closed; stopping conversation");
                    break Ok(());
                }
            }
            event = stt_events.recv() => match event {
                Some(SttEvent::Transcript { text, is_final, speech_final }) => {
                    if is_final && !text.trim().is_empty() {
                        if !utterance.is_empty() {
                            utterance.push(' ');
                        }
                        utterance.push_str(text.trim());
                    }
                    if speech_final && !utterance.is_empty() {
                        if !interrupt(current.as_ref(), &outbound).await {
                            break Ok(());
                        }
                        let text = std::mem::take(&mut utterance);
                        current = Some(start_turn(&turns, TurnInput::User(text), current.take()));
                    }
                }
                Some(SttEvent::UtteranceEnd) => {
                    if !utterance.is_empty() {
                        if !interrupt(current.as_ref(), &outbound).await {
                            break Ok(());
                        }
                        let text = std::mem::take(&mut utterance);
                        current = Some(start_turn(&turns, TurnInput::User(text), current.take()));
                    }
                }
                Some(SttEvent::SpeechStarted) => {
                    if !interrupt(current.as_ref(), &outbound).await {
                        break Ok(());
                    }
                }
                None => {
                    if shared.cancel.is_cancelled() {
                        break Ok(());
                    }
                    warn!(provider = stages.stt.provider(), "Recognizer stream closed");
                    break Err(SessionError::connection_failure(
                        stages.stt.provider(),
                        ProviderError::ConnectionFailed("recognizer stream closed".to_string()),
                    ));
                }
            },
        }
    };

    if let Some(turn) = current.take() {
        turn.cancel.cancel();
        if let Err(e) = turn.handle.await {
            error!(error = %e, "Assistant turn task failed");
        }
    }
    result
}

/// Cancel the running turn, if any, and clear the caller's playback buffer.
/// Returns `false` once the transport is gone.
async fn interrupt(current: Option<&ActiveTurn>, outbound: &mpsc::Sender<TransportFrame>) -> bool {
    let Some(turn) = current.filter(|turn| turn.is_running()) else {
        return true;
    };
    info!("Caller interrupted assistant");
    turn.cancel.cancel();
    outbound.send(TransportFrame::Clear).await.is_ok()
}

/// Spawn a turn. A previous turn is cancelled and awaited first so context
/// updates stay in order.
fn start_turn(turns: &Arc<Turns>, input: TurnInput, previous: Option<ActiveTurn>) -> ActiveTurn {
    let cancel = turns.shared.cancel.child_token();
    let previous = previous.map(|turn| {
        turn.cancel.cancel();
        turn.handle
    });

    let task_turns = turns.clone();
    let token = cancel.clone();
    let handle = turns.shared.spawn(async move {
        if let Some(previous) = previous
            && let Err(e) = previous.await
        {
            error!(error = %e, "Assistant turn task failed");
        }
        task_turns.run(input, token).await;
    });
    ActiveTurn { cancel, handle }
}

// =============================================================================
// Assistant turns
// =============================================================================

/// How far a piece of text got toward the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Spoken,
    Interrupted,
    Failed,
}

/// Sentences forwarded during one turn and when each finishes playing.
#[derive(Debug, Default)]
struct Spoken {
    clock: PlaybackClock,
    sentences: Vec<(String, Instant)>,
}

impl Spoken {
    /// Mark `sentence` fully forwarded. It is heard once the audio queued so
    /// far has played.
    fn finish_sentence(&mut self, sentence: String) {
        let ends_at = self.clock.ends_at().unwrap_or_else(Instant::now);
        self.sentences.push((sentence, ends_at));
    }

    /// Sentences the caller has heard in full. The rest are dropped.
    fn take_heard(&mut self) -> Vec<String> {
        self.take_heard_at(Instant::now())
    }

    fn take_heard_at(&mut self, now: Instant) -> Vec<String> {
        self.sentences
            .drain(..)
            .filter(|(_, ends_at)| *ends_at <= now)
            .map(|(sentence, _)| sentence)
            .collect()
    }

    fn take_all(&mut self) -> Vec<String> {
        self.sentences.drain(..).map(|(sentence, _)| sentence).collect()
    }
}

struct Turns {
    shared: Arc<SessionShared>,
    stages: PipelineProviders,
    outbound: mpsc::Sender<TransportFrame>,
    history: Mutex<Vec<ChatMessage>>,
    max_tool_rounds: usize,
}

impl Turns {
    async fn run(&self, input: TurnInput, cancel: CancellationToken) {
        let mut spoken = Spoken::default();
        match input {
            TurnInput::Greeting(greeting) => {
                let mut buffer = greeting;
                self.speak_sentences(&mut buffer, true, &mut spoken, &cancel)
                    .await;
            }
            TurnInput::User(text) => {
                debug!(chars = text.len(), "Caller utterance");
                self.shared.transcript.append(TranscriptRole::User, &text);
                self.history.lock().push(ChatMessage::user(text));
                self.respond(&mut spoken, &cancel).await;
            }
        }

        // Still interruptible while queued audio plays
        if let Some(ends_at) = spoken.clock.ends_at() {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(heard_ms = spoken.clock.heard_ms(), "Playback cut short");
                }
                _ = tokio::time::sleep_until(ends_at.into()) => {}
            }
        }
        self.commit(spoken.take_heard());
        self.shared.transcript.flush();
    }

    /// Completion rounds until the model answers without tools, the round
    /// limit is hit or the turn is interrupted.
    async fn respond(&self, spoken: &mut Spoken, cancel: &CancellationToken) {
        let mut round = 0;
        loop {
            let (calls, interrupted) = self.complete(spoken, cancel).await;
            if interrupted || cancel.is_cancelled() || calls.is_empty() {
                break;
            }

            round += 1;
            if round > self.max_tool_rounds {
                warn!(rounds = self.max_tool_rounds, "Tool round limit reached");
                break;
            }

            let results = tokio::select! {
                _ = cancel.cancelled() => break,
                results = join_all(calls.iter().map(|call| self.shared.handle_tool_call(call))) => results,
            };

            debug!(round, calls = calls.len(), "Tool results added to context");
            // Text preceding a tool call stays with it, played out or not
            let text = spoken.take_all().join(" ");
            if !text.is_empty() {
                self.shared.transcript.accumulate(&text);
                self.shared.transcript.accumulate(" ");
            }
            {
                let mut history = self.history.lock();
                history.push(ChatMessage::assistant_tool_calls(text, calls.clone()));
                for (call, result) in calls.iter().zip(results) {
                    history.push(ChatMessage::tool_result(call, result.to_model_output()));
                }
            }
        }
    }

    /// Stream one completion and speak it. Returns requested tool calls and
    /// whether speech was cut short.
    async fn complete(
        &self,
        spoken: &mut Spoken,
        cancel: &CancellationToken,
    ) -> (Vec<ToolCall>, bool) {
        let messages = self.history.lock().clone();
        let (tx, mut rx) = mpsc::channel(LLM_EVENT_CAPACITY);
        let llm = self.stages.llm.clone();
        let llm_cancel = cancel.child_token();
        let completion = async move { llm.stream_completion(&messages, tx, llm_cancel).await };

        let speaking = async {
            let mut buffer = String::new();
            let mut calls = Vec::new();
            let mut interrupted = false;
            while let Some(event) = rx.recv().await {
                match event {
                    LlmEvent::TextDelta(delta) => {
                        buffer.push_str(&delta);
                        if !interrupted {
                            interrupted = self.speak_sentences(&mut buffer, false, spoken, cancel).await;
                        }
                    }
                    LlmEvent::ToolCalls(requested) => calls.extend(requested),
                    LlmEvent::Done => {}
                }
            }
            if !interrupted {
                interrupted = self.speak_sentences(&mut buffer, true, spoken, cancel).await;
            }
            (calls, interrupted)
        };

        let (outcome, (calls, interrupted)) = tokio::join!(completion, speaking);
        match outcome {
            Ok(()) | Err(ProviderError::Cancelled) => {}
            Err(e) => warn!(
                provider = self.stages.llm.provider(),
                error = %e,
                "Completion failed"
            ),
        }
        (calls, interrupted)
    }

    /// Speak every complete sentence in `buffer` (and the remainder when
    /// `flush_rest`). Returns `true` if delivery stopped early.
    async fn speak_sentences(
        &self,
        buffer: &mut String,
        flush_rest: bool,
        spoken: &mut Spoken,
        cancel: &CancellationToken,
    ) -> bool {
        loop {
            let sentence = match take_sentence(buffer) {
                Some(sentence) => sentence,
                None if flush_rest && !buffer.trim().is_empty() => {
                    let rest = buffer.trim().to_string();
                    buffer.clear();
                    rest
                }
                None => return false,
            };
            match self.speak(&sentence, &mut spoken.clock, cancel).await {
                Delivery::Spoken => spoken.finish_sentence(sentence),
                Delivery::Failed => {}
                Delivery::Interrupted => return true,
            }
        }
    }

    /// Synthesize `text` and forward its audio until done or cancelled.
    /// Forwarded audio is recorded on `clock`.
    async fn speak(
        &self,
        text: &str,
        clock: &mut PlaybackClock,
        cancel: &CancellationToken,
    ) -> Delivery {
        let (audio_tx, mut audio_rx) = mpsc::channel::<Bytes>(SYNTHESIS_CHANNEL_CAPACITY);
        let synthesis = self.stages.tts.synthesize(text, audio_tx, cancel.clone());

        let outbound = &self.outbound;
        let forward = async {
            while let Some(chunk) = audio_rx.recv().await {
                if cancel.is_cancelled() {
                    return Delivery::Interrupted;
                }
                let len = chunk.len();
                if outbound.send(TransportFrame::Audio(chunk)).await.is_err() {
                    warn!(
                        error = %SessionError::AudioDeliveryFailure("transport closed".to_string()),
                        "Dropping assistant audio"
                    );
                    return Delivery::Interrupted;
                }
                clock.record(len);
            }
            Delivery::Spoken
        };

        let (synthesized, forwarded) = tokio::join!(synthesis, forward);
        if cancel.is_cancelled() {
            return Delivery::Interrupted;
        }
        match synthesized {
            Ok(()) => forwarded,
            Err(ProviderError::Cancelled) => Delivery::Interrupted,
            Err(e) => {
                warn!(provider = self.stages.tts.provider(), error = %e, "Synthesis failed");
                Delivery::Failed
            }
        }
    }

    /// Record what the caller heard as the assistant's reply.
    fn commit(&self, heard: Vec<String>) {
        if heard.is_empty() {
            return;
        }
        let text = heard.join(" ");
        self.shared.transcript.accumulate(&text);
        self.history.lock().push(ChatMessage::assistant(text));
    }
}

/// Byte offset just past the first sentence terminator that is followed by
/// whitespace.
fn sentence_end(text: &str) -> Option<usize> {
    let mut chars = text.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?' | '\n')
            && let Some(&(next, following)) = chars.peek()
            && following.is_whitespace()
        {
            return Some(next);
        }
    }
    None
}

/// Remove and return the first complete sentence of `buffer`.
fn take_sentence(buffer: &mut String) -> Option<String> {
    while let Some(end) = sentence_end(buffer) {
        let sentence: String = buffer.drain(..end).collect();
        let sentence = sentence.trim();
        if !sentence.is_empty() {
            return Some(sentence.to_string());
        }
    }
    None
}
