//! Voice sessions.
//!
//! A [`VoiceSession`] owns one call from `initialize` to `cleanup`. The agent
//! configuration picks its shape at construction: an integrated
//! speech-to-speech session or an STT → LLM → TTS pipeline. Both present the
//! same lifecycle, audio, tool and transcript operations.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use voice_orchestrator::config::{AgentConfiguration, OrchestratorConfig};
//! # use voice_orchestrator::core::{CredentialResolver, InMemoryCredentialStore, InMemoryIntegrationStore, SessionContext};
//! # use voice_orchestrator::session::{CallMetadata, CallTransport, SessionDeps, VoiceSession, TRANSPORT_CHANNEL_CAPACITY};
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let deps = SessionDeps::new(
//!     CredentialResolver::new(Arc::new(InMemoryCredentialStore::new())),
//!     Arc::new(InMemoryIntegrationStore::new()),
//!     Arc::new(OrchestratorConfig::default()),
//! );
//! let context = SessionContext::new("tenant-a".into(), Some("ws-1".into()));
//! let session = VoiceSession::new(context, AgentConfiguration::default(), deps);
//!
//! session.initialize().await?;
//! let (transport, _peer) = CallTransport::channel(CallMetadata::default(), TRANSPORT_CHANNEL_CAPACITY);
//! session.run(transport).await?;
//! session.cleanup().await;
//! println!("{}", session.get_transcript());
//! # Ok(())
//! # }
//! ```

mod pipeline;
mod playback;
mod realtime;
mod shared;
mod state;
mod transport;

use std::sync::Arc;

use bytes::Bytes;
use tracing::{Instrument, error, info, warn};

use crate::config::{AgentConfiguration, SessionMode};
use crate::core::context::SessionContext;
use crate::core::tools::{ToolCall, ToolResult};
use crate::core::transcript::TranscriptEntry;
use crate::errors::{SessionError, SessionResult};

pub use pipeline::PipelineSession;
pub use realtime::RealtimeSession;
pub use shared::SessionDeps;
pub use state::SessionState;
pub use transport::{
    CallMetadata, CallTransport, TRANSPORT_CHANNEL_CAPACITY, TransportFrame, TransportPeer,
};

use shared::SessionShared;

/// One voice call, in either session shape.
pub enum VoiceSession {
    Realtime(RealtimeSession),
    Pipeline(PipelineSession),
}

impl VoiceSession {
    pub fn new(context: SessionContext, agent: AgentConfiguration, deps: SessionDeps) -> Self {
        let mode = agent.mode();
        let shared = Arc::new(SessionShared::new(context, agent, deps));
        match mode {
            SessionMode::Realtime => VoiceSession::Realtime(RealtimeSession::new(shared)),
            SessionMode::Pipeline => VoiceSession::Pipeline(PipelineSession::new(shared)),
        }
    }

    fn shared(&self) -> &Arc<SessionShared> {
        match self {
            VoiceSession::Realtime(session) => session.shared(),
            VoiceSession::Pipeline(session) => session.shared(),
        }
    }

    pub fn mode(&self) -> SessionMode {
        match self {
            VoiceSession::Realtime(_) => SessionMode::Realtime,
            VoiceSession::Pipeline(_) => SessionMode::Pipeline,
        }
    }

    pub fn context(&self) -> &SessionContext {
        &self.shared().context
    }

    pub fn session_id(&self) -> &str {
        self.shared().context.session_id()
    }

    pub fn state(&self) -> SessionState {
        self.shared().state()
    }

    /// Resolve credentials, integrations and tools, then connect providers.
    ///
    /// The session is `Active` only once every provider connection is up. On
    /// any error it is `Failed` and whatever was opened has been closed.
    pub async fn initialize(&self) -> SessionResult<()> {
        let shared = self.shared().clone();
        shared.begin_initialize()?;

        async {
            info!(mode = self.mode().as_str(), "Initializing voice session");
            let result = match shared.prepare().await {
                Ok(providers) => match self {
                    VoiceSession::Realtime(session) => session.connect(providers).await,
                    VoiceSession::Pipeline(session) => session.connect(providers).await,
                },
                Err(e) => Err(e),
            };

            if let Err(e) = result {
                error!(error = %e, "Voice session initialization failed");
                self.close_providers().await;
                shared.release_tools().await;
                shared.transition(SessionState::Failed);
                return Err(e);
            }

            if !shared.transition(SessionState::Active) {
                // cleanup ran while providers were connecting
                self.close_providers().await;
                shared.release_tools().await;
                return Err(SessionError::InvalidState {
                    operation: "initialize",
                    state: shared.state(),
                });
            }
            info!("Voice session active");

            if let VoiceSession::Realtime(session) = self {
                session.start_greeting().await;
            }
            Ok(())
        }
        .instrument(shared.span())
        .await
    }

    /// Bridge the call's audio until the caller hangs up, the provider goes
    /// away or `cleanup` runs. A provider dropping mid-call fails the session.
    pub async fn run(&self, transport: CallTransport) -> SessionResult<()> {
        let shared = self.shared().clone();
        let state = shared.state();
        if state != SessionState::Active {
            return Err(SessionError::InvalidState {
                operation: "run",
                state,
            });
        }

        async {
            let result = match self {
                VoiceSession::Realtime(session) => session.run(transport).await,
                VoiceSession::Pipeline(session) => session.run(transport).await,
            };
            if let Err(e) = &result
                && e.is_fatal()
            {
                error!(error = %e, "Voice session failed");
                shared.transition(SessionState::Failed);
            }
            result
        }
        .instrument(shared.span())
        .await
    }

    /// Run a model-requested tool. Always yields exactly one result.
    pub async fn handle_tool_call(&self, call: &ToolCall) -> ToolResult {
        let shared = self.shared();
        shared
            .handle_tool_call(call)
            .instrument(shared.span())
            .await
    }

    /// Forward caller audio to the active provider. Failures are logged and
    /// never end the session.
    pub async fn send_audio(&self, audio: Bytes) {
        let shared = self.shared();
        let state = shared.state();
        if state != SessionState::Active {
            warn!(session_id = %shared.context.session_id(), %state, "Dropping caller audio: session not active");
            return;
        }
        match self {
            VoiceSession::Realtime(session) => session.send_audio(audio).instrument(shared.span()).await,
            VoiceSession::Pipeline(session) => session.send_audio(audio).instrument(shared.span()).await,
        }
    }

    /// Transcript so far as `[User]: …` / `[Assistant]: …` paragraphs.
    pub fn get_transcript(&self) -> String {
        self.shared().transcript.format()
    }

    pub fn get_transcript_entries(&self) -> Vec<TranscriptEntry> {
        self.shared().transcript.entries()
    }

    /// Stop session tasks, commit buffered assistant text, release tools and
    /// close provider connections. Safe to call in any state, any number of
    /// times.
    pub async fn cleanup(&self) {
        let shared = self.shared().clone();
        let Some(previous) = shared.begin_cleanup() else {
            return;
        };

        async {
            info!(from = %previous, "Cleaning up voice session");
            shared.shutdown_tasks().await;
            if shared.transcript.flush() {
                info!("Committed buffered assistant text");
            }
            shared.release_tools().await;
            self.close_providers().await;

            if previous != SessionState::Failed {
                shared.transition(SessionState::Closed);
            }
            info!(
                entries = shared.transcript.entries().len(),
                "Voice session closed"
            );
        }
        .instrument(shared.span())
        .await
    }

    async fn close_providers(&self) {
        match self {
            VoiceSession::Realtime(session) => session.close().await,
            VoiceSession::Pipeline(session) => session.close().await,
        }
    }
}
