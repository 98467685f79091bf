pub mod config;
pub mod core;
pub mod errors;
pub mod session;

// Re-export commonly used items for convenience
pub use config::{AgentConfiguration, OrchestratorConfig, SessionMode};
pub use crate::core::*;
pub use errors::{ProviderError, ProviderResult, SessionError, SessionResult};
pub use session::{
    CallMetadata, CallTransport, SessionDeps, SessionState, TransportFrame, TransportPeer,
    VoiceSession,
};
