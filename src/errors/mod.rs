//! Error types shared across the orchestrator.
//!
//! `SessionError` is what callers of a voice session see; `ProviderError` is what
//! individual STT/TTS/LLM/realtime backends report before the session maps it.

pub mod provider_error;
pub mod session_error;

pub use provider_error::{ProviderError, ProviderResult};
pub use session_error::{SessionError, SessionResult};
