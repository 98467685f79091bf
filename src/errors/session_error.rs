use thiserror::Error;

use super::provider_error::ProviderError;
use crate::core::credentials::StoreError;
use crate::core::providers::ProviderStage;
use crate::session::SessionState;

/// Errors surfaced by a voice session.
///
/// `MissingCredential`, `UnsupportedProvider`, `ProviderConnectionFailure` and
/// `CredentialStore` abort `initialize`. The remaining variants are recovered
/// locally: tool failures become failed tool results, audio and transcript
/// failures are logged and the call continues.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Required provider key is not configured for the session's scope
    #[error("Missing credential for provider '{provider}'")]
    MissingCredential { provider: String },

    /// Provider name is not known for the given stage
    #[error("Unsupported {stage} provider: {value}")]
    UnsupportedProvider { stage: ProviderStage, value: String },

    /// Could not establish a provider connection
    #[error("Failed to connect to {provider}: {source}")]
    ProviderConnectionFailure {
        provider: String,
        #[source]
        source: ProviderError,
    },

    /// A tool handler failed; recovered into a failed tool result
    #[error("Tool '{tool}' failed: {message}")]
    ToolExecutionFailure { tool: String, message: String },

    /// Audio could not be forwarded to the provider or the transport
    #[error("Audio delivery failed: {0}")]
    AudioDeliveryFailure(String),

    /// Final transcript text could not be captured
    #[error("Transcript capture failed: {0}")]
    TranscriptCaptureFailure(String),

    /// Credential or integration store lookup failed
    #[error("Credential store error: {0}")]
    CredentialStore(#[from] StoreError),

    /// Agent configuration rejected by a provider
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Operation not valid in the current lifecycle state
    #[error("Cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

impl SessionError {
    /// Whether the error ends the session (moves it to `Failed`).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::MissingCredential { .. }
                | SessionError::UnsupportedProvider { .. }
                | SessionError::ProviderConnectionFailure { .. }
                | SessionError::CredentialStore(_)
                | SessionError::InvalidConfiguration(_)
        )
    }

    pub fn missing_credential(provider: impl Into<String>) -> Self {
        SessionError::MissingCredential {
            provider: provider.into(),
        }
    }

    pub fn connection_failure(provider: impl Into<String>, source: ProviderError) -> Self {
        SessionError::ProviderConnectionFailure {
            provider: provider.into(),
            source,
        }
    }
}
