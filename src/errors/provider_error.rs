use thiserror::Error;

/// Errors raised by a single provider backend.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Connection to the provider failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Provider rejected the credential
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Non-success HTTP status from a REST endpoint
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Unexpected or malformed provider message
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid provider configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Operation exceeded its time budget
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Operation attempted before `connect`
    #[error("Not connected")]
    NotConnected,

    /// Operation aborted through its cancellation token
    #[error("Cancelled")]
    Cancelled,
}

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout(err.to_string())
        } else if let Some(status) = err.status() {
            ProviderError::Http {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            ProviderError::ConnectionFailed(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ProviderError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::Http(response) if response.status().as_u16() == 401 => {
                ProviderError::AuthenticationFailed("provider returned 401".to_string())
            }
            other => ProviderError::ConnectionFailed(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Protocol(err.to_string())
    }
}

impl ProviderError {
    /// Build an HTTP error from a failed response, keeping a short body excerpt.
    pub async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message: String = body.chars().take(200).collect();
        if status == 401 || status == 403 {
            ProviderError::AuthenticationFailed(format!("HTTP {status}: {message}"))
        } else {
            ProviderError::Http { status, message }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = ProviderError::Http {
            status: 503,
            message: "unavailable".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP 503: unavailable");
        assert_eq!(ProviderError::NotConnected.to_string(), "Not connected");
    }

    #[test]
    fn test_from_serde_error() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(matches!(ProviderError::from(err), ProviderError::Protocol(_)));
    }
}
