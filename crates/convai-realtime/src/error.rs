use facetalk_core::SessionError;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversationError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("{0}")]
    Auth(String),
    /// The credential is valid but may not use this agent.
    #[error("{0}")]
    AccessDenied(String),
    #[error("{0}")]
    NotFound(String),
    #[error("Connection timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    /// The issuing service could not be reached or answered with a server error.
    #[error("Signed URL service unavailable: {0}")]
    Unavailable(String),
    #[error("Voice AI API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Failed to connect to voice AI: {0}")]
    Transport(String),
    #[error("Malformed message: {0}")]
    Protocol(String),
}

impl ConversationError {
    /// Whether a fallback issuer may be tried after this error.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ConversationError::Unavailable(_))
    }
}

impl From<reqwest::Error> for ConversationError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ConversationError::Protocol(e.to_string())
        } else {
            ConversationError::Unavailable(e.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ConversationError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ConversationError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for ConversationError {
    fn from(e: serde_json::Error) -> Self {
        ConversationError::Protocol(e.to_string())
    }
}

impl From<ConversationError> for SessionError {
    fn from(e: ConversationError) -> Self {
        match e {
            ConversationError::Config(m) => SessionError::Config(m),
            ConversationError::Auth(m) | ConversationError::AccessDenied(m) => SessionError::Auth(m),
            ConversationError::NotFound(m) => SessionError::NotFound(m),
            ConversationError::Timeout(d) => SessionError::ConnectTimeout(d),
            other => SessionError::Transport(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_mapping() {
        let auth: SessionError = ConversationError::Auth("Invalid key".into()).into();
        assert_eq!(auth, SessionError::Auth("Invalid key".into()));
        assert!(!auth.is_retryable());

        let timeout: SessionError = ConversationError::Timeout(Duration::from_secs(10)).into();
        assert!(timeout.is_retryable());

        let transport: SessionError = ConversationError::Unavailable("refused".into()).into();
        assert!(matches!(transport, SessionError::Transport(_)));
        assert!(transport.is_retryable());
    }
}
