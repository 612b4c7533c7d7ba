//! Error taxonomy shared by the channels and the orchestrator.
//!
//! Channels report errors; only the orchestrator decides whether a failure is
//! retried, using [`SessionError::is_retryable`].

use crate::status::SessionStatus;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Missing credential or identifier.
    #[error("Configuration error: {0}")]
    Config(String),
    /// Microphone unavailable or access denied.
    #[error("Microphone unavailable: {0}")]
    Device(String),
    #[error("Connection timed out after {}ms", .0.as_millis())]
    ConnectTimeout(Duration),
    /// The remote service rejected the credential.
    #[error("{0}")]
    Auth(String),
    /// The remote service does not know the identifier.
    #[error("{0}")]
    NotFound(String),
    /// The remote service reports an exhausted quota.
    #[error("{0}")]
    Quota(String),
    /// A single dropped frame or message. Logged, never surfaced.
    #[error("Dropped outbound message: {0}")]
    TransientSend(String),
    #[error("{message}")]
    RemoteDisconnect {
        code: u16,
        message: String,
        clean: bool,
    },
    #[error("Avatar connection failed: {0}")]
    AvatarFailure(String),
    #[error("Connection failed: {0}")]
    Transport(String),
    #[error("A session is already {0}")]
    AlreadyActive(SessionStatus),
    #[error("Nothing to retry: no session has been started")]
    NothingToRetry,
    #[error("The session orchestrator has shut down")]
    Closed,
}

impl SessionError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SessionError::ConnectTimeout(_)
            | SessionError::AvatarFailure(_)
            | SessionError::Transport(_) => true,
            SessionError::RemoteDisconnect { clean, .. } => !clean,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classes() {
        assert!(SessionError::ConnectTimeout(Duration::from_secs(10)).is_retryable());
        assert!(SessionError::AvatarFailure("x".into()).is_retryable());
        assert!(SessionError::Transport("x".into()).is_retryable());
        assert!(
            SessionError::RemoteDisconnect {
                code: 1006,
                message: "x".into(),
                clean: false
            }
            .is_retryable()
        );

        assert!(!SessionError::Config("x".into()).is_retryable());
        assert!(!SessionError::Device("x".into()).is_retryable());
        assert!(!SessionError::Auth("x".into()).is_retryable());
        assert!(!SessionError::NotFound("x".into()).is_retryable());
        assert!(!SessionError::Quota("x".into()).is_retryable());
        assert!(
            !SessionError::RemoteDisconnect {
                code: 1000,
                message: "bye".into(),
                clean: true
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(
            SessionError::ConnectTimeout(Duration::from_secs(10)).to_string(),
            "Connection timed out after 10000ms"
        );
        assert_eq!(
            SessionError::AlreadyActive(SessionStatus::Ready).to_string(),
            "A session is already ready"
        );
    }
}
