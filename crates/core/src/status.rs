//! Connection states of the two channels and the merged, host-facing session snapshot.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle of one orchestrated session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Idle,
    Connecting,
    Ready,
    Degraded,
    Stopped,
    Failed,
}

impl SessionStatus {
    /// A session in one of these states rejects a new start.
    pub fn is_active(self) -> bool {
        matches!(self, SessionStatus::Connecting | SessionStatus::Ready)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Ready => "ready",
            SessionStatus::Degraded => "degraded",
            SessionStatus::Stopped => "stopped",
            SessionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvatarConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for AvatarConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AvatarConnectionState::Disconnected => "disconnected",
            AvatarConnectionState::Connecting => "connecting",
            AvatarConnectionState::Connected => "connected",
            AvatarConnectionState::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Open,
    Closing,
    Closed,
    Error,
}

impl fmt::Display for ConversationConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConversationConnectionState::Disconnected => "disconnected",
            ConversationConnectionState::Connecting => "connecting",
            ConversationConnectionState::Open => "open",
            ConversationConnectionState::Closing => "closing",
            ConversationConnectionState::Closed => "closed",
            ConversationConnectionState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Everything the host needs to render the session, published on every change.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SessionSnapshot {
    pub session_id: Option<Uuid>,
    pub status: SessionStatus,
    pub avatar: AvatarConnectionState,
    pub conversation: ConversationConnectionState,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub speaking: bool,
    /// The single current error message, if any.
    pub last_error: Option<String>,
    /// Automatic retries are exhausted; only a manual retry re-arms the counter.
    pub auto_retry_stopped: bool,
    pub usage_characters: u64,
}

impl SessionSnapshot {
    /// Avatar connected and conversation open.
    pub fn ready(&self) -> bool {
        self.avatar == AvatarConnectionState::Connected
            && self.conversation == ConversationConnectionState::Open
    }

    /// Whether the host should offer a retry action.
    pub fn retry_available(&self) -> bool {
        matches!(self.status, SessionStatus::Failed | SessionStatus::Degraded)
    }

    /// One line suitable for a status bar or a log.
    pub fn status_line(&self) -> String {
        let mut line = format!(
            "status={} avatar={} conversation={} attempt={}/{} speaking={}",
            self.status,
            self.avatar,
            self.conversation,
            self.attempt_count,
            self.max_attempts,
            self.speaking
        );
        if let Some(error) = &self.last_error {
            line.push_str(&format!(" error=\"{}\"", error));
        }
        if self.auto_retry_stopped {
            line.push_str(" (automatic retry stopped; restart manually)");
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_requires_both_channels() {
        let mut snapshot = SessionSnapshot {
            avatar: AvatarConnectionState::Connected,
            ..Default::default()
        };
        assert!(!snapshot.ready());

        snapshot.conversation = ConversationConnectionState::Open;
        assert!(snapshot.ready());

        snapshot.avatar = AvatarConnectionState::Disconnected;
        assert!(!snapshot.ready());
    }

    #[test]
    fn test_active_statuses() {
        assert!(SessionStatus::Connecting.is_active());
        assert!(SessionStatus::Ready.is_active());
        assert!(!SessionStatus::Degraded.is_active());
        assert!(!SessionStatus::Failed.is_active());
        assert!(!SessionStatus::Stopped.is_active());
        assert!(!SessionStatus::Idle.is_active());
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&SessionStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        let parsed: ConversationConnectionState = serde_json::from_str("\"closing\"").unwrap();
        assert_eq!(parsed, ConversationConnectionState::Closing);
    }

    #[test]
    fn test_status_line_mentions_exhausted_retries() {
        let snapshot = SessionSnapshot {
            status: SessionStatus::Failed,
            attempt_count: 3,
            max_attempts: 3,
            last_error: Some("Avatar connection failed: boom".into()),
            auto_retry_stopped: true,
            ..Default::default()
        };
        let line = snapshot.status_line();
        assert!(line.starts_with("status=failed"));
        assert!(line.contains("attempt=3/3"));
        assert!(line.contains("boom"));
        assert!(line.contains("restart manually"));
        assert!(snapshot.retry_available());
    }
}
