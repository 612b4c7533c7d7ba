//! Classification of WebSocket close codes reported by the voice-AI service.

use facetalk_core::SessionError;

pub const NORMAL_CLOSURE: u16 = 1000;
pub const GOING_AWAY: u16 = 1001;
/// Sent by the service when the account quota is exhausted.
pub const QUOTA_EXCEEDED: u16 = 1002;
/// Close code used locally when the stream ends without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;
/// Sent by the service when the credential is invalid or expired.
pub const POLICY_VIOLATION: u16 = 1008;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    Clean,
    QuotaExceeded,
    CredentialRejected,
    Abnormal { code: u16, reason: String },
}

pub fn classify_close(code: u16, reason: &str) -> CloseOutcome {
    match code {
        NORMAL_CLOSURE | GOING_AWAY => CloseOutcome::Clean,
        QUOTA_EXCEEDED => CloseOutcome::QuotaExceeded,
        POLICY_VIOLATION => CloseOutcome::CredentialRejected,
        _ => CloseOutcome::Abnormal {
            code,
            reason: reason.to_string(),
        },
    }
}

impl CloseOutcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, CloseOutcome::Clean)
    }

    /// The error to surface, or `None` for a clean close.
    pub fn to_error(&self, code: u16) -> Option<SessionError> {
        match self {
            CloseOutcome::Clean => None,
            CloseOutcome::QuotaExceeded => Some(SessionError::Quota(
                "Voice AI quota exceeded. Check your usage or upgrade your plan.".to_string(),
            )),
            CloseOutcome::CredentialRejected => Some(SessionError::Auth(
                "Voice AI API key invalid or expired. Please check your API key.".to_string(),
            )),
            CloseOutcome::Abnormal { reason, .. } => {
                let reason = if reason.is_empty() {
                    "Unknown reason"
                } else {
                    reason.as_str()
                };
                Some(SessionError::RemoteDisconnect {
                    code,
                    message: format!("Voice AI disconnected: {} (Code: {})", reason, code),
                    clean: false,
                })
            }
        }
    }
}
