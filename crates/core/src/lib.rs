//! Shared domain types for a talking-avatar session: audio frames and their
//! encoding, the merged connection status, the error taxonomy and the retry
//! policy the orchestrator applies to it.

pub mod audio;
pub mod error;
pub mod retry;
pub mod status;
pub mod usage;

pub use audio::{AudioFrame, VoiceGate};
pub use error::SessionError;
pub use retry::{RetryDecision, RetryPolicy};
pub use status::{
    AvatarConnectionState, ConversationConnectionState, SessionSnapshot, SessionStatus,
};
pub use usage::{UsageLevel, UsageTracker};
