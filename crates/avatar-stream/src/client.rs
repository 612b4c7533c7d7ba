//! The seam between the avatar channel and a concrete rendering client.

use crate::sink::SharedSink;
use async_trait::async_trait;
use facetalk_core::SessionError;
use secrecy::SecretString;
use std::{fmt, sync::Arc};
use tokio::sync::mpsc;

pub const DEFAULT_PRIMING_BYTES: usize = 1024;
pub const MIN_PRIMING_BYTES: usize = 1024;
pub const MAX_PRIMING_BYTES: usize = 6000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvatarClientEvent {
    Connected,
    Disconnected,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AvatarError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("No {0} sink mounted")]
    SinkUnavailable(&'static str),
    #[error("Avatar client not initialized")]
    NotInitialized,
    #[error("Avatar client is not connected")]
    NotConnected,
    #[error("{0}")]
    Transport(String),
}

impl From<AvatarError> for SessionError {
    fn from(e: AvatarError) -> Self {
        match e {
            AvatarError::Config(_) | AvatarError::SinkUnavailable(_) => {
                SessionError::Config(e.to_string())
            }
            other => SessionError::AvatarFailure(other.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct AvatarConfig {
    pub face_id: String,
    pub api_key: SecretString,
    /// Lets the service render idle motion while no audio arrives.
    pub handle_silence: bool,
    pub video_sink: Option<SharedSink>,
    pub audio_sink: Option<SharedSink>,
}

impl fmt::Debug for AvatarConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AvatarConfig")
            .field("face_id", &self.face_id)
            .field("handle_silence", &self.handle_silence)
            .field("video_sink", &self.video_sink.is_some())
            .field("audio_sink", &self.audio_sink.is_some())
            .finish_non_exhaustive()
    }
}

/// One connection to the avatar rendering service.
///
/// `start` completes when the session request is accepted; readiness is
/// signalled separately by [`AvatarClientEvent::Connected`].
#[async_trait]
pub trait AvatarClient: Send + Sync {
    async fn start(&self) -> Result<(), AvatarError>;
    fn send_audio_data(&self, data: &[u8]) -> Result<(), AvatarError>;
    fn clear_buffer(&self) -> Result<(), AvatarError>;
    fn close(&self);
}

pub trait AvatarClientFactory: Send + Sync {
    /// Creates a client that reports its lifecycle on `events`.
    fn create(
        &self,
        config: &AvatarConfig,
        events: mpsc::UnboundedSender<AvatarClientEvent>,
    ) -> Result<Arc<dyn AvatarClient>, AvatarError>;
}
