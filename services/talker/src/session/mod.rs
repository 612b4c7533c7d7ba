//! The session orchestrator.
//!
//! One actor task owns both channels, the microphone and the merged status.
//! Callers talk to it through a [`SessionHandle`]; every connect, timer and
//! retry completes back into the actor tagged with the attempt generation
//! that started it, so work from an abandoned attempt is discarded.

mod actor;
mod handle;

pub use handle::SessionHandle;

use crate::capture::MicrophoneSource;
use avatar_stream::{AvatarClientFactory, SharedSink};
use convai_realtime::ConversationConnector;
use facetalk_core::{RetryPolicy, SessionSnapshot, UsageLevel, VoiceGate};
use secrecy::SecretString;
use std::{sync::Arc, time::Duration};
use tokio::sync::{broadcast, mpsc, watch};

const COMMAND_QUEUE: usize = 32;
const NOTICE_QUEUE: usize = 64;

/// Conversation traffic worth showing to the user.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    UserTranscript(String),
    AgentResponse(String),
    Interrupted(Option<String>),
    ConversationEnded,
    /// Character usage crossed into a higher band.
    Usage(UsageLevel),
}

/// Tunables the actor needs for every attempt.
#[derive(Clone)]
pub struct SessionSettings {
    pub avatar_api_key: SecretString,
    pub handle_silence: bool,
    /// Longest wait for the avatar to report connected before the attempt fails.
    pub avatar_connect_timeout: Duration,
    /// Pause between the avatar connecting and dialing the conversation.
    pub settle_delay: Duration,
    pub retry: RetryPolicy,
    pub priming_bytes: usize,
    pub voice_gate: VoiceGate,
    pub video_sink: SharedSink,
    pub audio_sink: SharedSink,
}

/// The external services the session drives.
#[derive(Clone)]
pub struct SessionParts {
    pub avatar: Arc<dyn AvatarClientFactory>,
    pub conversation: Arc<dyn ConversationConnector>,
    pub microphone: Arc<dyn MicrophoneSource>,
}

/// Spawns the session actor. It runs until every handle is dropped.
pub fn spawn(settings: SessionSettings, parts: SessionParts) -> SessionHandle {
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE);
    let (status_tx, status_rx) = watch::channel(SessionSnapshot {
        max_attempts: settings.retry.max_attempts,
        ..SessionSnapshot::default()
    });
    let (notices_tx, _) = broadcast::channel(NOTICE_QUEUE);

    let actor = actor::SessionActor::new(
        settings,
        parts,
        commands_rx,
        status_tx,
        notices_tx.clone(),
    );
    tokio::spawn(actor.run());

    SessionHandle::new(commands_tx, status_rx, notices_tx)
}
