//! Lifecycle of the voice-AI conversation connection.
//!
//! The channel is a synchronous state machine owned by the session actor.
//! Dialing happens in a future the actor spawns; the resulting
//! [`ConversationLink`] is attached once it arrives. Inbound traffic reaches
//! the actor through the [`ConversationEventSink`] handed to the connector.

use crate::{
    close::{CloseOutcome, NORMAL_CLOSURE, classify_close},
    error::ConversationError,
    protocol::audio_chunk_json,
};
use async_trait::async_trait;
use bytes::Bytes;
use facetalk_core::ConversationConnectionState;
use futures_util::{FutureExt, future::BoxFuture};
use std::sync::Arc;
use tokio::{sync::mpsc, task::AbortHandle};
use tracing::{debug, info, warn};

/// Inbound events, already decoded. Pings are answered below this layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationEvent {
    UserTranscript(String),
    AgentResponse(String),
    /// Decoded PCM16 from the agent's voice.
    Audio(Bytes),
    Interruption(Option<String>),
    ConversationEnd,
    /// The socket is gone. `code` is 1006 when no close frame was received.
    Closed { code: u16, reason: String },
}

pub type ConversationEventSink = Arc<dyn Fn(ConversationEvent) + Send + Sync>;

/// Frames queued for the socket writer.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// A JSON control message.
    Control(String),
    /// A JSON `user_audio_chunk` message.
    Audio(String),
    Close { code: u16, reason: String },
}

/// An open conversation: the writer queue and the tasks serving the socket.
///
/// Dropping the link aborts the reader, which owns any pending pong timers.
/// The writer drains what is queued and then closes the socket.
#[derive(Debug)]
pub struct ConversationLink {
    outbound: mpsc::UnboundedSender<Outbound>,
    tasks: Vec<AbortHandle>,
}

impl ConversationLink {
    pub fn new(outbound: mpsc::UnboundedSender<Outbound>, tasks: Vec<AbortHandle>) -> Self {
        Self { outbound, tasks }
    }

    pub fn send(&self, message: Outbound) -> Result<(), ConversationError> {
        self.outbound
            .send(message)
            .map_err(|_| ConversationError::Transport("socket writer has stopped".to_string()))
    }
}

impl Drop for ConversationLink {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Opens a conversation for an agent: signed URL, socket, initiation message.
#[async_trait]
pub trait ConversationConnector: Send + Sync {
    async fn connect(
        &self,
        agent_id: &str,
        events: ConversationEventSink,
    ) -> Result<ConversationLink, ConversationError>;
}

pub struct ConversationChannel {
    connector: Arc<dyn ConversationConnector>,
    state: ConversationConnectionState,
    link: Option<ConversationLink>,
}

impl ConversationChannel {
    pub fn new(connector: Arc<dyn ConversationConnector>) -> Self {
        Self {
            connector,
            state: ConversationConnectionState::Disconnected,
            link: None,
        }
    }

    pub fn state(&self) -> ConversationConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConversationConnectionState::Open && self.link.is_some()
    }

    /// Moves to Connecting and returns the dial future. Any previous link is dropped first.
    pub fn begin_connect(
        &mut self,
        agent_id: &str,
        events: ConversationEventSink,
    ) -> BoxFuture<'static, Result<ConversationLink, ConversationError>> {
        self.link = None;
        self.state = ConversationConnectionState::Connecting;
        let connector = self.connector.clone();
        let agent_id = agent_id.to_string();
        async move { connector.connect(&agent_id, events).await }.boxed()
    }

    /// Accepts the link produced by [`Self::begin_connect`]. Returns false,
    /// dropping the link, unless the channel was waiting for one.
    pub fn attach(&mut self, link: ConversationLink) -> bool {
        if self.state != ConversationConnectionState::Connecting {
            warn!(state = %self.state, "Discarding conversation link for a channel that is not connecting");
            return false;
        }
        self.link = Some(link);
        self.state = ConversationConnectionState::Open;
        info!("Conversation channel open");
        true
    }

    /// Sends one base64 PCM16 chunk. A no-op unless the channel is open.
    pub fn send_audio_chunk(&self, base64_audio: &str) -> bool {
        let Some(link) = self.link.as_ref().filter(|_| self.is_open()) else {
            return false;
        };
        let message = match audio_chunk_json(base64_audio) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Failed to serialize audio chunk");
                return false;
            }
        };
        match link.send(Outbound::Audio(message)) {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "Dropped audio chunk");
                false
            }
        }
    }

    /// Closes with code 1000. Safe to call in any state.
    pub fn close(&mut self, reason: &str) {
        let Some(link) = self.link.take() else {
            if self.state == ConversationConnectionState::Connecting {
                self.state = ConversationConnectionState::Closed;
            }
            return;
        };
        self.state = ConversationConnectionState::Closing;
        if let Err(e) = link.send(Outbound::Close {
            code: NORMAL_CLOSURE,
            reason: reason.to_string(),
        }) {
            debug!(error = %e, "Close frame not queued");
        }
        drop(link);
        self.state = ConversationConnectionState::Closed;
        info!(reason, "Conversation channel closed");
    }

    /// Records a close initiated by the service and classifies it.
    pub fn on_remote_close(&mut self, code: u16, reason: &str) -> CloseOutcome {
        self.link = None;
        let outcome = classify_close(code, reason);
        self.state = if outcome.is_clean() {
            ConversationConnectionState::Closed
        } else {
            ConversationConnectionState::Error
        };
        info!(code, reason, ?outcome, "Conversation closed by remote");
        outcome
    }

    /// Records a failed dial or a broken socket.
    pub fn fail(&mut self) {
        self.link = None;
        self.state = ConversationConnectionState::Error;
    }

    /// Drops any link and returns to Disconnected for a fresh attempt.
    pub fn reset(&mut self) {
        self.link = None;
        self.state = ConversationConnectionState::Disconnected;
    }
}
