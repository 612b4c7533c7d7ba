use super::{SessionNotice, actor::Command};
use facetalk_core::{SessionError, SessionSnapshot};
use tokio::sync::{broadcast, mpsc, oneshot, watch};

/// Cloneable front door to the session actor.
///
/// Commands are answered once the actor has applied them. Progress after
/// that is observed through [`SessionHandle::subscribe_status`]. Dropping the
/// last handle tears the session down.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<SessionSnapshot>,
    notices: broadcast::Sender<SessionNotice>,
}

impl SessionHandle {
    pub(super) fn new(
        commands: mpsc::Sender<Command>,
        status: watch::Receiver<SessionSnapshot>,
        notices: broadcast::Sender<SessionNotice>,
    ) -> Self {
        Self {
            commands,
            status,
            notices,
        }
    }

    /// Starts a session for `agent_id` rendered with `face_id`.
    ///
    /// Fails with [`SessionError::AlreadyActive`] while a session is
    /// connecting or ready, and with [`SessionError::Config`] when either
    /// identifier is blank.
    pub async fn start_session(&self, agent_id: &str, face_id: &str) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Start {
            agent_id: agent_id.to_string(),
            face_id: face_id.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Tears everything down. Harmless in any state.
    pub async fn stop_session(&self) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stop { reply }).await?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Starts over with the last identifiers and a fresh attempt budget.
    pub async fn retry(&self) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Retry { reply }).await?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.status.borrow().clone()
    }

    pub fn ready(&self) -> bool {
        self.status.borrow().ready()
    }

    pub fn speaking(&self) -> bool {
        self.status.borrow().speaking
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionSnapshot> {
        self.status.clone()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    async fn send(&self, command: Command) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::Closed)
    }
}
