use super::{SessionNotice, SessionParts, SessionSettings};
use crate::capture::{CaptureError, MicrophoneCapture, MicrophoneSource};
use avatar_stream::{AvatarChannel, AvatarClientEvent, AvatarConfig, AvatarError};
use convai_realtime::{
    ConversationChannel, ConversationError, ConversationEvent, ConversationEventSink,
    ConversationLink,
};
use facetalk_core::{
    AudioFrame, AvatarConnectionState, ConversationConnectionState, RetryDecision, SessionError,
    SessionSnapshot, SessionStatus, UsageTracker, audio::encode_pcm16_base64,
};
use std::sync::Arc;
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinSet,
};
use tracing::{Instrument, debug, error, info, info_span, instrument, warn};
use uuid::Uuid;

const FRAME_QUEUE: usize = 8;

pub(crate) enum Command {
    Start {
        agent_id: String,
        face_id: String,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Retry {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
}

/// Completions flowing back into the actor, tagged with the attempt that started them.
enum Internal {
    AvatarStarted {
        generation: u64,
        result: Result<(), AvatarError>,
    },
    Avatar {
        generation: u64,
        event: AvatarClientEvent,
    },
    AvatarConnectTimeout {
        generation: u64,
    },
    SettleElapsed {
        generation: u64,
    },
    ConversationDialed {
        generation: u64,
        result: Result<ConversationLink, ConversationError>,
    },
    Conversation {
        generation: u64,
        event: ConversationEvent,
    },
    MicrophoneAcquired {
        generation: u64,
        result: Result<Box<dyn MicrophoneCapture>, CaptureError>,
        frames: mpsc::Receiver<AudioFrame>,
    },
    RetryDue {
        generation: u64,
    },
}

impl Internal {
    fn generation(&self) -> u64 {
        match self {
            Internal::AvatarStarted { generation, .. }
            | Internal::Avatar { generation, .. }
            | Internal::AvatarConnectTimeout { generation }
            | Internal::SettleElapsed { generation }
            | Internal::ConversationDialed { generation, .. }
            | Internal::Conversation { generation, .. }
            | Internal::MicrophoneAcquired { generation, .. }
            | Internal::RetryDue { generation } => *generation,
        }
    }
}

pub(crate) struct SessionActor {
    settings: SessionSettings,
    avatar: AvatarChannel,
    conversation: ConversationChannel,
    microphone: Arc<dyn MicrophoneSource>,
    capture: Option<Box<dyn MicrophoneCapture>>,
    frames: Option<mpsc::Receiver<AudioFrame>>,

    commands: mpsc::Receiver<Command>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    pending: JoinSet<()>,
    status_tx: watch::Sender<SessionSnapshot>,
    notices: broadcast::Sender<SessionNotice>,

    generation: u64,
    session_id: Option<Uuid>,
    agent_id: Option<String>,
    face_id: Option<String>,
    status: SessionStatus,
    attempt: u32,
    last_error: Option<String>,
    auto_retry_stopped: bool,
    speaking: bool,
    usage: UsageTracker,
}

impl SessionActor {
    pub(crate) fn new(
        settings: SessionSettings,
        parts: SessionParts,
        commands: mpsc::Receiver<Command>,
        status_tx: watch::Sender<SessionSnapshot>,
        notices: broadcast::Sender<SessionNotice>,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        Self {
            avatar: AvatarChannel::new(parts.avatar).with_priming_bytes(settings.priming_bytes),
            conversation: ConversationChannel::new(parts.conversation),
            microphone: parts.microphone,
            capture: None,
            frames: None,
            settings,
            commands,
            internal_tx,
            internal_rx,
            pending: JoinSet::new(),
            status_tx,
            notices,
            generation: 0,
            session_id: None,
            agent_id: None,
            face_id: None,
            status: SessionStatus::Idle,
            attempt: 0,
            last_error: None,
            auto_retry_stopped: false,
            speaking: false,
            usage: UsageTracker::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(message) = self.internal_rx.recv() => self.handle_internal(message),
                Some(frame) = next_frame(&mut self.frames) => self.relay_frame(frame),
                Some(joined) = self.pending.join_next(), if !self.pending.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "Session task panicked");
                        }
                    }
                }
            }
            self.publish();
        }

        info!("All session handles dropped; shutting down");
        self.teardown();
        self.status = SessionStatus::Stopped;
        self.publish();
    }

    /// Replies only after the resulting snapshot is published.
    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start {
                agent_id,
                face_id,
                reply,
            } => {
                let result = self.start(agent_id, face_id);
                self.publish();
                let _ = reply.send(result);
            }
            Command::Stop { reply } => {
                self.stop();
                self.publish();
                let _ = reply.send(());
            }
            Command::Retry { reply } => {
                let result = self.manual_retry();
                self.publish();
                let _ = reply.send(result);
            }
        }
    }

    fn start(&mut self, agent_id: String, face_id: String) -> Result<(), SessionError> {
        if self.status.is_active() {
            return Err(SessionError::AlreadyActive(self.status));
        }
        let agent_id = agent_id.trim().to_string();
        let face_id = face_id.trim().to_string();
        let missing = if agent_id.is_empty() {
            Some("Agent ID is required")
        } else if face_id.is_empty() {
            Some("Face ID is required")
        } else {
            None
        };
        if let Some(message) = missing {
            let error = SessionError::Config(message.to_string());
            warn!(error = %error, "Refusing to start session");
            self.last_error = Some(error.to_string());
            return Err(error);
        }

        let session_id = Uuid::new_v4();
        info!(%session_id, agent_id = %agent_id, face_id = %face_id, "Starting session");
        self.session_id = Some(session_id);
        self.agent_id = Some(agent_id);
        self.face_id = Some(face_id);
        self.usage = UsageTracker::new();
        self.arm_first_attempt();
        Ok(())
    }

    fn manual_retry(&mut self) -> Result<(), SessionError> {
        if self.status.is_active() {
            return Err(SessionError::AlreadyActive(self.status));
        }
        if self.agent_id.is_none() || self.face_id.is_none() {
            return Err(SessionError::NothingToRetry);
        }
        info!("Manual retry requested");
        self.arm_first_attempt();
        Ok(())
    }

    fn arm_first_attempt(&mut self) {
        self.attempt = 1;
        self.auto_retry_stopped = false;
        self.last_error = None;
        self.begin_attempt();
    }

    fn stop(&mut self) {
        if self.status != SessionStatus::Stopped {
            info!(
                status = %self.status,
                characters = self.usage.characters(),
                elapsed_secs = self.usage.elapsed_secs(),
                "Stopping session"
            );
        }
        self.teardown();
        self.status = SessionStatus::Stopped;
        self.last_error = None;
        self.auto_retry_stopped = false;
    }

    /// Releases everything the current attempt holds and invalidates its pending work.
    fn teardown(&mut self) {
        self.generation += 1;
        self.pending.abort_all();
        self.release_microphone();
        self.conversation.close("User initiated disconnect");
        self.conversation.reset();
        self.avatar.stop();
        self.speaking = false;
    }

    fn release_microphone(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            capture.release();
        }
        self.frames = None;
    }

    #[instrument(skip_all, fields(session_id = ?self.session_id, attempt = self.attempt))]
    fn begin_attempt(&mut self) {
        self.teardown();
        self.status = SessionStatus::Connecting;
        let generation = self.generation;

        let (Some(face_id), Some(_)) = (self.face_id.clone(), self.agent_id.as_ref()) else {
            self.fail_attempt(SessionError::Config("Face ID is required".to_string()));
            return;
        };
        info!(generation, max_attempts = self.settings.retry.max_attempts, "Starting attempt");

        let config = AvatarConfig {
            face_id,
            api_key: self.settings.avatar_api_key.clone(),
            handle_silence: self.settings.handle_silence,
            video_sink: Some(self.settings.video_sink.clone()),
            audio_sink: Some(self.settings.audio_sink.clone()),
        };
        let internal = self.internal_tx.clone();
        let initialized = self.avatar.initialize(config, move |event| {
            let _ = internal.send(Internal::Avatar { generation, event });
        });
        if let Err(e) = initialized {
            self.fail_attempt(e.into());
            return;
        }

        match self.avatar.start() {
            Ok(starting) => {
                let internal = self.internal_tx.clone();
                self.pending.spawn(
                    async move {
                        let result = starting.await;
                        let _ = internal.send(Internal::AvatarStarted { generation, result });
                    }
                    .instrument(info_span!("avatar_start", generation)),
                );
                // Bounds the whole wait for `connected`, not just the handshake.
                let timeout = self.settings.avatar_connect_timeout;
                let internal = self.internal_tx.clone();
                self.pending.spawn(async move {
                    tokio::time::sleep(timeout).await;
                    let _ = internal.send(Internal::AvatarConnectTimeout { generation });
                });
            }
            Err(e) => self.fail_attempt(e.into()),
        }
    }

    /// Abandons the current attempt and either schedules the next one or gives up.
    fn fail_attempt(&mut self, error: SessionError) {
        let failed = self.attempt;
        warn!(attempt = failed, error = %error, "Session attempt failed");
        self.teardown();
        self.last_error = Some(error.to_string());

        match self.settings.retry.decide(failed, &error) {
            RetryDecision::Retry {
                next_attempt,
                delay,
            } => {
                info!(
                    next_attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling retry"
                );
                self.attempt = next_attempt;
                self.status = SessionStatus::Connecting;
                let generation = self.generation;
                let internal = self.internal_tx.clone();
                self.pending.spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = internal.send(Internal::RetryDue { generation });
                });
            }
            RetryDecision::Exhausted => {
                error!(attempts = failed, "Retry budget exhausted; automatic retry stopped");
                self.status = SessionStatus::Failed;
                self.auto_retry_stopped = true;
            }
            RetryDecision::NonRetryable => {
                error!(error = %error, "Session failed; not retrying");
                self.status = SessionStatus::Failed;
            }
        }
    }

    /// A channel was lost after the session became ready. No reconnect.
    fn degrade(&mut self, error: SessionError) {
        warn!(error = %error, "Session degraded");
        self.status = SessionStatus::Degraded;
        self.last_error = Some(error.to_string());
        self.speaking = false;
    }

    fn handle_internal(&mut self, message: Internal) {
        let generation = message.generation();
        if generation != self.generation {
            debug!(generation, current = self.generation, "Ignoring stale completion");
            if let Internal::MicrophoneAcquired {
                result: Ok(mut capture),
                ..
            } = message
            {
                capture.release();
            }
            return;
        }
        match message {
            Internal::AvatarStarted { result: Ok(()), .. } => {
                debug!("Avatar session accepted; waiting for it to connect");
            }
            Internal::AvatarStarted { result: Err(e), .. } => self.on_avatar_lost(e.into()),
            Internal::Avatar { event, .. } => self.on_avatar_event(event),
            Internal::AvatarConnectTimeout { .. } => self.on_avatar_connect_timeout(),
            Internal::SettleElapsed { .. } => self.dial_conversation(),
            Internal::ConversationDialed { result, .. } => self.on_conversation_dialed(result),
            Internal::Conversation { event, .. } => self.on_conversation_event(event),
            Internal::MicrophoneAcquired { result, frames, .. } => {
                self.on_microphone_acquired(result, frames)
            }
            Internal::RetryDue { .. } => self.begin_attempt(),
        }
    }

    fn on_avatar_event(&mut self, event: AvatarClientEvent) {
        let previous = self.avatar.state();
        let current = self.avatar.apply(&event);
        match event {
            AvatarClientEvent::Connected => {
                // Priming and dialing happen once per Connecting -> Connected transition.
                let transitioned = previous == AvatarConnectionState::Connecting
                    && current == AvatarConnectionState::Connected;
                if self.status != SessionStatus::Connecting || !transitioned {
                    debug!(from = %previous, status = %self.status, "Avatar connected event needs no action");
                    return;
                }
                if !self.avatar.prime() {
                    warn!("Avatar priming block was not sent");
                }
                let generation = self.generation;
                let delay = self.settings.settle_delay;
                let internal = self.internal_tx.clone();
                self.pending.spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = internal.send(Internal::SettleElapsed { generation });
                });
            }
            AvatarClientEvent::Disconnected => {
                self.on_avatar_lost(SessionError::AvatarFailure("avatar disconnected".to_string()))
            }
            AvatarClientEvent::Error(detail) => {
                self.on_avatar_lost(SessionError::AvatarFailure(detail))
            }
        }
    }

    fn on_avatar_connect_timeout(&mut self) {
        if self.status != SessionStatus::Connecting || self.avatar.is_connected() {
            return;
        }
        self.fail_attempt(SessionError::ConnectTimeout(
            self.settings.avatar_connect_timeout,
        ));
    }

    fn on_avatar_lost(&mut self, error: SessionError) {
        match self.status {
            SessionStatus::Connecting => self.fail_attempt(error),
            SessionStatus::Ready => self.degrade(error),
            _ => debug!(error = %error, status = %self.status, "Avatar loss outside an active session"),
        }
    }

    fn dial_conversation(&mut self) {
        if self.status != SessionStatus::Connecting
            || !self.avatar.is_connected()
            || self.conversation.state() != ConversationConnectionState::Disconnected
        {
            return;
        }
        let Some(agent_id) = self.agent_id.clone() else {
            return;
        };
        let generation = self.generation;
        let internal = self.internal_tx.clone();
        let events: ConversationEventSink = Arc::new(move |event| {
            let _ = internal.send(Internal::Conversation { generation, event });
        });
        let dial = self.conversation.begin_connect(&agent_id, events);

        let internal = self.internal_tx.clone();
        self.pending.spawn(
            async move {
                let result = dial.await;
                let _ = internal.send(Internal::ConversationDialed { generation, result });
            }
            .instrument(info_span!("conversation_connect", generation, agent_id = %agent_id)),
        );
    }

    fn on_conversation_dialed(&mut self, result: Result<ConversationLink, ConversationError>) {
        let link = match result {
            Ok(link) => link,
            Err(e) => {
                self.conversation.fail();
                self.fail_attempt(e.into());
                return;
            }
        };
        if !self.conversation.attach(link) {
            return;
        }

        let generation = self.generation;
        let microphone = self.microphone.clone();
        let internal = self.internal_tx.clone();
        self.pending.spawn(
            async move {
                let (frames_tx, frames) = mpsc::channel(FRAME_QUEUE);
                let result = microphone.acquire(frames_tx).await;
                let _ = internal.send(Internal::MicrophoneAcquired {
                    generation,
                    result,
                    frames,
                });
            }
            .instrument(info_span!("microphone_acquire", generation)),
        );
    }

    fn on_microphone_acquired(
        &mut self,
        result: Result<Box<dyn MicrophoneCapture>, CaptureError>,
        frames: mpsc::Receiver<AudioFrame>,
    ) {
        let mut capture = match result {
            Ok(capture) => capture,
            Err(e) => {
                self.fail_attempt(e.into());
                return;
            }
        };
        if self.status != SessionStatus::Connecting
            || !self.conversation.is_open()
            || self.capture.is_some()
        {
            capture.release();
            return;
        }
        self.capture = Some(capture);
        self.frames = Some(frames);

        if self.current_snapshot().ready() {
            self.status = SessionStatus::Ready;
            self.last_error = None;
            info!(attempt = self.attempt, "Session ready");
        }
    }

    fn on_conversation_event(&mut self, event: ConversationEvent) {
        match event {
            ConversationEvent::UserTranscript(text) => {
                info!(transcript = %text, "User transcript");
                self.notify(SessionNotice::UserTranscript(text));
            }
            ConversationEvent::AgentResponse(text) => {
                self.speaking = true;
                let before = self.usage.level();
                self.usage.record_response(&text);
                let after = self.usage.level();
                if after > before {
                    warn!(characters = self.usage.characters(), "{}", after.message());
                    self.notify(SessionNotice::Usage(after));
                }
                self.notify(SessionNotice::AgentResponse(text));
            }
            ConversationEvent::Audio(pcm) => {
                if !self.avatar.is_connected() {
                    debug!(bytes = pcm.len(), "Avatar not connected; dropping agent audio");
                    return;
                }
                self.avatar.send_audio_data(&pcm);
            }
            ConversationEvent::Interruption(reason) => {
                self.speaking = false;
                self.notify(SessionNotice::Interrupted(reason));
            }
            ConversationEvent::ConversationEnd => {
                info!("Agent ended the conversation");
                self.notify(SessionNotice::ConversationEnded);
            }
            ConversationEvent::Closed { code, reason } => self.on_conversation_closed(code, &reason),
        }
    }

    fn on_conversation_closed(&mut self, code: u16, reason: &str) {
        let outcome = self.conversation.on_remote_close(code, reason);
        self.release_microphone();
        self.speaking = false;

        match (self.status, outcome.to_error(code)) {
            (SessionStatus::Ready | SessionStatus::Degraded, None) => {
                info!("Conversation ended cleanly; stopping session");
                self.teardown();
                self.status = SessionStatus::Stopped;
                self.last_error = None;
            }
            (SessionStatus::Ready, Some(error)) => self.degrade(error),
            (SessionStatus::Connecting, None) => self.fail_attempt(SessionError::Transport(
                "Voice AI closed the conversation before the session was ready".to_string(),
            )),
            (SessionStatus::Connecting, Some(error)) => self.fail_attempt(error),
            (status, _) => debug!(%status, code, "Conversation close outside an active session"),
        }
    }

    fn relay_frame(&mut self, frame: AudioFrame) {
        if !self.conversation.is_open() {
            return;
        }
        if !self.settings.voice_gate.admits(frame.analysis()) {
            return;
        }
        let encoded = encode_pcm16_base64(frame.samples());
        self.conversation.send_audio_chunk(&encoded);
    }

    fn notify(&self, notice: SessionNotice) {
        // No subscribers is fine.
        let _ = self.notices.send(notice);
    }

    fn current_snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id,
            status: self.status,
            avatar: self.avatar.state(),
            conversation: self.conversation.state(),
            attempt_count: self.attempt,
            max_attempts: self.settings.retry.max_attempts,
            speaking: self.speaking,
            last_error: self.last_error.clone(),
            auto_retry_stopped: self.auto_retry_stopped,
            usage_characters: self.usage.characters(),
        }
    }

    fn publish(&self) {
        let snapshot = self.current_snapshot();
        self.status_tx.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
    }
}

/// Pends forever while no capture is running.
async fn next_frame(frames: &mut Option<mpsc::Receiver<AudioFrame>>) -> Option<AudioFrame> {
    match frames {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
