//! Lifecycle of the avatar rendering connection.
//!
//! The channel owns at most one client at a time. Its events are forwarded
//! to a closure supplied at initialization; disposing the client aborts that
//! forwarder, so no stale listener outlives its client.

use crate::client::{
    AvatarClient, AvatarClientEvent, AvatarClientFactory, AvatarConfig, AvatarError,
    DEFAULT_PRIMING_BYTES, MAX_PRIMING_BYTES, MIN_PRIMING_BYTES,
};
use facetalk_core::AvatarConnectionState;
use futures_util::{FutureExt, future::BoxFuture};
use secrecy::ExposeSecret;
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

pub struct AvatarChannel {
    factory: Arc<dyn AvatarClientFactory>,
    client: Option<Arc<dyn AvatarClient>>,
    forwarder: Option<JoinHandle<()>>,
    state: AvatarConnectionState,
    priming_bytes: usize,
}

impl AvatarChannel {
    pub fn new(factory: Arc<dyn AvatarClientFactory>) -> Self {
        Self {
            factory,
            client: None,
            forwarder: None,
            state: AvatarConnectionState::Disconnected,
            priming_bytes: DEFAULT_PRIMING_BYTES,
        }
    }

    /// Size of the zero block sent on connect, clamped to what the service accepts.
    pub fn with_priming_bytes(mut self, bytes: usize) -> Self {
        self.priming_bytes = bytes.clamp(MIN_PRIMING_BYTES, MAX_PRIMING_BYTES);
        self
    }

    pub fn state(&self) -> AvatarConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == AvatarConnectionState::Connected
    }

    /// Validates `config` and creates a fresh client, disposing any previous one.
    pub fn initialize<F>(&mut self, config: AvatarConfig, forward: F) -> Result<(), AvatarError>
    where
        F: Fn(AvatarClientEvent) + Send + Sync + 'static,
    {
        if config.api_key.expose_secret().trim().is_empty() {
            return Err(AvatarError::Config("Avatar API key is missing".to_string()));
        }
        if config.face_id.trim().is_empty() {
            return Err(AvatarError::Config("Face ID is required".to_string()));
        }
        if config.video_sink.is_none() {
            return Err(AvatarError::SinkUnavailable("video"));
        }
        if config.audio_sink.is_none() {
            return Err(AvatarError::SinkUnavailable("audio"));
        }

        self.dispose();

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let client = self.factory.create(&config, events_tx)?;
        self.forwarder = Some(tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                forward(event);
            }
        }));
        self.client = Some(client);
        self.state = AvatarConnectionState::Disconnected;
        info!(face_id = %config.face_id, "Avatar client initialized");
        Ok(())
    }

    /// Moves to Connecting and returns the start future for the caller to drive.
    pub fn start(&mut self) -> Result<BoxFuture<'static, Result<(), AvatarError>>, AvatarError> {
        let client = self.client.clone().ok_or(AvatarError::NotInitialized)?;
        self.state = AvatarConnectionState::Connecting;
        Ok(async move { client.start().await }.boxed())
    }

    /// Applies a client event to the state machine. Error is terminal.
    pub fn apply(&mut self, event: &AvatarClientEvent) -> AvatarConnectionState {
        use AvatarConnectionState::*;
        let next = match (self.state, event) {
            (Error, _) => Error,
            (_, AvatarClientEvent::Error(_)) => Error,
            (Connecting | Connected, AvatarClientEvent::Connected) => Connected,
            (Disconnected, AvatarClientEvent::Connected) => {
                debug!("Ignoring connected event for an avatar that is not connecting");
                Disconnected
            }
            (_, AvatarClientEvent::Disconnected) => Disconnected,
        };
        if next != self.state {
            info!(from = %self.state, to = %next, "Avatar state changed");
        }
        self.state = next;
        next
    }

    /// Sends the zero-valued block the service needs before it starts streaming.
    pub fn prime(&self) -> bool {
        if !self.is_connected() {
            return false;
        }
        let silence = vec![0u8; self.priming_bytes];
        self.send_audio_data(&silence)
    }

    /// Forwards PCM16 audio. Only while connected; failures are logged.
    pub fn send_audio_data(&self, data: &[u8]) -> bool {
        let Some(client) = self.client.as_ref().filter(|_| self.is_connected()) else {
            return false;
        };
        match client.send_audio_data(data) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Failed to send audio to avatar");
                false
            }
        }
    }

    /// Clears the remote buffer, closes and releases the client. Idempotent.
    pub fn stop(&mut self) {
        if self.client.is_some() {
            info!("Stopping avatar client");
        }
        self.dispose();
        self.state = AvatarConnectionState::Disconnected;
    }

    fn dispose(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        if let Some(client) = self.client.take() {
            if let Err(e) = client.clear_buffer() {
                debug!(error = %e, "Avatar buffer not cleared");
            }
            client.close();
        }
    }
}

impl Drop for AvatarChannel {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{NullSink, shared};
    use async_trait::async_trait;
    use secrecy::SecretString;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<Vec<u8>>>,
        cleared: Mutex<u32>,
        closed: Mutex<u32>,
        events: Mutex<Vec<mpsc::UnboundedSender<AvatarClientEvent>>>,
    }

    struct RecordingClient(Arc<Recorder>);

    #[async_trait]
    impl AvatarClient for RecordingClient {
        async fn start(&self) -> Result<(), AvatarError> {
            Ok(())
        }

        fn send_audio_data(&self, data: &[u8]) -> Result<(), AvatarError> {
            self.0.sent.lock().unwrap().push(data.to_vec());
            Ok(())
        }

        fn clear_buffer(&self) -> Result<(), AvatarError> {
            *self.0.cleared.lock().unwrap() += 1;
            Ok(())
        }

        fn close(&self) {
            *self.0.closed.lock().unwrap() += 1;
        }
    }

    impl AvatarClientFactory for Arc<Recorder> {
        fn create(
            &self,
            _config: &AvatarConfig,
            events: mpsc::UnboundedSender<AvatarClientEvent>,
        ) -> Result<Arc<dyn AvatarClient>, AvatarError> {
            self.events.lock().unwrap().push(events);
            Ok(Arc::new(RecordingClient(self.clone())))
        }
    }

    fn config() -> AvatarConfig {
        AvatarConfig {
            face_id: "face-1".into(),
            api_key: SecretString::from("key"),
            handle_silence: true,
            video_sink: Some(shared(NullSink::default())),
            audio_sink: Some(shared(NullSink::default())),
        }
    }

    fn channel() -> (AvatarChannel, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        (AvatarChannel::new(Arc::new(recorder.clone())), recorder)
    }

    #[tokio::test]
    async fn test_initialize_rejects_missing_credential_and_sinks() {
        let (mut channel, recorder) = channel();

        let mut blank = config();
        blank.api_key = SecretString::from("  ");
        assert!(matches!(
            channel.initialize(blank, |_| {}),
            Err(AvatarError::Config(_))
        ));

        let mut no_video = config();
        no_video.video_sink = None;
        assert_eq!(
            channel.initialize(no_video, |_| {}),
            Err(AvatarError::SinkUnavailable("video"))
        );
        assert!(recorder.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connected_event_primes_once_and_gates_audio() {
        let (channel, recorder) = channel();
        let mut channel = channel.with_priming_bytes(2048);
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        channel
            .initialize(config(), move |e| {
                let _ = seen_tx.send(e);
            })
            .unwrap();

        assert!(!channel.send_audio_data(&[1, 2]));
        channel.start().unwrap().await.unwrap();
        assert_eq!(channel.state(), AvatarConnectionState::Connecting);

        recorder.events.lock().unwrap()[0]
            .send(AvatarClientEvent::Connected)
            .unwrap();
        let event = seen_rx.recv().await.unwrap();
        assert_eq!(channel.apply(&event), AvatarConnectionState::Connected);

        assert!(channel.prime());
        assert!(channel.send_audio_data(&[1, 2]));
        let sent = recorder.sent.lock().unwrap();
        assert_eq!(sent[0], vec![0u8; 2048]);
        assert_eq!(sent[1], vec![1, 2]);
    }

    #[test]
    fn test_priming_size_is_clamped() {
        let (channel, _) = channel();
        assert_eq!(channel.with_priming_bytes(10).priming_bytes, 1024);
        let (channel, _) = self::channel();
        assert_eq!(channel.with_priming_bytes(100_000).priming_bytes, 6000);
    }

    #[tokio::test]
    async fn test_error_is_terminal() {
        let (mut channel, _) = channel();
        channel.initialize(config(), |_| {}).unwrap();
        let _ = channel.start().unwrap();
        assert_eq!(
            channel.apply(&AvatarClientEvent::Error("boom".into())),
            AvatarConnectionState::Error
        );
        assert_eq!(
            channel.apply(&AvatarClientEvent::Connected),
            AvatarConnectionState::Error
        );
        assert!(!channel.prime());
    }

    #[tokio::test]
    async fn test_reinitialize_disposes_previous_client() {
        let (mut channel, recorder) = channel();
        channel.initialize(config(), |_| {}).unwrap();
        channel.initialize(config(), |_| {}).unwrap();
        assert_eq!(*recorder.closed.lock().unwrap(), 1);
        assert_eq!(*recorder.cleared.lock().unwrap(), 1);

        // The first client's forwarder is gone, so its sender reports a closed channel.
        let first = recorder.events.lock().unwrap()[0].clone();
        for _ in 0..10 {
            if first.is_closed() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(first.is_closed());
    }

    #[tokio::test]
    async fn test_stop_twice_is_harmless() {
        let (mut channel, recorder) = channel();
        channel.initialize(config(), |_| {}).unwrap();
        channel.stop();
        channel.stop();
        assert_eq!(*recorder.closed.lock().unwrap(), 1);
        assert_eq!(channel.state(), AvatarConnectionState::Disconnected);
        assert!(matches!(channel.start(), Err(AvatarError::NotInitialized)));
    }
}
