//! WebSocket transport to the avatar rendering service.
//!
//! After the socket opens, the client sends a JSON session request. The
//! service answers `"START"` once it is ready to render and `"STOP"` when it
//! ends the session. Audio goes out as binary PCM16; `"SKIP"` discards
//! whatever audio the service still has buffered. Rendered media comes back
//! as binary frames whose first byte names the kind.

use crate::{
    client::{AvatarClient, AvatarClientEvent, AvatarClientFactory, AvatarConfig, AvatarError},
    sink::{SharedSink, write_chunk},
};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::{
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::{sync::mpsc, task::AbortHandle};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};

/// Local rendering gateway speaking the framing described above.
pub const DEFAULT_AVATAR_WS_URL: &str = "ws://127.0.0.1:8765/avatar";
pub const VIDEO_FRAME: u8 = 0x01;
pub const AUDIO_FRAME: u8 = 0x02;

const START_SIGNAL: &str = "START";
const STOP_SIGNAL: &str = "STOP";
const SKIP_SIGNAL: &str = "SKIP";

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SessionRequest<'a> {
    api_key: &'a str,
    face_id: &'a str,
    handle_silence: bool,
}

pub struct WsAvatarClientFactory {
    url: String,
    connect_timeout: Duration,
}

impl WsAvatarClientFactory {
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
        }
    }
}

impl AvatarClientFactory for WsAvatarClientFactory {
    fn create(
        &self,
        config: &AvatarConfig,
        events: mpsc::UnboundedSender<AvatarClientEvent>,
    ) -> Result<Arc<dyn AvatarClient>, AvatarError> {
        let video_sink = config
            .video_sink
            .clone()
            .ok_or(AvatarError::SinkUnavailable("video"))?;
        let audio_sink = config
            .audio_sink
            .clone()
            .ok_or(AvatarError::SinkUnavailable("audio"))?;
        Ok(Arc::new(WsAvatarClient {
            url: self.url.clone(),
            connect_timeout: self.connect_timeout,
            face_id: config.face_id.clone(),
            api_key: config.api_key.clone(),
            handle_silence: config.handle_silence,
            video_sink,
            audio_sink,
            events,
            connection: OnceLock::new(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct Connection {
    outbound: mpsc::UnboundedSender<Message>,
    reader: AbortHandle,
}

pub struct WsAvatarClient {
    url: String,
    connect_timeout: Duration,
    face_id: String,
    api_key: SecretString,
    handle_silence: bool,
    video_sink: SharedSink,
    audio_sink: SharedSink,
    events: mpsc::UnboundedSender<AvatarClientEvent>,
    connection: OnceLock<Connection>,
    closed: AtomicBool,
}

impl WsAvatarClient {
    fn shutdown(&self) {
        if let Some(connection) = self.connection.get() {
            let _ = connection.outbound.send(Message::Close(None));
            connection.reader.abort();
        }
    }

    fn outbound(&self) -> Result<&mpsc::UnboundedSender<Message>, AvatarError> {
        self.connection
            .get()
            .map(|c| &c.outbound)
            .ok_or(AvatarError::NotConnected)
    }
}

#[async_trait]
impl AvatarClient for WsAvatarClient {
    async fn start(&self) -> Result<(), AvatarError> {
        if self.connection.get().is_some() {
            return Err(AvatarError::Transport("avatar client already started".to_string()));
        }
        let (ws_stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| {
                AvatarError::Transport(format!(
                    "connection timed out after {}ms",
                    self.connect_timeout.as_millis()
                ))
            })?
            .map_err(|e| AvatarError::Transport(e.to_string()))?;
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        let request = serde_json::to_string(&SessionRequest {
            api_key: self.api_key.expose_secret(),
            face_id: &self.face_id,
            handle_silence: self.handle_silence,
        })
        .map_err(|e| AvatarError::Transport(e.to_string()))?;
        ws_tx
            .send(Message::Text(request.into()))
            .await
            .map_err(|e| AvatarError::Transport(e.to_string()))?;
        info!(face_id = %self.face_id, "Avatar session requested");

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let is_close = matches!(message, Message::Close(_));
                if let Err(e) = ws_tx.send(message).await {
                    debug!(error = %e, "Avatar writer stopped");
                    break;
                }
                if is_close {
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        let events = self.events.clone();
        let video_sink = self.video_sink.clone();
        let audio_sink = self.audio_sink.clone();
        let reader = tokio::spawn(async move {
            while let Some(message) = ws_rx.next().await {
                match message {
                    Ok(Message::Text(text)) => match text.trim() {
                        START_SIGNAL => {
                            let _ = events.send(AvatarClientEvent::Connected);
                        }
                        STOP_SIGNAL => {
                            let _ = events.send(AvatarClientEvent::Disconnected);
                            return;
                        }
                        other => debug!(message = other, "Avatar service message"),
                    },
                    Ok(Message::Binary(frame)) => route_media(&frame, &video_sink, &audio_sink),
                    Ok(Message::Close(frame)) => {
                        info!(?frame, "Avatar service closed the connection");
                        let _ = events.send(AvatarClientEvent::Disconnected);
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "Avatar socket error");
                        let _ = events.send(AvatarClientEvent::Error(e.to_string()));
                        return;
                    }
                }
            }
            let _ = events.send(AvatarClientEvent::Disconnected);
        });

        let connection = Connection {
            outbound: outbound_tx,
            reader: reader.abort_handle(),
        };
        if self.connection.set(connection).is_err() {
            reader.abort();
            return Err(AvatarError::Transport("avatar client already started".to_string()));
        }
        if self.closed.load(Ordering::SeqCst) {
            self.shutdown();
            return Err(AvatarError::Transport("avatar client closed during start".to_string()));
        }
        Ok(())
    }

    fn send_audio_data(&self, data: &[u8]) -> Result<(), AvatarError> {
        self.outbound()?
            .send(Message::Binary(data.to_vec().into()))
            .map_err(|_| AvatarError::Transport("avatar writer has stopped".to_string()))
    }

    fn clear_buffer(&self) -> Result<(), AvatarError> {
        self.outbound()?
            .send(Message::Text(SKIP_SIGNAL.to_string().into()))
            .map_err(|_| AvatarError::Transport("avatar writer has stopped".to_string()))
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown();
        debug!("Avatar client closed");
    }
}

impl Drop for WsAvatarClient {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.get() {
            connection.reader.abort();
        }
    }
}

fn route_media(frame: &[u8], video_sink: &SharedSink, audio_sink: &SharedSink) {
    match frame.split_first() {
        Some((&VIDEO_FRAME, payload)) => write_chunk(video_sink, payload, "video"),
        Some((&AUDIO_FRAME, payload)) => write_chunk(audio_sink, payload, "audio"),
        Some((kind, _)) => warn!(kind, "Unknown avatar media frame"),
        None => {}
    }
}
