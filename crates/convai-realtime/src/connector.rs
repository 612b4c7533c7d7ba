//! WebSocket transport for the conversation channel.

use crate::{
    channel::{
        ConversationConnector, ConversationEvent, ConversationEventSink, ConversationLink,
        Outbound,
    },
    close::ABNORMAL_CLOSURE,
    error::ConversationError,
    protocol::{ClientEvent, ServerEvent},
    signed_url::SignedUrlIssuer,
};
use async_trait::async_trait;
use bytes::Bytes;
use facetalk_core::audio;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, task::JoinSet};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        Error as WsError,
        protocol::{CloseFrame, Message, frame::coding::CloseCode},
    },
};
use tracing::{debug, error, info, warn};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct WsConversationConnector {
    issuer: Arc<dyn SignedUrlIssuer>,
    connect_timeout: Duration,
    system_prompt: Option<String>,
}

impl WsConversationConnector {
    pub fn new(issuer: Arc<dyn SignedUrlIssuer>) -> Self {
        Self {
            issuer,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            system_prompt: None,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt;
        self
    }
}

#[async_trait]
impl ConversationConnector for WsConversationConnector {
    async fn connect(
        &self,
        agent_id: &str,
        events: ConversationEventSink,
    ) -> Result<ConversationLink, ConversationError> {
        // Covers URL issuance and the handshake. Dropping either closes its connection.
        tokio::time::timeout(self.connect_timeout, self.open(agent_id, events))
            .await
            .map_err(|_| ConversationError::Timeout(self.connect_timeout))?
    }
}

impl WsConversationConnector {
    async fn open(
        &self,
        agent_id: &str,
        events: ConversationEventSink,
    ) -> Result<ConversationLink, ConversationError> {
        let signed_url = self.issuer.signed_url(agent_id).await?;
        info!(agent_id, "Got signed conversation URL");

        let (ws_stream, _) = connect_async(signed_url).await?;
        info!(agent_id, "Conversation WebSocket connected");

        let (ws_tx, ws_rx) = ws_stream.split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let initiation = ClientEvent::initiation(self.system_prompt.as_deref()).to_json()?;
        outbound_tx
            .send(Outbound::Control(initiation))
            .map_err(|_| ConversationError::Transport("socket writer has stopped".to_string()))?;

        // The writer is detached: it exits once the link and the reader drop their senders.
        tokio::spawn(write_loop(ws_tx, outbound_rx));
        let reader = tokio::spawn(read_loop(ws_rx, outbound_tx.clone(), events));
        Ok(ConversationLink::new(outbound_tx, vec![reader.abort_handle()]))
    }
}

async fn write_loop<S>(mut sink: S, mut outbound: mpsc::UnboundedReceiver<Outbound>)
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    while let Some(message) = outbound.recv().await {
        let result = match message {
            Outbound::Control(text) | Outbound::Audio(text) => {
                sink.send(Message::Text(text.into())).await
            }
            Outbound::Close { code, reason } => {
                let frame = CloseFrame {
                    code: CloseCode::from(code),
                    reason: reason.into(),
                };
                let _ = sink.send(Message::Close(Some(frame))).await;
                break;
            }
        };
        if let Err(e) = result {
            warn!(error = %e, "Dropped outbound conversation message");
            if matches!(e, WsError::ConnectionClosed | WsError::AlreadyClosed) {
                break;
            }
        }
    }
    let _ = sink.close().await;
    debug!("Conversation writer finished");
}

async fn read_loop<S>(
    mut stream: S,
    outbound: mpsc::UnboundedSender<Outbound>,
    events: ConversationEventSink,
) where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    // Pong timers live here so aborting the reader cancels them.
    let mut pongs = JoinSet::new();
    let (code, reason) = loop {
        tokio::select! {
            Some(_) = pongs.join_next(), if !pongs.is_empty() => {}
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    handle_text(&text, &outbound, &events, &mut pongs);
                }
                Some(Ok(Message::Close(frame))) => {
                    break match frame {
                        Some(frame) => (u16::from(frame.code), frame.reason.to_string()),
                        None => (1005, String::new()),
                    };
                }
                Some(Ok(other)) => debug!(?other, "Ignoring non-text conversation frame"),
                Some(Err(e)) => {
                    error!(error = %e, "Conversation socket error");
                    break (ABNORMAL_CLOSURE, e.to_string());
                }
                None => break (ABNORMAL_CLOSURE, "Connection lost".to_string()),
            }
        }
    };
    pongs.abort_all();
    events(ConversationEvent::Closed { code, reason });
}

fn handle_text(
    text: &str,
    outbound: &mpsc::UnboundedSender<Outbound>,
    events: &ConversationEventSink,
    pongs: &mut JoinSet<()>,
) {
    let event = match serde_json::from_str::<ServerEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Unparseable conversation message");
            return;
        }
    };
    match event {
        ServerEvent::Ping { ping_event } => {
            let delay = Duration::from_millis(ping_event.ping_ms.unwrap_or(0));
            let pong = match ClientEvent::pong(ping_event.event_id).to_json() {
                Ok(pong) => pong,
                Err(e) => {
                    warn!(error = %e, "Failed to serialize pong");
                    return;
                }
            };
            let outbound = outbound.clone();
            pongs.spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = outbound.send(Outbound::Control(pong));
            });
        }
        ServerEvent::UserTranscript {
            user_transcription_event,
        } => {
            debug!(transcript = %user_transcription_event.user_transcript, "User transcript");
            events(ConversationEvent::UserTranscript(
                user_transcription_event.user_transcript,
            ));
        }
        ServerEvent::AgentResponse {
            agent_response_event,
        } => {
            debug!(response = %agent_response_event.agent_response, "Agent response");
            events(ConversationEvent::AgentResponse(
                agent_response_event.agent_response,
            ));
        }
        ServerEvent::Audio { audio_event } => {
            let Some(fragment) = audio_event.and_then(|a| a.audio_base_64) else {
                return;
            };
            match audio::decode_base64(&fragment) {
                Ok(pcm) => events(ConversationEvent::Audio(Bytes::from(pcm))),
                Err(e) => warn!(error = %e, "Dropping undecodable agent audio"),
            }
        }
        ServerEvent::Interruption { interruption_event } => {
            let reason = interruption_event.and_then(|i| i.reason);
            info!(?reason, "Conversation interrupted");
            events(ConversationEvent::Interruption(reason));
        }
        ServerEvent::ConversationEnd => {
            info!("Conversation ended");
            events(ConversationEvent::ConversationEnd);
        }
        ServerEvent::Unknown => debug!(message = text, "Unhandled conversation message"),
    }
}
