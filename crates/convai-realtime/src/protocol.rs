//! Wire messages of the conversational voice-AI WebSocket.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful AI assistant. Respond naturally to the user's questions and comments.";

/// Messages received from the voice-AI service.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Keep-alive; must be answered with a pong after `ping_ms`.
    Ping {
        #[serde(default)]
        ping_event: PingEvent,
    },
    UserTranscript {
        user_transcription_event: UserTranscriptionEvent,
    },
    AgentResponse {
        agent_response_event: AgentResponseEvent,
    },
    /// A chunk of synthesized speech, base64 PCM16.
    Audio {
        #[serde(default)]
        audio_event: Option<AudioEvent>,
    },
    Interruption {
        #[serde(default)]
        interruption_event: Option<InterruptionEvent>,
    },
    ConversationEnd,
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
pub struct PingEvent {
    #[serde(default)]
    pub event_id: Value,
    pub ping_ms: Option<u64>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct UserTranscriptionEvent {
    #[serde(default)]
    pub user_transcript: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct AgentResponseEvent {
    #[serde(default)]
    pub agent_response: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct AudioEvent {
    pub audio_base_64: Option<String>,
    pub event_id: Option<Value>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct InterruptionEvent {
    pub reason: Option<String>,
}

/// Control messages sent to the voice-AI service.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    ConversationInitiationClientData {
        conversation_initiation_client_data: InitiationData,
    },
    Pong {
        event_id: Value,
    },
}

#[derive(Serialize, Debug, Clone)]
pub struct InitiationData {
    pub custom_llm_extra_body: serde_json::Map<String, Value>,
    pub conversation_config_override: ConfigOverride,
}

#[derive(Serialize, Debug, Clone)]
pub struct ConfigOverride {
    pub agent: AgentOverride,
}

#[derive(Serialize, Debug, Clone)]
pub struct AgentOverride {
    pub prompt: PromptOverride,
}

#[derive(Serialize, Debug, Clone)]
pub struct PromptOverride {
    pub prompt: String,
}

/// Outbound microphone audio. Carries no `type` tag on the wire.
#[derive(Serialize, Debug)]
pub struct UserAudioChunk<'a> {
    pub user_audio_chunk: &'a str,
}

impl ClientEvent {
    pub fn initiation(system_prompt: Option<&str>) -> Self {
        let prompt = system_prompt
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(DEFAULT_SYSTEM_PROMPT)
            .to_string();
        ClientEvent::ConversationInitiationClientData {
            conversation_initiation_client_data: InitiationData {
                custom_llm_extra_body: serde_json::Map::new(),
                conversation_config_override: ConfigOverride {
                    agent: AgentOverride {
                        prompt: PromptOverride { prompt },
                    },
                },
            },
        }
    }

    pub fn pong(event_id: Value) -> Self {
        ClientEvent::Pong { event_id }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

pub fn audio_chunk_json(base64_audio: &str) -> Result<String, serde_json::Error> {
    serde_json::to_string(&UserAudioChunk {
        user_audio_chunk: base64_audio,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_ping() {
        let event: ServerEvent = serde_json::from_str(
            r#"{"type":"ping","ping_event":{"event_id":42,"ping_ms":250}}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            ServerEvent::Ping {
                ping_event: PingEvent {
                    event_id: json!(42),
                    ping_ms: Some(250)
                }
            }
        );

        let bare: ServerEvent = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        let ServerEvent::Ping { ping_event } = bare else {
            panic!("expected ping");
        };
        assert_eq!(ping_event.ping_ms, None);
    }

    #[test]
    fn test_parse_conversation_events() {
        let transcript: ServerEvent = serde_json::from_str(
            r#"{"type":"user_transcript","user_transcription_event":{"user_transcript":"hello"}}"#,
        )
        .unwrap();
        assert!(matches!(
            transcript,
            ServerEvent::UserTranscript { user_transcription_event } if user_transcription_event.user_transcript == "hello"
        ));

        let response: ServerEvent = serde_json::from_str(
            r#"{"type":"agent_response","agent_response_event":{"agent_response":"Hi there"}}"#,
        )
        .unwrap();
        assert!(matches!(
            response,
            ServerEvent::AgentResponse { agent_response_event } if agent_response_event.agent_response == "Hi there"
        ));

        let audio: ServerEvent = serde_json::from_str(
            r#"{"type":"audio","audio_event":{"audio_base_64":"AAA=","event_id":3}}"#,
        )
        .unwrap();
        let ServerEvent::Audio { audio_event: Some(audio_event) } = audio else {
            panic!("expected audio");
        };
        assert_eq!(audio_event.audio_base_64.as_deref(), Some("AAA="));

        let interruption: ServerEvent = serde_json::from_str(
            r#"{"type":"interruption","interruption_event":{"reason":"user"}}"#,
        )
        .unwrap();
        assert!(matches!(interruption, ServerEvent::Interruption { .. }));
    }

    #[test]
    fn test_unknown_and_end_events() {
        let end: ServerEvent = serde_json::from_str(r#"{"type":"conversation_end"}"#).unwrap();
        assert_eq!(end, ServerEvent::ConversationEnd);

        let unknown: ServerEvent = serde_json::from_str(
            r#"{"type":"conversation_initiation_metadata","conversation_initiation_metadata_event":{}}"#,
        )
        .unwrap();
        assert_eq!(unknown, ServerEvent::Unknown);
    }

    #[test]
    fn test_initiation_message_shape() {
        let value: Value =
            serde_json::from_str(&ClientEvent::initiation(None).to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "conversation_initiation_client_data");
        let data = &value["conversation_initiation_client_data"];
        assert_eq!(data["custom_llm_extra_body"], json!({}));
        assert_eq!(
            data["conversation_config_override"]["agent"]["prompt"]["prompt"],
            DEFAULT_SYSTEM_PROMPT
        );

        let custom: Value = serde_json::from_str(
            &ClientEvent::initiation(Some("Be brief."))
                .to_json()
                .unwrap(),
        )
        .unwrap();
        assert_eq!(
            custom["conversation_initiation_client_data"]["conversation_config_override"]["agent"]
                ["prompt"]["prompt"],
            "Be brief."
        );
    }

    #[test]
    fn test_pong_and_audio_chunk() {
        let pong: Value =
            serde_json::from_str(&ClientEvent::pong(json!("evt-1")).to_json().unwrap()).unwrap();
        assert_eq!(pong, json!({"type": "pong", "event_id": "evt-1"}));

        let chunk: Value = serde_json::from_str(&audio_chunk_json("AAAA").unwrap()).unwrap();
        assert_eq!(chunk, json!({"user_audio_chunk": "AAAA"}));
    }
}
