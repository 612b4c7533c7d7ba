//! Client for a conversational voice-AI service reached over a signed WebSocket URL.

pub mod channel;
pub mod close;
pub mod connector;
pub mod error;
pub mod protocol;
pub mod signed_url;

pub use channel::{
    ConversationChannel, ConversationConnector, ConversationEvent, ConversationEventSink,
    ConversationLink, Outbound,
};
pub use close::{CloseOutcome, classify_close};
pub use connector::WsConversationConnector;
pub use error::ConversationError;
pub use signed_url::{
    AgentSummary, ConvaiRestClient, FallbackIssuer, ProxyIssuer, ProxyRequest, ProxyResponse,
    SignedUrlIssuer,
};
