//! Request and response bodies for the signed-URL route, with their OpenAPI schemas.
//!
//! Field names are camelCase on the wire to match the browser-era contract.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Deserialize, Serialize, ToSchema, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrlRequest {
    #[schema(example = "agent_01jxyz")]
    pub agent_id: String,
}

#[derive(Deserialize, Serialize, ToSchema, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrlResponse {
    #[schema(example = "wss://api.elevenlabs.io/v1/convai/conversation?agent_id=agent_01jxyz&conversation_signature=...")]
    pub signed_url: String,
}

#[derive(Deserialize, Serialize, ToSchema, Debug, Clone, PartialEq)]
pub struct ErrorResponse {
    pub message: String,
}
