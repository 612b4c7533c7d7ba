//! Axum Handlers for the signed-URL proxy
//!
//! The proxy keeps the voice-AI credential on the server. Clients send only
//! an agent id and receive a short-lived signed WebSocket URL.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use convai_realtime::ConversationError;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{
    models::{ErrorResponse, SignedUrlRequest, SignedUrlResponse},
    state::AppState,
};

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    BadGateway(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Unauthorized(message) => (StatusCode::UNAUTHORIZED, message),
            ApiError::Forbidden(message) => (StatusCode::FORBIDDEN, message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::BadGateway(message) => (StatusCode::BAD_GATEWAY, message),
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal server error occurred.".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { message })).into_response()
    }
}

impl From<ConversationError> for ApiError {
    fn from(err: ConversationError) -> Self {
        match err {
            ConversationError::Config(message) => ApiError::BadRequest(message),
            ConversationError::Auth(message) => ApiError::Unauthorized(message),
            ConversationError::AccessDenied(message) => ApiError::Forbidden(message),
            ConversationError::NotFound(message) => ApiError::NotFound(message),
            ConversationError::Unavailable(_)
            | ConversationError::Timeout(_)
            | ConversationError::Api { .. } => ApiError::BadGateway(err.to_string()),
            other => ApiError::InternalServerError(other.into()),
        }
    }
}

/// Issue a signed conversation URL for an agent.
#[utoipa::path(
    post,
    path = "/api/elevenlabs-signed-url",
    request_body = SignedUrlRequest,
    responses(
        (status = 200, description = "Signed URL issued", body = SignedUrlResponse),
        (status = 400, description = "Missing agent id", body = ErrorResponse),
        (status = 401, description = "Server credential rejected upstream", body = ErrorResponse),
        (status = 403, description = "Credential may not use this agent", body = ErrorResponse),
        (status = 404, description = "Unknown agent", body = ErrorResponse),
        (status = 502, description = "Upstream unavailable", body = ErrorResponse)
    )
)]
pub async fn issue_signed_url(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SignedUrlRequest>,
) -> Result<Json<SignedUrlResponse>, ApiError> {
    let agent_id = payload.agent_id.trim();
    if agent_id.is_empty() {
        return Err(ApiError::BadRequest("agentId is required".to_string()));
    }

    match state.issuer.signed_url(agent_id).await {
        Ok(signed_url) => {
            info!(agent_id, "Issued signed URL");
            Ok(Json(SignedUrlResponse { signed_url }))
        }
        Err(e) => {
            warn!(agent_id, error = %e, "Signed URL request failed");
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use convai_realtime::SignedUrlIssuer;

    /// Answers by agent id so each upstream outcome can be exercised.
    struct ScriptedIssuer;

    #[async_trait]
    impl SignedUrlIssuer for ScriptedIssuer {
        async fn signed_url(&self, agent_id: &str) -> Result<String, ConversationError> {
            match agent_id {
                "agent_ok" => Ok("wss://voice.example/convai?token=abc".to_string()),
                "agent_missing" => Err(ConversationError::NotFound("Agent not found".into())),
                "agent_denied" => Err(ConversationError::AccessDenied("Access denied".into())),
                "agent_badkey" => Err(ConversationError::Auth("Invalid key".into())),
                _ => Err(ConversationError::Unavailable("503 - Service Unavailable".into())),
            }
        }
    }

    fn state() -> State<Arc<AppState>> {
        State(Arc::new(AppState {
            issuer: Arc::new(ScriptedIssuer),
        }))
    }

    fn request(agent_id: &str) -> Json<SignedUrlRequest> {
        Json(SignedUrlRequest {
            agent_id: agent_id.to_string(),
        })
    }

    async fn status_of(agent_id: &str) -> StatusCode {
        match issue_signed_url(state(), request(agent_id)).await {
            Ok(_) => StatusCode::OK,
            Err(e) => e.into_response().status(),
        }
    }

    #[tokio::test]
    async fn test_issues_url_for_known_agent() {
        let Json(body) = issue_signed_url(state(), request(" agent_ok "))
            .await
            .unwrap();
        assert_eq!(body.signed_url, "wss://voice.example/convai?token=abc");
    }

    #[tokio::test]
    async fn test_upstream_statuses_are_mirrored() {
        assert_eq!(status_of("").await, StatusCode::BAD_REQUEST);
        assert_eq!(status_of("agent_badkey").await, StatusCode::UNAUTHORIZED);
        assert_eq!(status_of("agent_denied").await, StatusCode::FORBIDDEN);
        assert_eq!(status_of("agent_missing").await, StatusCode::NOT_FOUND);
        assert_eq!(status_of("agent_down").await, StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_protocol_errors_are_internal() {
        let err: ApiError = ConversationError::Protocol("bad json".into()).into();
        assert!(matches!(err, ApiError::InternalServerError(_)));
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
