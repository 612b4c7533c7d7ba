//! Issuance of signed conversation URLs, plus the agent REST helpers.
//!
//! Two issuers exist: the voice-AI REST API called directly with our own
//! credential, and a same-origin proxy that keeps the credential server side.
//! [`FallbackIssuer`] prefers the proxy and only falls back when it is
//! unreachable.

use crate::error::ConversationError;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_API_BASE: &str = "https://api.elevenlabs.io";
pub const PROXY_ROUTE: &str = "/api/elevenlabs-signed-url";

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SignedUrlIssuer: Send + Sync {
    async fn signed_url(&self, agent_id: &str) -> Result<String, ConversationError>;
}

#[derive(Deserialize, Debug)]
struct SignedUrlResponse {
    signed_url: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct AgentSummary {
    pub agent_id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct AgentList {
    #[serde(default)]
    agents: Vec<AgentSummary>,
}

/// Client for the voice-AI REST API, authenticated with `xi-api-key`.
#[derive(Clone)]
pub struct ConvaiRestClient {
    http: reqwest::Client,
    api_base: String,
    api_key: SecretString,
}

impl ConvaiRestClient {
    pub fn new(api_base: impl Into<String>, api_key: SecretString) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn ensure_credentials(&self, agent_id: &str) -> Result<(), ConversationError> {
        if self.api_key.expose_secret().trim().is_empty() {
            return Err(ConversationError::Config(
                "Voice AI API key not found".to_string(),
            ));
        }
        if agent_id.trim().is_empty() {
            return Err(ConversationError::Config("Agent ID is required".to_string()));
        }
        Ok(())
    }

    async fn request_signed_url(&self, agent_id: &str) -> Result<reqwest::Response, ConversationError> {
        self.ensure_credentials(agent_id)?;
        let url = format!("{}/v1/convai/conversation/get_signed_url", self.api_base);
        let response = self
            .http
            .get(url)
            .query(&[("agent_id", agent_id)])
            .header("xi-api-key", self.api_key.expose_secret())
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        Err(match status.as_u16() {
            401 => ConversationError::Auth(
                "Invalid voice AI API key. Please check CONVAI_API_KEY.".to_string(),
            ),
            403 => ConversationError::AccessDenied(
                "Access denied. Please check if your API key has access to this agent.".to_string(),
            ),
            404 => ConversationError::NotFound(format!(
                "Agent ID '{}' not found. Please check that the agent exists.",
                agent_id
            )),
            code if status.is_server_error() => ConversationError::Unavailable(format!(
                "{} - {}",
                code,
                status.canonical_reason().unwrap_or("server error")
            )),
            code => ConversationError::Api {
                status: code,
                message: status.canonical_reason().unwrap_or("unexpected status").to_string(),
            },
        })
    }

    /// Checks that the agent exists and the credential may use it.
    pub async fn validate_agent(&self, agent_id: &str) -> Result<(), ConversationError> {
        self.request_signed_url(agent_id).await.map(|_| ())
    }

    /// Lists the agents visible to the credential. Failures degrade to an empty list.
    pub async fn list_agents(&self) -> Vec<AgentSummary> {
        let url = format!("{}/v1/convai/agents", self.api_base);
        let response = match self
            .http
            .get(url)
            .header("xi-api-key", self.api_key.expose_secret())
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Could not list agents");
                return Vec::new();
            }
        };
        if !response.status().is_success() {
            warn!(status = %response.status(), "Could not list agents");
            return Vec::new();
        }
        match response.json::<AgentList>().await {
            Ok(list) => list.agents,
            Err(e) => {
                warn!(error = %e, "Agent list was not understood");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl SignedUrlIssuer for ConvaiRestClient {
    async fn signed_url(&self, agent_id: &str) -> Result<String, ConversationError> {
        debug!(agent_id, "Requesting signed URL");
        let body: SignedUrlResponse = self.request_signed_url(agent_id).await?.json().await?;
        Ok(body.signed_url)
    }
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ProxyRequest {
    pub agent_id: String,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ProxyResponse {
    pub signed_url: String,
}

#[derive(Deserialize, Debug)]
struct ProxyErrorBody {
    #[serde(default)]
    message: String,
}

/// Issues signed URLs through the same-origin proxy route.
#[derive(Clone)]
pub struct ProxyIssuer {
    http: reqwest::Client,
    url: String,
}

impl ProxyIssuer {
    /// `origin` is the proxy's base URL; the route is appended.
    pub fn new(origin: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: format!("{}{}", origin.trim_end_matches('/'), PROXY_ROUTE),
        }
    }
}

#[async_trait]
impl SignedUrlIssuer for ProxyIssuer {
    async fn signed_url(&self, agent_id: &str) -> Result<String, ConversationError> {
        let response = self
            .http
            .post(&self.url)
            .json(&ProxyRequest {
                agent_id: agent_id.to_string(),
            })
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            let body: ProxyResponse = response.json().await?;
            return Ok(body.signed_url);
        }
        let message = response
            .json::<ProxyErrorBody>()
            .await
            .map(|b| b.message)
            .unwrap_or_default();
        Err(match status.as_u16() {
            400 => ConversationError::Config(message),
            401 => ConversationError::Auth(message),
            403 => ConversationError::AccessDenied(message),
            404 if message.is_empty() => {
                ConversationError::Unavailable("signed URL route not found".to_string())
            }
            404 => ConversationError::NotFound(message),
            code => ConversationError::Unavailable(format!("proxy answered {}", code)),
        })
    }
}

/// Tries `primary` first and falls back to `fallback` when it is unavailable.
pub struct FallbackIssuer {
    primary: Arc<dyn SignedUrlIssuer>,
    fallback: Arc<dyn SignedUrlIssuer>,
}

impl FallbackIssuer {
    pub fn new(primary: Arc<dyn SignedUrlIssuer>, fallback: Arc<dyn SignedUrlIssuer>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl SignedUrlIssuer for FallbackIssuer {
    async fn signed_url(&self, agent_id: &str) -> Result<String, ConversationError> {
        match self.primary.signed_url(agent_id).await {
            Ok(url) => {
                info!(agent_id, "Signed URL issued by proxy");
                Ok(url)
            }
            Err(e) if e.is_unavailable() => {
                warn!(
                    error = %e,
                    "Signed URL proxy unavailable; issuing directly with the client-held API key. \
                     This exposes the credential to this process"
                );
                self.fallback.signed_url(agent_id).await
            }
            Err(e) => Err(e),
        }
    }
}
