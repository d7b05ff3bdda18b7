use crate::{scenario::EndpointKind, turn::Turn};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Structured chat-completion body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatBody {
    pub model: String,
    pub messages: Vec<Turn>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Text-completion body with the conversation flattened into `prompt`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextBody {
    pub model: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
}

/// The body sent upstream, in one of the two endpoint forms.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum UpstreamRequest {
    Chat(ChatBody),
    Text(TextBody),
}

impl UpstreamRequest {
    pub fn endpoint(&self) -> EndpointKind {
        match self {
            UpstreamRequest::Chat(_) => EndpointKind::Chat,
            UpstreamRequest::Text(_) => EndpointKind::Text,
        }
    }
}

/// Everything needed to make one upstream attempt.
#[derive(Debug)]
pub struct UpstreamCall<'a> {
    pub url: String,
    pub credential: &'a SecretString,
    pub body: &'a UpstreamRequest,
}

/// Joins a base URL and the path for an endpoint form.
pub fn endpoint_url(base_url: &str, endpoint: EndpointKind) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), endpoint.path())
}

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("Upstream is rate limiting requests (429)")]
    RateLimited,
    #[error("Upstream returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Upstream request failed: {0}")]
    Transport(String),
    #[error("Upstream response was malformed: {0}")]
    Malformed(String),
    #[error("Upstream still rate limiting after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
}

/// A client for an OpenAI-compatible completion API.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Makes a single attempt and returns the raw JSON body of a 2xx response.
    async fn send(&self, call: &UpstreamCall<'_>) -> Result<Value, UpstreamError>;

    /// Verifies a credential by listing models at `base_url`.
    async fn check_credential(
        &self,
        base_url: &str,
        credential: &SecretString,
    ) -> Result<(), UpstreamError>;
}

/// `UpstreamClient` over HTTP with bearer authentication.
pub struct HttpUpstreamClient {
    http: reqwest::Client,
}

impl HttpUpstreamClient {
    /// Creates a client whose every request is bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build upstream HTTP client")?;
        Ok(Self { http })
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstreamClient {
    async fn send(&self, call: &UpstreamCall<'_>) -> Result<Value, UpstreamError> {
        debug!(url = %call.url, endpoint = ?call.body.endpoint(), "Sending upstream request");
        let response = self
            .http
            .post(&call.url)
            .bearer_auth(call.credential.expose_secret())
            .json(call.body)
            .send()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(UpstreamError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| UpstreamError::Malformed(e.to_string()))
    }

    async fn check_credential(
        &self,
        base_url: &str,
        credential: &SecretString,
    ) -> Result<(), UpstreamError> {
        let url = format!("{}/models", base_url.trim_end_matches('/'));
        let response = self
            .http
            .get(&url)
            .bearer_auth(credential.expose_secret())
            .send()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(UpstreamError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            })
        }
    }
}

/// Extracts the reply text from either upstream response shape.
///
/// Chat responses carry `choices[0].message.content`; text responses carry
/// `choices[0].text`. The result is trimmed and must not be empty.
pub fn normalize_reply(endpoint: EndpointKind, body: &Value) -> Result<String, UpstreamError> {
    let choice = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .ok_or_else(|| UpstreamError::Malformed("response has no choices".to_string()))?;

    let text = match endpoint {
        EndpointKind::Chat => choice.pointer("/message/content"),
        EndpointKind::Text => choice.get("text"),
    }
    .and_then(Value::as_str)
    .ok_or_else(|| {
        UpstreamError::Malformed(format!("choice has no text for {:?} endpoint", endpoint))
    })?;

    let text = text.trim();
    if text.is_empty() {
        return Err(UpstreamError::Malformed("reply text is empty".to_string()));
    }
    Ok(text.to_string())
}
