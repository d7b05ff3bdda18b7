use anyhow::{Context, Result};
use async_trait::async_trait;
use survey_core::{
    driver::{RelayClient, RelayError},
    wire::{CompletionRequest, CompletionResponse, ErrorBody},
};
use tracing::debug;

/// `RelayClient` that posts each turn to the relay's `/chat` endpoint.
pub struct HttpRelay {
    http: reqwest::Client,
    url: String,
}

impl HttpRelay {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("Failed to build relay HTTP client")?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait]
impl RelayClient for HttpRelay {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, RelayError> {
        debug!(url = %self.url, scenario_id = %request.scenario_id, "Posting turn to relay");
        let response = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<ErrorBody>().await {
                Ok(body) => body.error,
                Err(_) => status.canonical_reason().unwrap_or_default().to_string(),
            };
            return Err(RelayError::Status {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<CompletionResponse>()
            .await
            .map_err(|e| RelayError::Transport(format!("unreadable relay reply: {}", e)))
    }
}
