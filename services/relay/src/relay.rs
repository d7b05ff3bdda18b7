//! Completion Relay
//!
//! Resolves a request's scenario, applies the scenario's prompt and parameter policy,
//! calls the upstream API under the retry policy, and reshapes the reply into the
//! canonical single-choice response.

use crate::{
    models::{CredentialReport, CredentialResult, CredentialStatus},
    state::AppState,
};
use futures::future::join_all;
use std::collections::BTreeSet;
use survey_core::{
    llm_client::{UpstreamCall, UpstreamError, endpoint_url, normalize_reply},
    prompt::build_upstream_request,
    scenario::ScenarioError,
    wire::{CompletionRequest, CompletionResponse},
};
use tracing::{debug, info};

/// A terminal failure of one relay call.
#[derive(Debug, thiserror::Error)]
pub enum RelayFailure {
    #[error(transparent)]
    Scenario(#[from] ScenarioError),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

/// Handles one completion request end to end.
pub async fn relay_completion(
    state: &AppState,
    request: &CompletionRequest,
) -> Result<CompletionResponse, RelayFailure> {
    let scenario = state.scenarios.resolve(&request.scenario_id)?;
    let credential = scenario.credential()?;

    let params = scenario.parameters(request.temperature, request.max_tokens);
    let body = build_upstream_request(scenario, &request.messages, params);
    let call = UpstreamCall {
        url: endpoint_url(
            state.base_url_for(scenario.base_url.as_deref()),
            scenario.endpoint,
        ),
        credential,
        body: &body,
    };
    debug!(
        model = %scenario.model,
        endpoint = ?scenario.endpoint,
        temperature = params.temperature,
        max_tokens = params.max_tokens,
        "Resolved scenario"
    );

    let upstream = state.upstream.as_ref();
    let call = &call;
    let raw = state
        .retry_policy()
        .run(state.sleeper.as_ref(), move |_| upstream.send(call))
        .await?;

    let text = normalize_reply(scenario.endpoint, &raw)?;
    info!(reply_chars = text.chars().count(), "Completion relayed");
    Ok(CompletionResponse::single(text))
}

/// Checks every distinct credential in the scenario table against the upstream each
/// of its scenarios actually calls.
pub async fn check_credentials(state: &AppState) -> CredentialReport {
    let targets: BTreeSet<(&str, &str)> = state
        .scenarios
        .credential_targets()
        .into_iter()
        .map(|(name, base_url)| (name, state.base_url_for(base_url)))
        .collect();

    let checks = targets.into_iter().map(|(name, base_url)| async move {
        let result = |status| CredentialResult::new(name, base_url, status);
        let Some(secret) = state.scenarios.credential_by_name(name) else {
            return result(CredentialStatus::Missing);
        };
        match state.upstream.check_credential(base_url, secret).await {
            Ok(()) => result(CredentialStatus::Valid),
            Err(UpstreamError::Status { body, .. }) => {
                result(CredentialStatus::Invalid).with_error(body)
            }
            Err(UpstreamError::RateLimited) => result(CredentialStatus::Invalid)
                .with_error(UpstreamError::RateLimited.to_string()),
            Err(e) => result(CredentialStatus::Error).with_error(e.to_string()),
        }
    });

    CredentialReport {
        results: join_all(checks).await,
    }
}
