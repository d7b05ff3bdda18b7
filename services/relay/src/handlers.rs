//! Axum Handlers for the Relay API
//!
//! `POST /chat` relays one completion; `GET /credentials` reports the health of the
//! configured credentials. Handlers carry `utoipa` annotations for the OpenAPI document.

use axum::{
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use survey_core::wire::{CompletionRequest, CompletionResponse, ErrorBody};
use tracing::{Span, error, instrument};
use uuid::Uuid;

use crate::{
    models::CredentialReport,
    relay::{RelayFailure, check_credentials, relay_completion},
    state::AppState,
};

/// The only message a caller ever sees for a failed completion.
pub const SAFE_ERROR_MESSAGE: &str = "The assistant is unavailable right now. Please try again.";

pub enum ApiError {
    MethodNotAllowed,
    BadRequest(String),
    /// Logged in full; `details` is only filled when the relay is configured to expose it.
    InternalServerError {
        error: anyhow::Error,
        details: Option<String>,
    },
}

impl ApiError {
    fn relay(failure: RelayFailure, expose_details: bool) -> Self {
        let details = expose_details.then(|| failure.to_string());
        Self::InternalServerError {
            error: failure.into(),
            details,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::MethodNotAllowed => (
                StatusCode::METHOD_NOT_ALLOWED,
                Json(ErrorBody {
                    error: "Method Not Allowed".to_string(),
                    details: None,
                }),
            )
                .into_response(),
            ApiError::BadRequest(details) => (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody {
                    error: "Invalid request body".to_string(),
                    details: Some(details),
                }),
            )
                .into_response(),
            ApiError::InternalServerError { error, details } => {
                error!("Internal Server Error: {:?}", error);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorBody {
                        error: SAFE_ERROR_MESSAGE.to_string(),
                        details,
                    }),
                )
                    .into_response()
            }
        }
    }
}

/// Relay one conversation turn to the scenario's upstream model.
#[utoipa::path(
    post,
    path = "/chat",
    request_body = CompletionRequest,
    responses(
        (status = 200, description = "Assistant reply in canonical form", body = CompletionResponse),
        (status = 400, description = "Body is not a valid completion request", body = ErrorBody),
        (status = 405, description = "Only POST is accepted", body = ErrorBody),
        (status = 500, description = "Configuration or upstream failure", body = ErrorBody)
    )
)]
#[instrument(
    name = "chat",
    skip_all,
    fields(request_id = %Uuid::new_v4(), scenario_id = tracing::field::Empty)
)]
pub async fn chat_completion(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CompletionRequest>, JsonRejection>,
) -> Result<Json<CompletionResponse>, ApiError> {
    let Json(request) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    Span::current().record("scenario_id", request.scenario_id.as_str());

    relay_completion(&state, &request)
        .await
        .map(Json)
        .map_err(|failure| ApiError::relay(failure, state.config.expose_error_details))
}

/// Fallback for any method other than POST on `/chat`.
pub async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

/// Check every configured credential against the upstream API.
#[utoipa::path(
    get,
    path = "/credentials",
    responses(
        (status = 200, description = "One result per credential variable", body = CredentialReport)
    )
)]
#[instrument(name = "credentials", skip_all)]
pub async fn credentials(State(state): State<Arc<AppState>>) -> Json<CredentialReport> {
    Json(check_credentials(&state).await)
}
