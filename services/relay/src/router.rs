//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the relay, including the
//! OpenAPI documentation.

use crate::{
    handlers,
    models::{CredentialReport, CredentialResult, CredentialStatus},
    state::AppState,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use survey_core::{
    turn::{Role, Turn},
    wire::{Choice, CompletionRequest, CompletionResponse, ErrorBody},
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(handlers::chat_completion, handlers::credentials),
    components(
        schemas(CompletionRequest, CompletionResponse, Choice, Turn, Role, ErrorBody, CredentialReport, CredentialResult, CredentialStatus)
    ),
    tags(
        (name = "Survey Relay", description = "Completion relay for the survey chatbot")
    )
)]
pub struct ApiDoc;

/// The relay's OpenAPI document, stamped with this crate's version.
pub fn openapi_document() -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();
    doc.info.title = "Survey Relay".to_string();
    doc.info.version = env!("CARGO_PKG_VERSION").to_string();
    doc
}

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route(
            "/chat",
            post(handlers::chat_completion).fallback(handlers::method_not_allowed),
        )
        .route("/credentials", get(handlers::credentials))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi_document()))
        .merge(api_router)
}
