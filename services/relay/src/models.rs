//! Relay-specific API models.
//!
//! The completion contract itself lives in `survey_core::wire`; this module holds the
//! shapes that only the relay's operational endpoints use.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum CredentialStatus {
    /// No value is configured for the variable.
    Missing,
    Valid,
    /// The upstream API rejected the credential.
    Invalid,
    /// The check itself could not be completed.
    Error,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq)]
pub struct CredentialResult {
    #[schema(example = "EFL_KEY_A")]
    pub name: String,
    /// Upstream the credential was checked against.
    #[schema(example = "https://api.openai.com/v1")]
    pub base_url: String,
    pub status: CredentialStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CredentialResult {
    pub fn new(name: &str, base_url: &str, status: CredentialStatus) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.to_string(),
            status,
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq)]
pub struct CredentialReport {
    pub results: Vec<CredentialResult>,
}
