//! Wire Contracts Between Controller and Relay
//!
//! The relay always answers with a single-choice `choices[0].message` shape,
//! regardless of which upstream endpoint produced the text.

use crate::turn::{Role, Turn};
use serde::{Deserialize, Serialize};

/// Body of a completion call from the controller to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CompletionRequest {
    pub messages: Vec<Turn>,
    #[cfg_attr(feature = "openapi", schema(example = "a-consumerism-efl"))]
    pub scenario_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Choice {
    pub message: Turn,
}

/// Canonical successful relay response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CompletionResponse {
    pub choices: Vec<Choice>,
}

impl CompletionResponse {
    /// Wraps one assistant reply in the canonical single-choice shape.
    pub fn single(content: impl Into<String>) -> Self {
        Self {
            choices: vec![Choice {
                message: Turn::assistant(content),
            }],
        }
    }

    /// The trimmed text of the first assistant choice, if there is one.
    pub fn reply_text(&self) -> Option<&str> {
        self.choices
            .first()
            .filter(|choice| choice.message.role == Role::Assistant)
            .map(|choice| choice.message.content.trim())
    }
}

/// Error body returned by the relay for every 4xx/5xx response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}
