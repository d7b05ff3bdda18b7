//! Scenario Routing Table
//!
//! Every experimental condition is a row in a data-driven table keyed by scenario id.
//! A row names the credential to use, the upstream model and endpoint form, and the
//! policy-controlled generation parameters. There is no fallback row: an id that is
//! not in the table is a hard configuration error.

use crate::track::{ExchangePolicy, Track};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 250;

#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("No scenario is configured for id '{0}'")]
    Unmapped(String),
    #[error("Scenario '{scenario}' has no value for credential variable {variable}")]
    MissingCredential { scenario: String, variable: String },
    #[error("Failed to read scenario file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse scenario file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Scenario id '{0}' is defined more than once")]
    Duplicate(String),
    #[error("Scenario '{id}' is invalid: {reason}")]
    Invalid { id: String, reason: String },
}

/// Which upstream completion form a scenario talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    /// Structured role/content messages.
    #[default]
    Chat,
    /// A single flattened prompt string.
    Text,
}

impl EndpointKind {
    pub fn path(self) -> &'static str {
        match self {
            EndpointKind::Chat => "/chat/completions",
            EndpointKind::Text => "/completions",
        }
    }
}

/// One row of the scenario file, before credentials are resolved.
#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioEntry {
    pub id: String,
    /// Name of the environment variable holding the secret.
    pub credential: String,
    pub model: String,
    #[serde(default)]
    pub endpoint: EndpointKind,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub exchange_limit: Option<u32>,
    #[serde(default)]
    pub closing_messages: Option<Vec<String>>,
}

impl ScenarioEntry {
    /// The track policy for this id with any per-scenario overrides applied.
    pub fn policy(&self) -> ExchangePolicy {
        let mut policy = Track::from_scenario_id(&self.id).policy();
        if let Some(limit) = self.exchange_limit {
            policy.exchange_limit = limit;
        }
        if let Some(messages) = self.closing_messages.as_ref().filter(|m| !m.is_empty()) {
            policy.closing_messages = messages.clone();
        }
        policy
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioFile {
    pub scenarios: Vec<ScenarioEntry>,
}

impl ScenarioFile {
    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let json = std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Exchange policy for `scenario_id`, without touching any credential.
    pub fn policy_for(&self, scenario_id: &str) -> Option<ExchangePolicy> {
        self.scenarios
            .iter()
            .find(|entry| entry.id == scenario_id)
            .map(ScenarioEntry::policy)
    }
}

/// Generation parameters after applying scenario policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionParameters {
    pub temperature: f32,
    pub max_tokens: u32,
}

/// A fully resolved scenario. Immutable for the life of the relay.
#[derive(Debug)]
pub struct ScenarioConfig {
    pub scenario_id: String,
    pub credential_name: String,
    credential: Option<SecretString>,
    pub model: String,
    pub endpoint: EndpointKind,
    /// System prompt template; replaces any client-supplied system message.
    pub prompt_variant: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub base_url: Option<String>,
    pub track: Track,
    pub policy: ExchangePolicy,
}

impl ScenarioConfig {
    fn from_entry(entry: ScenarioEntry, credential: Option<SecretString>) -> Result<Self, ScenarioError> {
        if entry.model.trim().is_empty() {
            return Err(ScenarioError::Invalid {
                id: entry.id,
                reason: "model must not be empty".to_string(),
            });
        }
        if entry.exchange_limit == Some(0) {
            return Err(ScenarioError::Invalid {
                id: entry.id,
                reason: "exchange_limit must be at least 1".to_string(),
            });
        }

        let track = Track::from_scenario_id(&entry.id);
        let policy = entry.policy();

        Ok(Self {
            scenario_id: entry.id,
            credential_name: entry.credential,
            credential,
            model: entry.model,
            endpoint: entry.endpoint,
            prompt_variant: entry.prompt.filter(|p| !p.trim().is_empty()),
            temperature: entry.temperature,
            max_tokens: entry.max_tokens,
            base_url: entry.base_url,
            track,
            policy,
        })
    }

    /// The secret for this scenario, or a configuration error if it was never provisioned.
    pub fn credential(&self) -> Result<&SecretString, ScenarioError> {
        self.credential
            .as_ref()
            .ok_or_else(|| ScenarioError::MissingCredential {
                scenario: self.scenario_id.clone(),
                variable: self.credential_name.clone(),
            })
    }

    /// Scenario values win over caller values; caller values only fill gaps.
    pub fn parameters(&self, temperature: Option<f32>, max_tokens: Option<u32>) -> CompletionParameters {
        if self.temperature.is_some() && temperature.is_some_and(|t| Some(t) != self.temperature) {
            debug!(scenario_id = %self.scenario_id, "Ignoring caller temperature in favour of scenario policy");
        }
        if self.max_tokens.is_some() && max_tokens.is_some_and(|m| Some(m) != self.max_tokens) {
            debug!(scenario_id = %self.scenario_id, "Ignoring caller max_tokens in favour of scenario policy");
        }
        CompletionParameters {
            temperature: self
                .temperature
                .or(temperature)
                .unwrap_or(DEFAULT_TEMPERATURE),
            max_tokens: self.max_tokens.or(max_tokens).unwrap_or(DEFAULT_MAX_TOKENS),
        }
    }

    pub fn closing_message(&self, index: usize) -> &str {
        self.policy.closing_message(index)
    }
}

impl Track {
    /// Derives the track from the last dash-separated segment of a scenario id,
    /// e.g. `a-consumerism-efl`.
    pub fn from_scenario_id(id: &str) -> Self {
        Track::from_label(id.rsplit('-').next().unwrap_or_default())
    }
}

/// The scenario table, keyed by scenario id.
#[derive(Debug, Default)]
pub struct ScenarioTable {
    scenarios: HashMap<String, ScenarioConfig>,
}

impl ScenarioTable {
    /// Builds the table, resolving each credential name through `lookup`.
    ///
    /// A credential with no value is kept as absent so that requests for that scenario
    /// fail individually instead of preventing startup.
    pub fn from_entries<F>(entries: Vec<ScenarioEntry>, lookup: F) -> Result<Self, ScenarioError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut scenarios = HashMap::with_capacity(entries.len());
        for entry in entries {
            let credential = lookup(&entry.credential)
                .filter(|value| !value.trim().is_empty())
                .map(SecretString::from);
            if credential.is_none() {
                warn!(scenario_id = %entry.id, variable = %entry.credential, "Scenario credential is not set");
            }
            let config = ScenarioConfig::from_entry(entry, credential)?;
            if scenarios.contains_key(&config.scenario_id) {
                return Err(ScenarioError::Duplicate(config.scenario_id));
            }
            scenarios.insert(config.scenario_id.clone(), config);
        }
        Ok(Self { scenarios })
    }

    pub fn from_json<F>(json: &str, lookup: F) -> Result<Self, ScenarioError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file: ScenarioFile = serde_json::from_str(json)?;
        Self::from_entries(file.scenarios, lookup)
    }

    pub fn load<F>(path: &Path, lookup: F) -> Result<Self, ScenarioError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = ScenarioFile::load(path)?;
        Self::from_entries(file.scenarios, lookup)
    }

    pub fn resolve(&self, scenario_id: &str) -> Result<&ScenarioConfig, ScenarioError> {
        self.scenarios
            .get(scenario_id)
            .ok_or_else(|| ScenarioError::Unmapped(scenario_id.to_string()))
    }

    /// Every distinct pairing of credential variable name and scenario base URL, sorted.
    /// `None` stands for the relay's default upstream.
    pub fn credential_targets(&self) -> BTreeSet<(&str, Option<&str>)> {
        self.scenarios
            .values()
            .map(|s| (s.credential_name.as_str(), s.base_url.as_deref()))
            .collect()
    }

    /// Any provisioned secret stored under the given variable name.
    pub fn credential_by_name(&self, name: &str) -> Option<&SecretString> {
        self.scenarios
            .values()
            .filter(|s| s.credential_name == name)
            .find_map(|s| s.credential.as_ref())
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }
}
