//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the scenario table and the
//! upstream collaborators every handler needs.

use crate::config::Config;
use std::sync::Arc;
use survey_core::{
    llm_client::UpstreamClient,
    retry::{RetryPolicy, Sleeper},
    scenario::ScenarioTable,
};

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub scenarios: Arc<ScenarioTable>,
    pub upstream: Arc<dyn UpstreamClient>,
    /// Waits between rate-limited attempts.
    pub sleeper: Arc<dyn Sleeper>,
}

impl AppState {
    pub fn retry_policy(&self) -> RetryPolicy {
        self.config.retry_policy()
    }

    /// Base URL for a scenario, falling back to the configured upstream.
    pub fn base_url_for<'a>(&'a self, scenario_base_url: Option<&'a str>) -> &'a str {
        scenario_base_url.unwrap_or(&self.config.upstream_base_url)
    }
}
