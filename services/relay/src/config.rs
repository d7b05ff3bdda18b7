use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use survey_core::retry::{DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, RetryPolicy};
use tracing::Level;

pub const DEFAULT_UPSTREAM_BASE_URL: &str = "https://api.openai.com/v1";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub log_level: Level,
    pub scenarios_path: PathBuf,
    pub upstream_base_url: String,
    pub upstream_timeout: Duration,
    pub retry_max_attempts: u32,
    pub retry_base_delay: Duration,
    /// Copies upstream error detail into the `details` field of error responses.
    pub expose_error_details: bool,
}

fn parse_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let scenarios_path = std::env::var("SCENARIOS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./scenarios.json"));

        let upstream_base_url = std::env::var("UPSTREAM_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_UPSTREAM_BASE_URL.to_string());
        if !upstream_base_url.starts_with("http://") && !upstream_base_url.starts_with("https://")
        {
            return Err(ConfigError::InvalidValue(
                "UPSTREAM_BASE_URL".to_string(),
                format!("'{}' is not an http(s) URL", upstream_base_url),
            ));
        }

        let upstream_timeout = Duration::from_secs(parse_var("UPSTREAM_TIMEOUT_SECS", 30u64)?);

        let retry_max_attempts = parse_var("RETRY_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?;
        if retry_max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "RETRY_MAX_ATTEMPTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let default_delay_ms = u64::try_from(DEFAULT_BASE_DELAY.as_millis()).unwrap_or(500);
        let retry_base_delay =
            Duration::from_millis(parse_var("RETRY_BASE_DELAY_MS", default_delay_ms)?);

        let expose_error_details = parse_var("EXPOSE_ERROR_DETAILS", false)?;

        Ok(Self {
            bind_address,
            log_level,
            scenarios_path,
            upstream_base_url,
            upstream_timeout,
            retry_max_attempts,
            retry_base_delay,
            expose_error_details,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_max_attempts, self.retry_base_delay)
    }
}
