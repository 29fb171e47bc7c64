//! Credential authority configuration.
//!
//! Configuration is loaded from environment variables, falling back to the
//! reference defaults below.

use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// How long a fetched user snapshot is trusted (5 minutes).
pub const DEFAULT_USER_FRESHNESS_SECONDS: u64 = 5 * 60;

/// How long an unchecked user stays cached (8 minutes).
pub const DEFAULT_CACHE_RETENTION_SECONDS: u64 = 8 * 60;

/// Minimum spacing between change polls (5 seconds).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;

/// First delay after a failed change poll.
pub const DEFAULT_POLL_BACKOFF_BASE_MS: u64 = 1_000;

/// Maximum delay between failed change polls.
pub const DEFAULT_POLL_BACKOFF_MAX_MS: u64 = 30_000;

/// Period of the background eviction sweep.
pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 60;

/// Default authority instance ID prefix.
pub const DEFAULT_CA_ID_PREFIX: &str = "ca";

/// Credential authority configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Identifier of this authority instance, used in logs.
    pub authority_id: String,

    /// How long a populated snapshot is trusted before a check forces a re-fetch.
    pub user_freshness: Duration,

    /// How long an idle, unchecked user survives in cache before eviction.
    pub cache_retention: Duration,

    /// Minimum spacing between successive change polls.
    pub poll_interval: Duration,

    /// Initial backoff after a failed change poll.
    pub poll_backoff_base: Duration,

    /// Backoff ceiling for failed change polls.
    pub poll_backoff_max: Duration,

    /// Period of the background eviction sweep.
    pub sweep_interval: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            authority_id: generate_authority_id(),
            user_freshness: Duration::from_secs(DEFAULT_USER_FRESHNESS_SECONDS),
            cache_retention: Duration::from_secs(DEFAULT_CACHE_RETENTION_SECONDS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            poll_backoff_base: Duration::from_millis(DEFAULT_POLL_BACKOFF_BASE_MS),
            poll_backoff_max: Duration::from_millis(DEFAULT_POLL_BACKOFF_MAX_MS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECONDS),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let user_freshness = Duration::from_secs(parse_positive(
            vars,
            "CA_USER_FRESHNESS_SECONDS",
            DEFAULT_USER_FRESHNESS_SECONDS,
        )?);

        let cache_retention = Duration::from_secs(parse_positive(
            vars,
            "CA_CACHE_RETENTION_SECONDS",
            DEFAULT_CACHE_RETENTION_SECONDS,
        )?);

        let poll_interval = Duration::from_millis(parse_positive(
            vars,
            "CA_POLL_INTERVAL_MS",
            DEFAULT_POLL_INTERVAL_MS,
        )?);

        let poll_backoff_base = Duration::from_millis(parse_positive(
            vars,
            "CA_POLL_BACKOFF_BASE_MS",
            DEFAULT_POLL_BACKOFF_BASE_MS,
        )?);

        let poll_backoff_max = Duration::from_millis(parse_positive(
            vars,
            "CA_POLL_BACKOFF_MAX_MS",
            DEFAULT_POLL_BACKOFF_MAX_MS,
        )?);

        if poll_backoff_max < poll_backoff_base {
            return Err(ConfigError::InvalidValue(
                "CA_POLL_BACKOFF_MAX_MS must be >= CA_POLL_BACKOFF_BASE_MS".to_string(),
            ));
        }

        let sweep_interval = Duration::from_secs(parse_positive(
            vars,
            "CA_SWEEP_INTERVAL_SECONDS",
            DEFAULT_SWEEP_INTERVAL_SECONDS,
        )?);

        let authority_id = vars
            .get("CA_ID")
            .cloned()
            .unwrap_or_else(generate_authority_id);

        Ok(Config {
            authority_id,
            user_freshness,
            cache_retention,
            poll_interval,
            poll_backoff_base,
            poll_backoff_max,
            sweep_interval,
        })
    }
}

/// Parse an optional positive integer variable, using `default` when unset.
fn parse_positive(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    let Some(raw) = vars.get(name) else {
        return Ok(default);
    };

    match raw.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::InvalidValue(format!("{name} must be positive"))),
        Ok(value) => Ok(value),
        Err(e) => Err(ConfigError::InvalidValue(format!("{name}: {e}"))),
    }
}

fn generate_authority_id() -> String {
    let hostname = env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
    let uuid_suffix = uuid::Uuid::new_v4().to_string();
    let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
    format!("{DEFAULT_CA_ID_PREFIX}-{hostname}-{short_suffix}")
}
