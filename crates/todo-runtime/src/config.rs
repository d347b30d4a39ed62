//! # Runtime Configuration
//!
//! Everything the runtime reads from the environment. Unset variables fall
//! back to defaults; set but unparsable ones are errors.

use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use todo_rpc_client::ClientConfig;
use todo_telemetry::TelemetryConfig;
use todo_worker::{WorkerConfig, MAX_PREFETCH};

pub const RPC_TIMEOUT_ENV: &str = "TODO_RPC_TIMEOUT_MS";
pub const MAX_RETRIES_ENV: &str = "TODO_MAX_RETRIES";
pub const PREFETCH_ENV: &str = "TODO_WORKER_PREFETCH";

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{key} has invalid value '{value}': {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("{key} must be greater than zero")]
    MustBePositive { key: &'static str },

    #[error("{key} must not exceed {max}")]
    TooLarge { key: &'static str, max: usize },
}

/// Complete runtime configuration.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    pub client: ClientConfig,
    pub worker: WorkerConfig,
    pub telemetry: TelemetryConfig,
}

impl RuntimeConfig {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = env::vars().collect();
        let mut config = Self::from_lookup(|key| vars.get(key).cloned())?;
        config.telemetry = TelemetryConfig::from_env();
        Ok(config)
    }

    /// Load the client and worker settings through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ms) = parse_var::<u64, _>(&lookup, RPC_TIMEOUT_ENV)? {
            if ms == 0 {
                return Err(ConfigError::MustBePositive {
                    key: RPC_TIMEOUT_ENV,
                });
            }
            config.client = config
                .client
                .with_default_timeout(Duration::from_millis(ms));
        }

        if let Some(max_retries) = parse_var::<u32, _>(&lookup, MAX_RETRIES_ENV)? {
            config.worker = config.worker.with_max_retries(max_retries);
        }

        if let Some(prefetch) = parse_var::<usize, _>(&lookup, PREFETCH_ENV)? {
            if prefetch == 0 {
                return Err(ConfigError::MustBePositive { key: PREFETCH_ENV });
            }
            if prefetch > MAX_PREFETCH {
                return Err(ConfigError::TooLarge {
                    key: PREFETCH_ENV,
                    max: MAX_PREFETCH,
                });
            }
            config.worker = config.worker.with_prefetch(prefetch);
        }

        Ok(config)
    }
}

fn parse_var<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        })
}
