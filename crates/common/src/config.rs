//! Common configuration types for Lockstep components.
//!
//! Both binaries are configured from environment variables only. Each
//! service builds its own `Config` from a `HashMap` so tests never touch the
//! process environment; the helpers here keep the parsing rules identical.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while building a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Filter directive used when `RUST_LOG` is not set
    pub default_filter: String,
    /// Enable JSON-formatted logs
    pub json_logs: bool,
}

impl ObservabilityConfig {
    /// Read `LOCKSTEP_LOG_JSON` from `vars`; `default_filter` is service specific.
    #[must_use]
    pub fn from_vars(vars: &HashMap<String, String>, default_filter: &str) -> Self {
        let json_logs = vars
            .get("LOCKSTEP_LOG_JSON")
            .is_some_and(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"));

        Self {
            default_filter: default_filter.to_string(),
            json_logs,
        }
    }
}

/// Fetch a required variable.
///
/// # Errors
///
/// Returns [`ConfigError::MissingEnvVar`] if the variable is absent or blank.
pub fn required(vars: &HashMap<String, String>, key: &str) -> Result<String, ConfigError> {
    vars.get(key)
        .filter(|v| !v.trim().is_empty())
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

/// Parse an optional variable, falling back to `default` when absent.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidValue`] if the variable is present but does
/// not parse as `T`.
pub fn parse_or<T: FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key}={raw}"))),
    }
}

/// Parse an optional millisecond duration, rejecting zero.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidValue`] for non-numeric or zero values.
pub fn millis_or(
    vars: &HashMap<String, String>,
    key: &str,
    default_ms: u64,
) -> Result<Duration, ConfigError> {
    let ms: u64 = parse_or(vars, key, default_ms)?;
    if ms == 0 {
        return Err(ConfigError::InvalidValue(format!("{key} must be > 0")));
    }
    Ok(Duration::from_millis(ms))
}
