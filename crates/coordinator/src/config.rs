//! Coordinator configuration.
//!
//! Configuration is loaded from environment variables. Every value has a
//! default; the binary runs with an empty environment.

use common::config::{millis_or, parse_or, ConfigError};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default listen address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:4042";

/// Default maximum position divergence between two peers, in seconds.
pub const DEFAULT_MAX_DESYNC_SECONDS: f64 = 5.0;

/// Default desync monitor period in milliseconds.
pub const DEFAULT_DESYNC_CHECK_INTERVAL_MS: u64 = 1_000;

/// Default ping period in milliseconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 500;

/// Default pong timeout in milliseconds.
pub const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 1_500;

/// Default time a new connection has to send its `Hello`.
pub const DEFAULT_HELLO_TIMEOUT_MS: u64 = 10_000;

/// Default per-write timeout for a peer's sender task.
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 2_000;

/// Default capacity of each peer's outbound queue.
pub const DEFAULT_OUTBOUND_QUEUE: usize = 64;

/// What happens to a peer that stops answering pings.
///
/// Both policies broadcast a stop to the remaining peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeartbeatPolicy {
    /// Close the connection and remove the peer.
    #[default]
    Evict,
    /// Keep the peer registered but clear its ready flag.
    MarkUnready,
}

impl HeartbeatPolicy {
    /// Returns the policy name for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            HeartbeatPolicy::Evict => "evict",
            HeartbeatPolicy::MarkUnready => "mark-unready",
        }
    }
}

impl fmt::Display for HeartbeatPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HeartbeatPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "evict" => Ok(HeartbeatPolicy::Evict),
            "mark-unready" | "mark_unready" => Ok(HeartbeatPolicy::MarkUnready),
            other => Err(ConfigError::InvalidValue(format!(
                "LOCKSTEP_HEARTBEAT_POLICY={other} (expected evict or mark-unready)"
            ))),
        }
    }
}

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address (default: "0.0.0.0:4042").
    pub bind_address: String,

    /// Desync threshold D in seconds.
    pub max_desync_seconds: f64,

    /// Desync monitor period.
    pub desync_check_interval: Duration,

    /// Ping period.
    pub heartbeat_interval: Duration,

    /// How long a ping may stay unanswered.
    pub heartbeat_timeout: Duration,

    /// Applied to peers whose pings time out.
    pub heartbeat_policy: HeartbeatPolicy,

    /// Deadline for the first message on a new connection.
    pub hello_timeout: Duration,

    /// Per-write timeout in a peer's sender task.
    pub send_timeout: Duration,

    /// Capacity of each peer's outbound queue.
    pub outbound_queue: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            max_desync_seconds: DEFAULT_MAX_DESYNC_SECONDS,
            desync_check_interval: Duration::from_millis(DEFAULT_DESYNC_CHECK_INTERVAL_MS),
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            heartbeat_timeout: Duration::from_millis(DEFAULT_HEARTBEAT_TIMEOUT_MS),
            heartbeat_policy: HeartbeatPolicy::default(),
            hello_timeout: Duration::from_millis(DEFAULT_HELLO_TIMEOUT_MS),
            send_timeout: Duration::from_millis(DEFAULT_SEND_TIMEOUT_MS),
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a variable is present but invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a variable is present but invalid.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("LOCKSTEP_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let max_desync_seconds: f64 =
            parse_or(vars, "LOCKSTEP_MAX_DESYNC_SECONDS", DEFAULT_MAX_DESYNC_SECONDS)?;
        if !max_desync_seconds.is_finite() || max_desync_seconds <= 0.0 {
            return Err(ConfigError::InvalidValue(format!(
                "LOCKSTEP_MAX_DESYNC_SECONDS must be > 0, got {max_desync_seconds}"
            )));
        }

        let heartbeat_interval = millis_or(
            vars,
            "LOCKSTEP_HEARTBEAT_INTERVAL_MS",
            DEFAULT_HEARTBEAT_INTERVAL_MS,
        )?;
        let heartbeat_timeout = millis_or(
            vars,
            "LOCKSTEP_HEARTBEAT_TIMEOUT_MS",
            DEFAULT_HEARTBEAT_TIMEOUT_MS,
        )?;

        let heartbeat_policy = match vars.get("LOCKSTEP_HEARTBEAT_POLICY") {
            Some(raw) => raw.parse()?,
            None => HeartbeatPolicy::default(),
        };

        let outbound_queue: usize =
            parse_or(vars, "LOCKSTEP_OUTBOUND_QUEUE", DEFAULT_OUTBOUND_QUEUE)?;
        if outbound_queue == 0 {
            return Err(ConfigError::InvalidValue(
                "LOCKSTEP_OUTBOUND_QUEUE must be > 0".to_string(),
            ));
        }

        Ok(Config {
            bind_address,
            max_desync_seconds,
            desync_check_interval: millis_or(
                vars,
                "LOCKSTEP_DESYNC_CHECK_INTERVAL_MS",
                DEFAULT_DESYNC_CHECK_INTERVAL_MS,
            )?,
            heartbeat_interval,
            heartbeat_timeout,
            heartbeat_policy,
            hello_timeout: millis_or(vars, "LOCKSTEP_HELLO_TIMEOUT_MS", DEFAULT_HELLO_TIMEOUT_MS)?,
            send_timeout: millis_or(vars, "LOCKSTEP_SEND_TIMEOUT_MS", DEFAULT_SEND_TIMEOUT_MS)?,
            outbound_queue,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::from_vars(&HashMap::new()).unwrap();

        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert!((config.max_desync_seconds - DEFAULT_MAX_DESYNC_SECONDS).abs() < f64::EPSILON);
        assert_eq!(config.heartbeat_interval, Duration::from_millis(500));
        assert_eq!(config.heartbeat_timeout, Duration::from_millis(1_500));
        assert_eq!(config.heartbeat_policy, HeartbeatPolicy::Evict);
        assert_eq!(config.outbound_queue, DEFAULT_OUTBOUND_QUEUE);
    }

    #[test]
    fn test_config_overrides() {
        let config = Config::from_vars(&vars(&[
            ("LOCKSTEP_BIND_ADDRESS", "127.0.0.1:9000"),
            ("LOCKSTEP_MAX_DESYNC_SECONDS", "2.5"),
            ("LOCKSTEP_HEARTBEAT_POLICY", "mark-unready"),
            ("LOCKSTEP_HEARTBEAT_TIMEOUT_MS", "3000"),
            ("LOCKSTEP_OUTBOUND_QUEUE", "8"),
        ]))
        .unwrap();

        assert_eq!(config.bind_address, "127.0.0.1:9000");
        assert!((config.max_desync_seconds - 2.5).abs() < f64::EPSILON);
        assert_eq!(config.heartbeat_policy, HeartbeatPolicy::MarkUnready);
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(3));
        assert_eq!(config.outbound_queue, 8);
    }

    #[test]
    fn test_config_rejects_invalid_values() {
        for (key, value) in [
            ("LOCKSTEP_MAX_DESYNC_SECONDS", "-1"),
            ("LOCKSTEP_MAX_DESYNC_SECONDS", "soon"),
            ("LOCKSTEP_HEARTBEAT_POLICY", "ignore"),
            ("LOCKSTEP_HEARTBEAT_INTERVAL_MS", "0"),
            ("LOCKSTEP_OUTBOUND_QUEUE", "0"),
        ] {
            let result = Config::from_vars(&vars(&[(key, value)]));
            assert!(
                matches!(result, Err(ConfigError::InvalidValue(_))),
                "{key}={value} should be rejected"
            );
        }
    }
}
