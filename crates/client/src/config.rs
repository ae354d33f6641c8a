//! Client configuration.
//!
//! Configuration is loaded from environment variables. Only
//! `LOCKSTEP_SERVER` is required. The media file comes from the command line,
//! not from here.

use common::config::{millis_or, required, ConfigError};
use common::types::PeerId;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default delay between reconnect attempts in milliseconds.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1_000;

/// Default dial timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Default ping and position report period in milliseconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 500;

/// Default time a ping may stay unanswered in milliseconds.
pub const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 1_500;

/// Default bound for writing one event to the coordinator in milliseconds.
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 2_000;

/// Default player executable.
pub const DEFAULT_PLAYER_BINARY: &str = "mpv";

/// Fallback directory for the player IPC socket.
pub const DEFAULT_RUNTIME_DIR: &str = "/tmp";

/// Client configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Coordinator address, `host:port`.
    pub server_address: String,

    /// Identity sent in `Hello`.
    pub peer_id: PeerId,

    /// Fixed delay before each reconnect attempt.
    pub reconnect_delay: Duration,

    /// Dial timeout.
    pub connect_timeout: Duration,

    /// Ping and position report period.
    pub heartbeat_interval: Duration,

    /// How long a ping may stay unanswered before reconnecting.
    pub heartbeat_timeout: Duration,

    /// Upper bound for one outbound write.
    pub send_timeout: Duration,

    /// Player executable.
    pub player_binary: String,

    /// Directory for the player IPC socket.
    pub runtime_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `LOCKSTEP_SERVER` is missing,
    /// or `ConfigError::InvalidValue` if a variable is present but invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Same as [`Config::from_env`].
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let server_address = required(vars, "LOCKSTEP_SERVER")?;

        let peer_id = match vars.get("LOCKSTEP_PEER_ID") {
            Some(raw) => PeerId::parse(raw.trim()).map_err(|e| {
                ConfigError::InvalidValue(format!("LOCKSTEP_PEER_ID: {e}"))
            })?,
            None => default_peer_id(vars),
        };

        let player_binary = vars
            .get("LOCKSTEP_PLAYER_BINARY")
            .filter(|v| !v.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_PLAYER_BINARY.to_string());

        let runtime_dir = vars
            .get("LOCKSTEP_RUNTIME_DIR")
            .or_else(|| vars.get("XDG_RUNTIME_DIR"))
            .filter(|v| !v.trim().is_empty())
            .map_or_else(|| PathBuf::from(DEFAULT_RUNTIME_DIR), PathBuf::from);

        Ok(Config {
            server_address,
            peer_id,
            reconnect_delay: millis_or(
                vars,
                "LOCKSTEP_RECONNECT_DELAY_MS",
                DEFAULT_RECONNECT_DELAY_MS,
            )?,
            connect_timeout: millis_or(
                vars,
                "LOCKSTEP_CONNECT_TIMEOUT_MS",
                DEFAULT_CONNECT_TIMEOUT_MS,
            )?,
            heartbeat_interval: millis_or(
                vars,
                "LOCKSTEP_HEARTBEAT_INTERVAL_MS",
                DEFAULT_HEARTBEAT_INTERVAL_MS,
            )?,
            heartbeat_timeout: millis_or(
                vars,
                "LOCKSTEP_HEARTBEAT_TIMEOUT_MS",
                DEFAULT_HEARTBEAT_TIMEOUT_MS,
            )?,
            send_timeout: millis_or(vars, "LOCKSTEP_SEND_TIMEOUT_MS", DEFAULT_SEND_TIMEOUT_MS)?,
            player_binary,
            runtime_dir,
        })
    }
}

/// `$HOSTNAME`, else the OS hostname, else a generated `viewer-` id.
///
/// Shells rarely export `HOSTNAME`, so the OS lookup is the usual source.
fn default_peer_id(vars: &HashMap<String, String>) -> PeerId {
    peer_id_from_host(vars.get("HOSTNAME").cloned().or_else(system_hostname))
}

fn system_hostname() -> Option<String> {
    hostname::get()
        .ok()
        .map(|host| host.to_string_lossy().into_owned())
}

fn peer_id_from_host(host: Option<String>) -> PeerId {
    host.and_then(|host| PeerId::parse(host.trim()).ok())
        .unwrap_or_else(PeerId::generate)
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
    fn test_server_is_required() {
        assert!(matches!(
            Config::from_vars(&HashMap::new()),
            Err(ConfigError::MissingEnvVar(k)) if k == "LOCKSTEP_SERVER"
        ));
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::from_vars(&vars(&[
            ("LOCKSTEP_SERVER", "sync.example:4042"),
            ("HOSTNAME", "livingroom"),
        ]))
        .unwrap();

        assert_eq!(config.server_address, "sync.example:4042");
        assert_eq!(config.peer_id.as_str(), "livingroom");
        assert_eq!(config.reconnect_delay, Duration::from_secs(1));
        assert_eq!(config.heartbeat_interval, Duration::from_millis(500));
        assert_eq!(config.heartbeat_timeout, Duration::from_millis(1_500));
        assert_eq!(config.send_timeout, Duration::from_secs(2));
        assert_eq!(config.player_binary, "mpv");
        assert_eq!(config.runtime_dir, PathBuf::from("/tmp"));
    }

    #[test]
    fn test_peer_id_falls_back_to_os_hostname() {
        let config = Config::from_vars(&vars(&[("LOCKSTEP_SERVER", "s:1")])).unwrap();
        match system_hostname().and_then(|host| PeerId::parse(host.trim()).ok()) {
            Some(host) => assert_eq!(config.peer_id, host),
            None => assert!(config.peer_id.as_str().starts_with("viewer-")),
        }
    }

    #[test]
    fn test_unusable_hostname_falls_back_to_generated() {
        assert_eq!(
            peer_id_from_host(Some(" den ".to_string())).as_str(),
            "den"
        );
        for host in [None, Some("   ".to_string())] {
            assert!(peer_id_from_host(host).as_str().starts_with("viewer-"));
        }
    }

    #[test]
    fn test_config_overrides() {
        let config = Config::from_vars(&vars(&[
            ("LOCKSTEP_SERVER", "s:1"),
            ("LOCKSTEP_PEER_ID", "bob"),
            ("LOCKSTEP_RECONNECT_DELAY_MS", "250"),
            ("LOCKSTEP_SEND_TIMEOUT_MS", "750"),
            ("LOCKSTEP_PLAYER_BINARY", "/usr/local/bin/mpv"),
            ("XDG_RUNTIME_DIR", "/run/user/1000"),
        ]))
        .unwrap();

        assert_eq!(config.peer_id.as_str(), "bob");
        assert_eq!(config.reconnect_delay, Duration::from_millis(250));
        assert_eq!(config.send_timeout, Duration::from_millis(750));
        assert_eq!(config.player_binary, "/usr/local/bin/mpv");
        assert_eq!(config.runtime_dir, PathBuf::from("/run/user/1000"));
    }

    #[test]
    fn test_config_rejects_invalid_values() {
        for (key, value) in [
            ("LOCKSTEP_PEER_ID", "  "),
            ("LOCKSTEP_RECONNECT_DELAY_MS", "0"),
            ("LOCKSTEP_HEARTBEAT_TIMEOUT_MS", "soon"),
        ] {
            let result = Config::from_vars(&vars(&[("LOCKSTEP_SERVER", "s:1"), (key, value)]));
            assert!(
                matches!(result, Err(ConfigError::InvalidValue(_))),
                "{key}={value} should be rejected"
            );
        }
    }
}
