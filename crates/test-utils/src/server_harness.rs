//! Test server harness for end-to-end tests.
//!
//! Provides `TestCoordinator` for running a real coordinator in-process.

use lockstep_coordinator::config::Config;
use lockstep_coordinator::server;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Test harness for spawning a coordinator in integration tests.
///
/// # Example
/// ```rust,ignore
/// let coordinator = TestCoordinator::spawn().await?;
/// let peer = TestPeer::join(coordinator.addr(), "alice").await?;
/// ```
pub struct TestCoordinator {
    addr: SocketAddr,
    config: Config,
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

impl TestCoordinator {
    /// Spawn a coordinator with [`test_config`].
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with(test_config()).await
    }

    /// Spawn a coordinator with the given configuration.
    ///
    /// The bind address is always replaced with `127.0.0.1:0`.
    pub async fn spawn_with(mut config: Config) -> Result<Self, anyhow::Error> {
        config.bind_address = "127.0.0.1:0".to_string();

        let listener = server::bind(&config.bind_address)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test coordinator: {}", e))?;
        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(server::serve(listener, config.clone(), cancel_token.clone()));

        Ok(Self {
            addr,
            config,
            cancel_token,
            handle,
        })
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get reference to the coordinator configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shut down gracefully and wait for every peer connection to close.
    pub async fn shutdown(mut self) {
        self.cancel_token.cancel();
        let _ = (&mut self.handle).await;
    }
}

impl Drop for TestCoordinator {
    fn drop(&mut self) {
        self.cancel_token.cancel();
        self.handle.abort();
    }
}

/// Coordinator configuration with timings short enough for tests.
///
/// Heartbeats every 50ms with a 300ms timeout, desync checks every 50ms.
pub fn test_config() -> Config {
    Config {
        desync_check_interval: Duration::from_millis(50),
        heartbeat_interval: Duration::from_millis(50),
        heartbeat_timeout: Duration::from_millis(300),
        hello_timeout: Duration::from_millis(500),
        ..Config::default()
    }
}
