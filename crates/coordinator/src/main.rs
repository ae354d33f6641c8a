//! Lockstep coordinator
//!
//! Single-session synchronization server. Listens on one TCP address
//! (default: 0.0.0.0:4042) and speaks newline-delimited JSON events.
//!
//! # Startup Flow
//!
//! 1. Initialize tracing
//! 2. Load configuration from environment
//! 3. Bind the listen socket (fail fast on bind errors)
//! 4. Serve until Ctrl+C or SIGTERM

#![warn(clippy::pedantic)]

use common::config::ObservabilityConfig;
use common::observability::init_tracing;
use lockstep_coordinator::config::Config;
use lockstep_coordinator::server;
use std::collections::HashMap;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let vars: HashMap<String, String> = std::env::vars().collect();
    init_tracing(&ObservabilityConfig::from_vars(
        &vars,
        "lockstep_coordinator=info,lockstep=info",
    ));

    info!("Starting Lockstep coordinator");

    let config = Config::from_vars(&vars).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        max_desync_seconds = config.max_desync_seconds,
        heartbeat_interval_ms = config.heartbeat_interval.as_millis(),
        heartbeat_timeout_ms = config.heartbeat_timeout.as_millis(),
        heartbeat_policy = %config.heartbeat_policy,
        "Configuration loaded successfully"
    );

    let listener = server::bind(&config.bind_address).await.map_err(|e| {
        error!(error = %e, "Failed to bind listen socket");
        e
    })?;

    let shutdown_token = CancellationToken::new();
    let server_task = tokio::spawn(server::serve(listener, config, shutdown_token.clone()));

    info!("Coordinator running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, closing peer connections...");
    shutdown_token.cancel();

    if let Err(e) = server_task.await {
        error!(error = %e, "Server task failed");
    }

    info!("Coordinator shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. Without them the process
/// cannot shut down gracefully.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
