//! Lockstep client
//!
//! Launches mpv on the given media file and keeps it in step with the
//! other viewers through a Lockstep coordinator.
//!
//! ```text
//! LOCKSTEP_SERVER=watch.example.net:4042 lockstep-client movie.mkv
//! ```
//!
//! # Startup Flow
//!
//! 1. Initialize tracing
//! 2. Load configuration from environment
//! 3. Launch the player paused on the media file
//! 4. Run the session until the player exits, Ctrl+C or SIGTERM

#![warn(clippy::pedantic)]

use common::config::ObservabilityConfig;
use common::observability::init_tracing;
use lockstep_client::config::Config;
use lockstep_client::errors::ClientError;
use lockstep_client::mpv::MpvPlayer;
use lockstep_client::runtime::SessionActor;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let vars: HashMap<String, String> = std::env::vars().collect();
    init_tracing(&ObservabilityConfig::from_vars(
        &vars,
        "lockstep_client=info,lockstep=info",
    ));

    let media = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .ok_or_else(|| {
            error!("Usage: lockstep-client <media-file>");
            ClientError::MissingMediaFile
        })?;

    let config = Config::from_vars(&vars).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        ClientError::from(e)
    })?;

    info!(
        server = %config.server_address,
        peer_id = %config.peer_id,
        media = %media.display(),
        heartbeat_interval_ms = config.heartbeat_interval.as_millis(),
        heartbeat_timeout_ms = config.heartbeat_timeout.as_millis(),
        send_timeout_ms = config.send_timeout.as_millis(),
        "Configuration loaded successfully"
    );

    let player = MpvPlayer::launch(&config.player_binary, &media, &config.runtime_dir)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to start player");
            e
        })?;

    let shutdown_token = CancellationToken::new();
    let mut client_task = tokio::spawn(SessionActor::run(config, player, shutdown_token.clone()));

    let result = tokio::select! {
        joined = &mut client_task => joined,
        () = shutdown_signal() => {
            info!("Shutdown signal received, leaving the session...");
            shutdown_token.cancel();
            client_task.await
        }
    };

    match result {
        Ok(Ok(())) => {
            info!("Client shutdown complete");
            Ok(())
        }
        Ok(Err(e)) => {
            error!(error = %e, "Client stopped");
            Err(e.into())
        }
        Err(e) => {
            error!(error = %e, "Client task failed");
            Err(e.into())
        }
    }
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
