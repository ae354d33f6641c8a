//! TCP front end: accept loop and per-connection reader tasks.
//!
//! Each accepted socket gets one reader task (this module) and, once its
//! `Hello` is accepted, one [`ConnectionActor`] owning the write half. The
//! two share a cancellation token, so a failed write, an overflowing queue
//! or a replacing reconnect all end the reader too. The reader always
//! finishes by reporting `Disconnected`, which the coordinator ignores if the
//! connection was already displaced.

use crate::actors::{ConnectionActor, ConnectionHandle, CoordinatorActor, CoordinatorHandle};
use crate::config::Config;
use crate::errors::CoordinatorError;
use crate::observability::metrics;
use crate::tasks::{run_desync_monitor, run_heartbeat_monitor};

use common::types::{ConnectionId, PeerId};
use futures::StreamExt;
use std::net::SocketAddr;
use sync_protocol::{CodecError, Event, EventCodec};
use tokio::io::AsyncRead;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Bind the listen socket.
///
/// # Errors
///
/// Returns [`CoordinatorError::Bind`] if the address is invalid or in use.
pub async fn bind(address: &str) -> Result<TcpListener, CoordinatorError> {
    TcpListener::bind(address)
        .await
        .map_err(|source| CoordinatorError::Bind {
            address: address.to_string(),
            source,
        })
}

/// Run the coordinator on an already bound listener until `cancel_token`
/// fires.
///
/// Spawns the coordinator actor and both monitors, then accepts
/// connections. On cancellation every peer connection is closed.
pub async fn serve(listener: TcpListener, config: Config, cancel_token: CancellationToken) {
    let (coordinator, actor_task) =
        CoordinatorActor::spawn(config.heartbeat_policy, cancel_token.child_token());

    tokio::spawn(run_heartbeat_monitor(
        coordinator.clone(),
        config.heartbeat_interval,
        config.heartbeat_timeout,
        coordinator.child_token(),
    ));
    tokio::spawn(run_desync_monitor(
        coordinator.clone(),
        config.desync_check_interval,
        config.max_desync_seconds,
        coordinator.child_token(),
    ));

    match listener.local_addr() {
        Ok(addr) => info!(target: "lockstep.coordinator", addr = %addr, "Accepting connections"),
        Err(e) => warn!(target: "lockstep.coordinator", error = %e, "Listener has no local address"),
    }

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!(target: "lockstep.coordinator", "Accept loop received shutdown signal");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(target: "lockstep.connection", error = %e, "Failed to set TCP_NODELAY");
                        }
                        tokio::spawn(handle_connection(
                            stream,
                            addr,
                            coordinator.clone(),
                            config.clone(),
                        ));
                    }
                    Err(e) => {
                        warn!(target: "lockstep.coordinator", error = %e, "Accept failed");
                    }
                }
            }
        }
    }

    coordinator.cancel();
    if let Err(e) = actor_task.await {
        error!(target: "lockstep.coordinator", error = %e, "CoordinatorActor task failed");
    }
}

/// Serve one connection from handshake to disconnect.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    coordinator: CoordinatorHandle,
    config: Config,
) {
    let connection_id = ConnectionId::new();
    let (read_half, write_half) = stream.into_split();
    let mut reader = FramedRead::new(read_half, EventCodec::new());
    let cancel_token = coordinator.child_token();

    debug!(
        target: "lockstep.connection",
        connection_id = %connection_id,
        remote_addr = %addr,
        "Connection accepted"
    );

    let hello = tokio::select! {
        () = cancel_token.cancelled() => return,
        result = tokio::time::timeout(config.hello_timeout, await_hello(&mut reader)) => result,
    };

    let peer_id = match hello {
        Ok(Ok(peer_id)) => peer_id,
        Ok(Err(rejection)) => {
            if let Some(kind) = rejection.violation() {
                metrics::record_protocol_violation(kind);
            }
            info!(
                target: "lockstep.connection",
                connection_id = %connection_id,
                remote_addr = %addr,
                reason = %rejection,
                "Connection closed before registration"
            );
            return;
        }
        Err(_) => {
            metrics::record_protocol_violation("hello_timeout");
            info!(
                target: "lockstep.connection",
                connection_id = %connection_id,
                remote_addr = %addr,
                timeout_ms = config.hello_timeout.as_millis(),
                "No Hello within timeout, closing connection"
            );
            return;
        }
    };

    let (connection, _writer_task) = ConnectionActor::spawn(
        connection_id,
        peer_id.clone(),
        write_half,
        config.send_timeout,
        config.outbound_queue,
        cancel_token.clone(),
    );

    if coordinator
        .register(peer_id.clone(), connection.clone())
        .await
        .is_err()
    {
        connection.close("coordinator unavailable");
        return;
    }

    read_loop(&mut reader, &peer_id, &connection, &coordinator, &cancel_token).await;

    connection.close("reader finished");
    let _ = coordinator.disconnected(peer_id, connection_id).await;
}

/// Why a connection never got registered.
#[derive(Debug, thiserror::Error)]
enum HelloRejection {
    #[error("closed before Hello")]
    Closed,
    #[error("transport failure before Hello: {0}")]
    Transport(CodecError),
    #[error("Hello carries an empty peer id")]
    EmptyPeerId,
    #[error("first message was {0}, expected hello")]
    NotHello(&'static str),
}

impl HelloRejection {
    /// Metric label, for rejections the peer caused on purpose.
    fn violation(&self) -> Option<&'static str> {
        match self {
            HelloRejection::EmptyPeerId => Some("empty_peer_id"),
            HelloRejection::NotHello(_) => Some("hello_expected"),
            HelloRejection::Closed | HelloRejection::Transport(_) => None,
        }
    }
}

/// Wait for the first well-formed message, which must be a `Hello`.
///
/// Lines that fail to decode are skipped, except a `Hello` with an empty id.
async fn await_hello<R>(
    reader: &mut FramedRead<R, EventCodec>,
) -> Result<PeerId, HelloRejection>
where
    R: AsyncRead + Unpin,
{
    loop {
        match reader.next().await {
            None => return Err(HelloRejection::Closed),
            Some(Err(e)) => return Err(HelloRejection::Transport(e)),
            Some(Ok(Ok(Event::Hello { peer_id }))) => return Ok(peer_id),
            Some(Ok(Ok(other))) => return Err(HelloRejection::NotHello(other.kind())),
            Some(Ok(Err(CodecError::EmptyPeerId))) => return Err(HelloRejection::EmptyPeerId),
            Some(Ok(Err(e))) => {
                debug!(target: "lockstep.connection", error = %e, "Skipping malformed line before Hello");
            }
        }
    }
}

/// Forward a registered peer's messages until the connection ends.
async fn read_loop<R>(
    reader: &mut FramedRead<R, EventCodec>,
    peer_id: &PeerId,
    connection: &ConnectionHandle,
    coordinator: &CoordinatorHandle,
    cancel_token: &CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let connection_id = connection.connection_id();

    loop {
        let frame = tokio::select! {
            () = cancel_token.cancelled() => return,
            frame = reader.next() => frame,
        };

        let event = match frame {
            None => {
                debug!(target: "lockstep.connection", peer_id = %peer_id, "Peer closed the connection");
                return;
            }
            Some(Err(e)) => {
                info!(
                    target: "lockstep.connection",
                    peer_id = %peer_id,
                    connection_id = %connection_id,
                    error = %e,
                    "Transport failure"
                );
                return;
            }
            Some(Ok(Err(e))) => {
                warn!(
                    target: "lockstep.connection",
                    peer_id = %peer_id,
                    error = %e,
                    "Skipping malformed message"
                );
                continue;
            }
            Some(Ok(Ok(event))) => event,
        };

        let peer = peer_id.clone();
        let forwarded = match event {
            Event::Hello { .. } => {
                metrics::record_protocol_violation("duplicate_hello");
                warn!(
                    target: "lockstep.connection",
                    peer_id = %peer_id,
                    connection_id = %connection_id,
                    "Second Hello on one connection, closing"
                );
                return;
            }
            Event::ReadyChanged { ready } => {
                coordinator.ready_changed(peer, connection_id, ready).await
            }
            Event::PositionReport { position } => {
                coordinator
                    .position_report(peer, connection_id, position)
                    .await
            }
            Event::SeekRequest { position } => coordinator.seek(peer, connection_id, position).await,
            Event::SpeedChange { speed } => {
                coordinator.speed_change(peer, connection_id, speed).await
            }
            Event::Pong { nonce } => coordinator.heartbeat_ack(peer, connection_id, nonce).await,
            Event::Ping { nonce } => {
                if let Err(e) = connection.try_send(Event::Pong { nonce }) {
                    debug!(target: "lockstep.connection", peer_id = %peer_id, error = %e, "Pong not queued");
                }
                Ok(())
            }
            Event::PlaybackGate { .. } => {
                debug!(
                    target: "lockstep.connection",
                    peer_id = %peer_id,
                    "Ignoring PlaybackGate sent by a client"
                );
                Ok(())
            }
        };

        if forwarded.is_err() {
            return;
        }
    }
}
