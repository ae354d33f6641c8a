//! `TransportActor` - the client's connection to the coordinator.
//!
//! Dials, sends `Hello`, reports `Connected` to the session, then pumps
//! decoded events into the session and queued events onto the socket. Any
//! failure, or a reconnect request, reports `Disconnected`, waits the fixed
//! reconnect delay and dials again. It never gives up; only cancellation
//! stops it.
//!
//! Events queued while disconnected are dropped.

use crate::config::Config;
use crate::errors::ClientError;
use crate::session::SessionInput;

use common::types::PeerId;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use sync_protocol::{Event, EventCodec};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Outbound queue capacity.
const TRANSPORT_CHANNEL_BUFFER: usize = 256;

/// Work for the transport.
#[derive(Debug)]
pub enum TransportCommand {
    Send(Event),
    /// Drop the current connection and dial again.
    Reconnect,
}

/// Handle to the `TransportActor`.
#[derive(Clone, Debug)]
pub struct TransportHandle {
    sender: mpsc::Sender<TransportCommand>,
    cancel_token: CancellationToken,
}

impl TransportHandle {
    /// Queue an event. Dropped if the queue is full or the actor is gone.
    pub fn send(&self, event: Event) {
        self.enqueue(TransportCommand::Send(event));
    }

    /// Ask for a fresh connection.
    pub fn reconnect(&self) {
        self.enqueue(TransportCommand::Reconnect);
    }

    /// Stop the actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    fn enqueue(&self, command: TransportCommand) {
        match self.sender.try_send(command) {
            Ok(()) => {}
            Err(TrySendError::Full(command)) => {
                debug!(target: "lockstep.client.transport", command = ?command, "Outbound queue full, dropping");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(target: "lockstep.client.transport", "Transport stopped, dropping");
            }
        }
    }
}

/// How one connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionEnd {
    Reconnect,
    Shutdown,
}

/// The `TransportActor` implementation.
pub struct TransportActor {
    server_address: String,
    peer_id: PeerId,
    connect_timeout: Duration,
    reconnect_delay: Duration,
    /// Upper bound for one socket write.
    send_timeout: Duration,
    receiver: mpsc::Receiver<TransportCommand>,
    session: mpsc::Sender<SessionInput>,
    cancel_token: CancellationToken,
    connections: u64,
}

impl TransportActor {
    /// Spawn the transport actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        config: &Config,
        session: mpsc::Sender<SessionInput>,
        cancel_token: CancellationToken,
    ) -> (TransportHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(TRANSPORT_CHANNEL_BUFFER);

        let actor = Self {
            server_address: config.server_address.clone(),
            peer_id: config.peer_id.clone(),
            connect_timeout: config.connect_timeout,
            reconnect_delay: config.reconnect_delay,
            send_timeout: config.send_timeout,
            receiver,
            session,
            cancel_token: cancel_token.clone(),
            connections: 0,
        };

        let task_handle = tokio::spawn(actor.run());
        let handle = TransportHandle {
            sender,
            cancel_token,
        };

        (handle, task_handle)
    }

    #[instrument(
        skip_all,
        name = "lockstep.client.transport",
        fields(server = %self.server_address, peer_id = %self.peer_id)
    )]
    async fn run(mut self) {
        info!(target: "lockstep.client.transport", "TransportActor started");

        while !self.cancel_token.is_cancelled() {
            let dial = tokio::select! {
                () = self.cancel_token.cancelled() => break,
                dial = tokio::time::timeout(
                    self.connect_timeout,
                    TcpStream::connect(self.server_address.as_str()),
                ) => dial,
            };

            match dial {
                Ok(Ok(stream)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(target: "lockstep.client.transport", error = %e, "Failed to set TCP_NODELAY");
                    }
                    match self.serve_connection(stream).await {
                        Ok(ConnectionEnd::Reconnect) => {}
                        Ok(ConnectionEnd::Shutdown) => break,
                        Err(e) => {
                            warn!(target: "lockstep.client.transport", error = %e, "Connection lost");
                        }
                    }
                    if self.session.send(SessionInput::Disconnected).await.is_err() {
                        break;
                    }
                }
                Ok(Err(e)) => {
                    warn!(target: "lockstep.client.transport", error = %e, "Connect failed");
                }
                Err(_) => {
                    warn!(
                        target: "lockstep.client.transport",
                        timeout_ms = self.connect_timeout.as_millis(),
                        "Connect timed out"
                    );
                }
            }

            self.discard_queued();
            tokio::select! {
                () = self.cancel_token.cancelled() => break,
                () = tokio::time::sleep(self.reconnect_delay) => {}
            }
            debug!(target: "lockstep.client.transport", "Reconnecting");
        }

        info!(
            target: "lockstep.client.transport",
            connections = self.connections,
            "TransportActor stopped"
        );
    }

    /// Run one connection until it fails or is told to end.
    async fn serve_connection(&mut self, stream: TcpStream) -> Result<ConnectionEnd, ClientError> {
        let (read_half, write_half) = stream.into_split();
        let mut reader = FramedRead::new(read_half, EventCodec::new());
        let mut writer = FramedWrite::new(write_half, EventCodec::new());

        self.write(
            &mut writer,
            Event::Hello {
                peer_id: self.peer_id.clone(),
            },
        )
        .await?;

        self.connections += 1;
        info!(target: "lockstep.client.transport", "Connected");

        self.discard_queued();
        if self.session.send(SessionInput::Connected).await.is_err() {
            return Ok(ConnectionEnd::Shutdown);
        }

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => return Ok(ConnectionEnd::Shutdown),

                frame = reader.next() => match frame {
                    None => {
                        return Err(ClientError::Connect("coordinator closed the connection".to_string()));
                    }
                    Some(Err(e)) => return Err(e.into()),
                    Some(Ok(Err(e))) => {
                        warn!(target: "lockstep.client.transport", error = %e, "Skipping malformed message");
                    }
                    Some(Ok(Ok(event))) => {
                        if self.session.send(SessionInput::Remote(event)).await.is_err() {
                            return Ok(ConnectionEnd::Shutdown);
                        }
                    }
                },

                command = self.receiver.recv() => match command {
                    None => return Ok(ConnectionEnd::Shutdown),
                    Some(TransportCommand::Reconnect) => {
                        info!(target: "lockstep.client.transport", "Reconnect requested");
                        return Ok(ConnectionEnd::Reconnect);
                    }
                    Some(TransportCommand::Send(event)) => self.write(&mut writer, event).await?,
                },
            }
        }
    }

    async fn write(
        &self,
        writer: &mut FramedWrite<tokio::net::tcp::OwnedWriteHalf, EventCodec>,
        event: Event,
    ) -> Result<(), ClientError> {
        let kind = event.kind();
        match tokio::time::timeout(self.send_timeout, writer.send(event)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if !e.is_fatal() => {
                warn!(target: "lockstep.client.transport", kind, error = %e, "Dropping unencodable event");
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(ClientError::Connect(format!(
                "write of {kind} timed out after {:?}",
                self.send_timeout
            ))),
        }
    }

    fn discard_queued(&mut self) {
        let mut dropped = 0_usize;
        while let Ok(command) = self.receiver.try_recv() {
            if matches!(command, TransportCommand::Send(_)) {
                dropped += 1;
            }
        }
        if dropped > 0 {
            debug!(target: "lockstep.client.transport", dropped, "Dropped events queued while disconnected");
        }
    }
}
