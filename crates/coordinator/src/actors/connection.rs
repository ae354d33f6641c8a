//! `ConnectionActor` - the single writer for one peer's socket.
//!
//! Each `ConnectionActor`:
//! - Owns the write half of exactly one TCP connection
//! - Drains a bounded outbound queue in FIFO order
//! - Bounds every write by the send timeout
//!
//! # Lifecycle
//!
//! 1. Spawned by the server once the connection's `Hello` is accepted
//! 2. Runs until its cancellation token fires or a write fails
//! 3. The token is shared with the connection's reader, so either side
//!    closing tears down both
//!
//! Enqueueing never blocks. A full queue means the peer cannot keep up; the
//! connection is closed and the reader reports the disconnect.

use crate::errors::CoordinatorError;

use common::types::{ConnectionId, PeerId};
use futures::SinkExt;
use std::time::Duration;
use sync_protocol::{CodecError, Event, EventCodec};
use tokio::io::AsyncWrite;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Handle to a `ConnectionActor`.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    sender: mpsc::Sender<Event>,
    cancel_token: CancellationToken,
    connection_id: ConnectionId,
}

impl ConnectionHandle {
    /// Wrap an outbound queue and the token that closes the connection.
    #[must_use]
    pub fn new(
        connection_id: ConnectionId,
        sender: mpsc::Sender<Event>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            sender,
            cancel_token,
            connection_id,
        }
    }

    /// Get the connection ID.
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Queue an event for the peer without waiting.
    ///
    /// # Errors
    ///
    /// - [`CoordinatorError::SlowPeer`] if the queue is full; the connection is
    ///   closed as a side effect
    /// - [`CoordinatorError::ConnectionClosed`] if the writer has exited
    pub fn try_send(&self, event: Event) -> Result<(), CoordinatorError> {
        match self.sender.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.close("outbound queue full");
                Err(CoordinatorError::SlowPeer(self.connection_id.to_string()))
            }
            Err(TrySendError::Closed(_)) => Err(CoordinatorError::ConnectionClosed(
                self.connection_id.to_string(),
            )),
        }
    }

    /// Close the connection (both reader and writer).
    pub fn close(&self, reason: &str) {
        if !self.cancel_token.is_cancelled() {
            debug!(
                target: "lockstep.connection",
                connection_id = %self.connection_id,
                reason = %reason,
                "Closing connection"
            );
        }
        self.cancel_token.cancel();
    }

    /// Check if the connection has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `ConnectionActor` implementation.
pub struct ConnectionActor<W> {
    /// Connection ID.
    connection_id: ConnectionId,
    /// Peer this connection belongs to.
    peer_id: PeerId,
    /// Socket write half, framed as newline-delimited events.
    writer: FramedWrite<W, EventCodec>,
    /// Outbound queue.
    receiver: mpsc::Receiver<Event>,
    /// Shared with the connection's reader.
    cancel_token: CancellationToken,
    /// Upper bound for one write.
    send_timeout: Duration,
    /// Events written so far.
    events_written: u64,
}

impl<W> ConnectionActor<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Spawn a new connection actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        connection_id: ConnectionId,
        peer_id: PeerId,
        writer: W,
        send_timeout: Duration,
        queue_capacity: usize,
        cancel_token: CancellationToken,
    ) -> (ConnectionHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));

        let actor = Self {
            connection_id,
            peer_id,
            writer: FramedWrite::new(writer, EventCodec::new()),
            receiver,
            cancel_token: cancel_token.clone(),
            send_timeout,
            events_written: 0,
        };

        let task_handle = tokio::spawn(actor.run());
        let handle = ConnectionHandle::new(connection_id, sender, cancel_token);

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(
        skip_all,
        name = "lockstep.connection.writer",
        fields(connection_id = %self.connection_id, peer_id = %self.peer_id)
    )]
    async fn run(mut self) {
        debug!(
            target: "lockstep.connection",
            connection_id = %self.connection_id,
            peer_id = %self.peer_id,
            "ConnectionActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "lockstep.connection",
                        connection_id = %self.connection_id,
                        "ConnectionActor received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    let Some(event) = msg else {
                        break;
                    };
                    if let Err(e) = self.write(event).await {
                        warn!(
                            target: "lockstep.connection",
                            connection_id = %self.connection_id,
                            peer_id = %self.peer_id,
                            error = %e,
                            "Write failed, closing connection"
                        );
                        self.cancel_token.cancel();
                        break;
                    }
                }
            }
        }

        // Best effort FIN; the peer may already be gone.
        let _ = tokio::time::timeout(self.send_timeout, self.writer.close()).await;

        info!(
            target: "lockstep.connection",
            connection_id = %self.connection_id,
            peer_id = %self.peer_id,
            events_written = self.events_written,
            "ConnectionActor stopped"
        );
    }

    async fn write(&mut self, event: Event) -> Result<(), CoordinatorError> {
        let kind = event.kind();
        let sent = tokio::time::timeout(self.send_timeout, self.writer.send(event))
            .await
            .map_err(|_| CoordinatorError::SendTimeout(self.send_timeout))?;

        match sent {
            Ok(()) => {
                self.events_written += 1;
                Ok(())
            }
            Err(CodecError::Io(e)) => Err(CoordinatorError::ConnectionClosed(e.to_string())),
            // Rejected by the encoder before touching the socket.
            Err(e) => {
                warn!(
                    target: "lockstep.connection",
                    connection_id = %self.connection_id,
                    event = kind,
                    error = %e,
                    "Dropping event that cannot be encoded"
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};

    fn peer(id: &str) -> PeerId {
        PeerId::parse(id).unwrap()
    }

    #[tokio::test]
    async fn test_events_are_written_in_order() {
        let (client, server) = tokio::io::duplex(4096);
        let (handle, _task) = ConnectionActor::spawn(
            ConnectionId::new(),
            peer("alice"),
            server,
            Duration::from_secs(1),
            8,
            CancellationToken::new(),
        );

        handle.try_send(Event::Ping { nonce: 1 }).unwrap();
        handle.try_send(Event::gate(true, "everyone is ready")).unwrap();

        let mut lines = BufReader::new(client).lines();
        assert_eq!(
            lines.next_line().await.unwrap().unwrap(),
            r#"{"type":"ping","nonce":1}"#
        );
        assert_eq!(
            lines.next_line().await.unwrap().unwrap(),
            r#"{"type":"playback_gate","allowed":true,"reason":"everyone is ready"}"#
        );

        handle.close("test done");
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_unencodable_event_is_dropped_and_writer_keeps_going() {
        let (client, server) = tokio::io::duplex(4096);
        let (handle, _task) = ConnectionActor::spawn(
            ConnectionId::new(),
            peer("alice"),
            server,
            Duration::from_secs(1),
            8,
            CancellationToken::new(),
        );

        handle
            .try_send(Event::SeekRequest { position: -3.0 })
            .unwrap();
        handle.try_send(Event::Ping { nonce: 2 }).unwrap();

        let mut lines = BufReader::new(client).lines();
        assert_eq!(
            lines.next_line().await.unwrap().unwrap(),
            r#"{"type":"ping","nonce":2}"#
        );
        assert!(!handle.is_closed());
    }

    #[tokio::test]
    async fn test_full_queue_closes_connection() {
        // Nobody drains the queue: the actor is never spawned.
        let (sender, _receiver) = mpsc::channel(1);
        let handle = ConnectionHandle::new(ConnectionId::new(), sender, CancellationToken::new());

        handle.try_send(Event::Ping { nonce: 1 }).unwrap();
        let err = handle.try_send(Event::Ping { nonce: 2 }).unwrap_err();

        assert!(matches!(err, CoordinatorError::SlowPeer(_)));
        assert!(handle.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_write_times_out_and_closes() {
        // A 16 byte pipe that nobody reads fills up on the first event.
        let (_client, server) = tokio::io::duplex(16);
        let (handle, task) = ConnectionActor::spawn(
            ConnectionId::new(),
            peer("slow"),
            server,
            Duration::from_millis(200),
            8,
            CancellationToken::new(),
        );

        handle.try_send(Event::gate(false, "bob left")).unwrap();
        tokio::time::advance(Duration::from_millis(250)).await;
        task.await.unwrap();

        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (_client, server) = tokio::io::duplex(64);
        let (handle, task) = ConnectionActor::spawn(
            ConnectionId::new(),
            peer("gone"),
            server,
            Duration::from_secs(1),
            8,
            CancellationToken::new(),
        );

        handle.close("test");
        task.await.unwrap();

        let err = handle.try_send(Event::Ping { nonce: 9 }).unwrap_err();
        assert!(matches!(err, CoordinatorError::ConnectionClosed(_)));
    }
}
