//! Raw protocol peer for coordinator tests.
//!
//! A `TestPeer` speaks the wire protocol directly. A background task owns
//! the socket: it answers coordinator pings (unless told to stop) and
//! forwards every other event to the test.

use crate::EXPECT_TIMEOUT;
use common::types::PeerId;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sync_protocol::{Event, EventCodec};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

enum Outbound {
    Event(Event),
    Raw(String),
}

/// A connected protocol client.
pub struct TestPeer {
    outbound: mpsc::UnboundedSender<Outbound>,
    events: mpsc::UnboundedReceiver<Event>,
    answer_pings: Arc<AtomicBool>,
    pings_seen: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl TestPeer {
    /// Open a connection without sending anything.
    pub async fn connect(addr: SocketAddr) -> Result<Self, anyhow::Error> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to {}: {}", addr, e))?;
        let (read_half, write_half) = stream.into_split();
        let mut reader = FramedRead::new(read_half, EventCodec::new());
        let mut writer = FramedWrite::new(write_half, EventCodec::new());

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let answer_pings = Arc::new(AtomicBool::new(true));
        let pings_seen = Arc::new(AtomicU64::new(0));

        let answer = Arc::clone(&answer_pings);
        let seen = Arc::clone(&pings_seen);
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = reader.next() => match frame {
                        Some(Ok(Ok(Event::Ping { nonce }))) => {
                            seen.fetch_add(1, Ordering::SeqCst);
                            if answer.load(Ordering::SeqCst)
                                && writer.send(Event::Pong { nonce }).await.is_err()
                            {
                                break;
                            }
                        }
                        Some(Ok(Ok(event))) => {
                            if events_tx.send(event).is_err() {
                                break;
                            }
                        }
                        Some(Ok(Err(_))) => {}
                        Some(Err(_)) | None => break,
                    },
                    command = outbound_rx.recv() => match command {
                        Some(Outbound::Event(event)) => {
                            if writer.send(event).await.is_err() {
                                break;
                            }
                        }
                        Some(Outbound::Raw(line)) => {
                            let stream = writer.get_mut();
                            if stream.write_all(line.as_bytes()).await.is_err()
                                || stream.write_all(b"\n").await.is_err()
                            {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        Ok(Self {
            outbound,
            events,
            answer_pings,
            pings_seen,
            task,
        })
    }

    /// Connect and send `Hello`.
    pub async fn join(addr: SocketAddr, peer_id: &str) -> Result<Self, anyhow::Error> {
        let peer = Self::connect(addr).await?;
        let peer_id =
            PeerId::parse(peer_id).map_err(|e| anyhow::anyhow!("Invalid peer id: {}", e))?;
        peer.send(Event::Hello { peer_id })?;
        Ok(peer)
    }

    /// Send one event.
    pub fn send(&self, event: Event) -> Result<(), anyhow::Error> {
        self.outbound
            .send(Outbound::Event(event))
            .map_err(|_| anyhow::anyhow!("Peer connection is closed"))
    }

    /// Send one raw line, bypassing the encoder.
    pub fn send_raw(&self, line: &str) -> Result<(), anyhow::Error> {
        self.outbound
            .send(Outbound::Raw(line.to_string()))
            .map_err(|_| anyhow::anyhow!("Peer connection is closed"))
    }

    /// Send `ReadyChanged`.
    pub fn set_ready(&self, ready: bool) -> Result<(), anyhow::Error> {
        self.send(Event::ReadyChanged { ready })
    }

    /// Stop answering coordinator pings, as a hung client would.
    pub fn stop_answering_pings(&self) {
        self.answer_pings.store(false, Ordering::SeqCst);
    }

    /// Answer coordinator pings again.
    pub fn resume_answering_pings(&self) {
        self.answer_pings.store(true, Ordering::SeqCst);
    }

    /// Coordinator pings received so far.
    pub fn pings_seen(&self) -> u64 {
        self.pings_seen.load(Ordering::SeqCst)
    }

    /// Wait until the coordinator has registered this peer.
    ///
    /// Only registered peers are pinged, so the first ping proves it.
    ///
    /// # Panics
    ///
    /// Panics if no ping arrives within [`EXPECT_TIMEOUT`].
    pub async fn expect_registered(&self) {
        let registered = tokio::time::timeout(EXPECT_TIMEOUT, async {
            while self.pings_seen() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(registered.is_ok(), "peer not pinged within {EXPECT_TIMEOUT:?}");
    }

    /// Next non-ping event, or `None` on timeout or close.
    pub async fn next_event(&mut self, timeout: Duration) -> Option<Event> {
        tokio::time::timeout(timeout, self.events.recv())
            .await
            .ok()
            .flatten()
    }

    /// Next non-ping event.
    ///
    /// # Panics
    ///
    /// Panics if nothing arrives within [`EXPECT_TIMEOUT`].
    pub async fn expect_event(&mut self) -> Event {
        match tokio::time::timeout(EXPECT_TIMEOUT, self.events.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) => panic!("connection closed while waiting for an event"),
            Err(_) => panic!("no event within {EXPECT_TIMEOUT:?}"),
        }
    }

    /// Expect a `PlaybackGate` with the given permission and return its reason.
    ///
    /// # Panics
    ///
    /// Panics if the next event is anything else.
    pub async fn expect_gate(&mut self, allowed: bool) -> Option<String> {
        match self.expect_event().await {
            Event::PlaybackGate {
                allowed: got,
                reason,
            } if got == allowed => reason,
            other => panic!("expected PlaybackGate{{allowed: {allowed}}}, got {other:?}"),
        }
    }

    /// Assert that no event arrives for `window`.
    ///
    /// # Panics
    ///
    /// Panics on any event.
    pub async fn expect_silence(&mut self, window: Duration) {
        if let Ok(Some(event)) = tokio::time::timeout(window, self.events.recv()).await {
            panic!("expected silence, got {event:?}");
        }
    }

    /// Assert that the coordinator closes the connection, skipping any
    /// events delivered first.
    ///
    /// # Panics
    ///
    /// Panics if the connection stays open for [`EXPECT_TIMEOUT`].
    pub async fn expect_closed(&mut self) {
        let closed = tokio::time::timeout(EXPECT_TIMEOUT, async {
            while self.events.recv().await.is_some() {}
        })
        .await;
        assert!(closed.is_ok(), "connection still open after {EXPECT_TIMEOUT:?}");
    }

    /// Drop the connection.
    pub fn close(self) {
        self.task.abort();
    }
}

impl Drop for TestPeer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
