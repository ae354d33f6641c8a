//! Heartbeat monitor background task.
//!
//! Every interval the monitor pings each registered connection and checks
//! the pings it sent earlier. A connection whose oldest unanswered ping is at
//! least `timeout` old is reported to the coordinator, which applies the
//! configured [`HeartbeatPolicy`](crate::config::HeartbeatPolicy).
//!
//! Pings are recorded before they are sent, and acks come from the
//! registry snapshot, so a `Pong` can never be seen before its `Ping`.
//!
//! A silent peer is reported on the first tick at or after
//! `ping_sent + timeout`: never before the timeout, never more than one
//! interval after it.

use crate::actors::CoordinatorHandle;
use crate::registry::PeerSnapshot;

use common::types::{ConnectionId, PeerId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use sync_protocol::Event;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
struct PendingPing {
    nonce: u64,
    sent_at: Instant,
}

/// Outstanding pings per connection.
#[derive(Debug, Default)]
pub struct HeartbeatTracker {
    outstanding: HashMap<ConnectionId, VecDeque<PendingPing>>,
    next_nonce: u64,
}

impl HeartbeatTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Settle acked pings and return the connections that timed out.
    ///
    /// Connections absent from `peers` are forgotten. A timed-out connection
    /// starts over with an empty queue.
    pub fn expired(
        &mut self,
        peers: &[PeerSnapshot],
        now: Instant,
        timeout: Duration,
    ) -> Vec<(PeerId, ConnectionId)> {
        let live: HashSet<ConnectionId> = peers.iter().map(PeerSnapshot::connection_id).collect();
        self.outstanding.retain(|id, _| live.contains(id));

        let mut failed = Vec::new();
        for peer in peers {
            let Some(pending) = self.outstanding.get_mut(&peer.connection_id()) else {
                continue;
            };

            if let Some(ack) = peer.last_heartbeat_ack {
                while pending.front().is_some_and(|p| p.nonce <= ack.nonce) {
                    pending.pop_front();
                }
            }

            let timed_out = pending
                .front()
                .is_some_and(|p| now.duration_since(p.sent_at) >= timeout);
            if timed_out {
                pending.clear();
                failed.push((peer.peer_id.clone(), peer.connection_id()));
            }
        }

        failed
    }

    /// Allocate a nonce and remember when it was sent.
    pub fn record_ping(&mut self, connection_id: ConnectionId, now: Instant) -> u64 {
        self.next_nonce += 1;
        let nonce = self.next_nonce;
        self.outstanding
            .entry(connection_id)
            .or_default()
            .push_back(PendingPing {
                nonce,
                sent_at: now,
            });
        nonce
    }

    /// Unanswered pings for a connection.
    #[must_use]
    pub fn outstanding(&self, connection_id: ConnectionId) -> usize {
        self.outstanding.get(&connection_id).map_or(0, VecDeque::len)
    }
}

/// Run the heartbeat monitor loop.
pub async fn run_heartbeat_monitor(
    coordinator: CoordinatorHandle,
    ping_interval: Duration,
    timeout: Duration,
    cancel_token: CancellationToken,
) {
    let mut interval = tokio::time::interval(ping_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut tracker = HeartbeatTracker::new();

    info!(
        target: "lockstep.heartbeat",
        interval_ms = ping_interval.as_millis(),
        timeout_ms = timeout.as_millis(),
        "Heartbeat monitor started"
    );

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!(target: "lockstep.heartbeat", "Heartbeat monitor received shutdown signal, exiting");
                break;
            }
            _ = interval.tick() => {
                let peers = match coordinator.snapshot().await {
                    Ok(peers) => peers,
                    Err(e) => {
                        warn!(target: "lockstep.heartbeat", error = %e, "Coordinator unavailable, stopping heartbeat monitor");
                        break;
                    }
                };
                let now = Instant::now();

                for (peer_id, connection_id) in tracker.expired(&peers, now, timeout) {
                    if coordinator.heartbeat_failed(peer_id, connection_id).await.is_err() {
                        return;
                    }
                }

                for peer in &peers {
                    let nonce = tracker.record_ping(peer.connection_id(), now);
                    if let Err(e) = peer.connection.try_send(Event::Ping { nonce }) {
                        debug!(
                            target: "lockstep.heartbeat",
                            peer_id = %peer.peer_id,
                            error = %e,
                            "Ping not queued"
                        );
                    }
                }
            }
        }
    }
}
