//! `CoordinatorActor` - owns the session state and serializes every change.
//!
//! The actor owns the [`PeerRegistry`] and the [`ReadinessBarrier`]. Readers,
//! the heartbeat monitor and the desync monitor talk to it only through its
//! mailbox, so registry mutations are never observed mid-update. Broadcasts
//! are non-blocking enqueues into each peer's `ConnectionActor`; the actor
//! never waits on the network.

use crate::barrier::{GateChange, ReadinessBarrier};
use crate::config::HeartbeatPolicy;
use crate::errors::CoordinatorError;
use crate::observability::metrics;
use crate::registry::{PeerRegistry, PeerSnapshot};
use crate::relay::{fan_out, relay_from};
use crate::tasks::desync_monitor::Violation;

use super::connection::ConnectionHandle;
use super::messages::{CoordinatorMessage, CoordinatorStatus};

use common::types::{ConnectionId, PeerId};
use sync_protocol::Event;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the coordinator mailbox.
const COORDINATOR_CHANNEL_BUFFER: usize = 1024;

/// Handle to the `CoordinatorActor`.
#[derive(Clone, Debug)]
pub struct CoordinatorHandle {
    sender: mpsc::Sender<CoordinatorMessage>,
    cancel_token: CancellationToken,
}

impl CoordinatorHandle {
    async fn send(&self, message: CoordinatorMessage) -> Result<(), CoordinatorError> {
        self.sender
            .send(message)
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))
    }

    /// Register a peer whose `Hello` was accepted.
    pub async fn register(
        &self,
        peer_id: PeerId,
        connection: ConnectionHandle,
    ) -> Result<(), CoordinatorError> {
        self.send(CoordinatorMessage::Register {
            peer_id,
            connection,
        })
        .await
    }

    /// Notify that a connection's reader exited.
    pub async fn disconnected(
        &self,
        peer_id: PeerId,
        connection_id: ConnectionId,
    ) -> Result<(), CoordinatorError> {
        self.send(CoordinatorMessage::Disconnected {
            peer_id,
            connection_id,
        })
        .await
    }

    /// Forward a `ReadyChanged`.
    pub async fn ready_changed(
        &self,
        peer_id: PeerId,
        connection_id: ConnectionId,
        ready: bool,
    ) -> Result<(), CoordinatorError> {
        self.send(CoordinatorMessage::ReadyChanged {
            peer_id,
            connection_id,
            ready,
        })
        .await
    }

    /// Forward a `PositionReport`.
    pub async fn position_report(
        &self,
        peer_id: PeerId,
        connection_id: ConnectionId,
        position: f64,
    ) -> Result<(), CoordinatorError> {
        self.send(CoordinatorMessage::PositionReport {
            peer_id,
            connection_id,
            position,
        })
        .await
    }

    /// Forward a `SeekRequest` for relay.
    pub async fn seek(
        &self,
        peer_id: PeerId,
        connection_id: ConnectionId,
        position: f64,
    ) -> Result<(), CoordinatorError> {
        self.send(CoordinatorMessage::Seek {
            peer_id,
            connection_id,
            position,
        })
        .await
    }

    /// Forward a `SpeedChange` for relay.
    pub async fn speed_change(
        &self,
        peer_id: PeerId,
        connection_id: ConnectionId,
        speed: f64,
    ) -> Result<(), CoordinatorError> {
        self.send(CoordinatorMessage::SpeedChange {
            peer_id,
            connection_id,
            speed,
        })
        .await
    }

    /// Forward a `Pong`.
    pub async fn heartbeat_ack(
        &self,
        peer_id: PeerId,
        connection_id: ConnectionId,
        nonce: u64,
    ) -> Result<(), CoordinatorError> {
        self.send(CoordinatorMessage::HeartbeatAck {
            peer_id,
            connection_id,
            nonce,
        })
        .await
    }

    /// Report a connection whose pings timed out.
    pub async fn heartbeat_failed(
        &self,
        peer_id: PeerId,
        connection_id: ConnectionId,
    ) -> Result<(), CoordinatorError> {
        self.send(CoordinatorMessage::HeartbeatFailed {
            peer_id,
            connection_id,
        })
        .await
    }

    /// Report a desync violation.
    pub async fn desync_detected(&self, violation: Violation) -> Result<(), CoordinatorError> {
        self.send(CoordinatorMessage::DesyncDetected { violation })
            .await
    }

    /// Get a point-in-time copy of the registry.
    pub async fn snapshot(&self) -> Result<Vec<PeerSnapshot>, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.send(CoordinatorMessage::Snapshot { respond_to: tx })
            .await?;

        rx.await
            .map_err(|e| CoordinatorError::Internal(format!("response receive failed: {e}")))
    }

    /// Get the barrier state and peer count.
    pub async fn status(&self) -> Result<CoordinatorStatus, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.send(CoordinatorMessage::GetStatus { respond_to: tx })
            .await?;

        rx.await
            .map_err(|e| CoordinatorError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the coordinator actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Get a child token for tasks that must stop with the coordinator.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// The `CoordinatorActor` implementation.
pub struct CoordinatorActor {
    /// Message receiver.
    receiver: mpsc::Receiver<CoordinatorMessage>,
    /// Cancellation token.
    cancel_token: CancellationToken,
    /// Registered peers.
    registry: PeerRegistry,
    /// Global playback permission.
    barrier: ReadinessBarrier,
    /// What to do with peers that stop answering pings.
    heartbeat_policy: HeartbeatPolicy,
    /// Messages handled so far.
    messages_processed: u64,
}

impl CoordinatorActor {
    /// Spawn the coordinator actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        heartbeat_policy: HeartbeatPolicy,
        cancel_token: CancellationToken,
    ) -> (CoordinatorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(COORDINATOR_CHANNEL_BUFFER);

        let actor = Self {
            receiver,
            cancel_token: cancel_token.clone(),
            registry: PeerRegistry::new(),
            barrier: ReadinessBarrier::new(),
            heartbeat_policy,
            messages_processed: 0,
        };

        let task_handle = tokio::spawn(actor.run());
        let handle = CoordinatorHandle {
            sender,
            cancel_token,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(
        skip_all,
        name = "lockstep.coordinator",
        fields(heartbeat_policy = %self.heartbeat_policy)
    )]
    async fn run(mut self) {
        info!(target: "lockstep.coordinator", "CoordinatorActor started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "lockstep.coordinator",
                        "CoordinatorActor received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    let Some(message) = msg else {
                        info!(
                            target: "lockstep.coordinator",
                            "CoordinatorActor channel closed, exiting"
                        );
                        break;
                    };
                    self.handle_message(message);
                    self.messages_processed += 1;
                }
            }
        }

        let closed = self.registry.close_all("coordinator shutting down");
        metrics::set_peers_connected(0);

        info!(
            target: "lockstep.coordinator",
            peers_closed = closed,
            messages_processed = self.messages_processed,
            "CoordinatorActor stopped"
        );
    }

    /// Handle a single message.
    fn handle_message(&mut self, message: CoordinatorMessage) {
        match message {
            CoordinatorMessage::Register {
                peer_id,
                connection,
            } => self.handle_register(peer_id, connection),

            CoordinatorMessage::Disconnected {
                peer_id,
                connection_id,
            } => self.handle_disconnected(&peer_id, connection_id),

            CoordinatorMessage::ReadyChanged {
                peer_id,
                connection_id,
                ready,
            } => self.handle_ready_changed(&peer_id, connection_id, ready),

            CoordinatorMessage::PositionReport {
                peer_id,
                connection_id,
                position,
            } => {
                if !self
                    .registry
                    .record_position(&peer_id, connection_id, position)
                {
                    debug!(
                        target: "lockstep.coordinator",
                        peer_id = %peer_id,
                        connection_id = %connection_id,
                        "Ignoring position report from stale connection"
                    );
                }
            }

            CoordinatorMessage::Seek {
                peer_id,
                connection_id,
                position,
            } => self.handle_seek(&peer_id, connection_id, position),

            CoordinatorMessage::SpeedChange {
                peer_id,
                connection_id,
                speed,
            } => self.handle_speed_change(&peer_id, connection_id, speed),

            CoordinatorMessage::HeartbeatAck {
                peer_id,
                connection_id,
                nonce,
            } => {
                self.registry
                    .record_heartbeat_ack(&peer_id, connection_id, nonce, Instant::now());
            }

            CoordinatorMessage::HeartbeatFailed {
                peer_id,
                connection_id,
            } => self.handle_heartbeat_failed(&peer_id, connection_id),

            CoordinatorMessage::DesyncDetected { violation } => self.handle_desync(&violation),

            CoordinatorMessage::Snapshot { respond_to } => {
                let _ = respond_to.send(self.registry.snapshot());
            }

            CoordinatorMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(CoordinatorStatus {
                    barrier: self.barrier.state(),
                    peer_count: self.registry.len(),
                });
            }
        }
    }

    fn handle_register(&mut self, peer_id: PeerId, connection: ConnectionHandle) {
        let connection_id = connection.connection_id();
        let displaced = self.registry.register(peer_id.clone(), connection);

        let reason = match &displaced {
            Some(old) => {
                info!(
                    target: "lockstep.coordinator",
                    peer_id = %peer_id,
                    connection_id = %connection_id,
                    stale_connection_id = %old.connection().connection_id(),
                    "Peer reconnected, stale connection closed"
                );
                format!("{peer_id} reconnected")
            }
            None => {
                info!(
                    target: "lockstep.coordinator",
                    peer_id = %peer_id,
                    connection_id = %connection_id,
                    peer_count = self.registry.len(),
                    "Peer registered"
                );
                format!("{peer_id} joined")
            }
        };
        metrics::set_peers_connected(self.registry.len());

        // The new record is not ready, so an armed barrier sees a falling edge.
        self.reevaluate(&reason);
    }

    fn handle_disconnected(&mut self, peer_id: &PeerId, connection_id: ConnectionId) {
        let Some(record) = self.registry.unregister(peer_id, connection_id) else {
            debug!(
                target: "lockstep.coordinator",
                peer_id = %peer_id,
                connection_id = %connection_id,
                "Ignoring disconnect of stale connection"
            );
            return;
        };
        record.connection().close("peer disconnected");

        info!(
            target: "lockstep.coordinator",
            peer_id = %peer_id,
            connection_id = %connection_id,
            peer_count = self.registry.len(),
            "Peer removed"
        );
        metrics::set_peers_connected(self.registry.len());

        self.stop_and_reevaluate(&format!("{peer_id} left"));
    }

    fn handle_ready_changed(&mut self, peer_id: &PeerId, connection_id: ConnectionId, ready: bool) {
        let Some(previous) = self.registry.set_ready(peer_id, connection_id, ready) else {
            debug!(
                target: "lockstep.coordinator",
                peer_id = %peer_id,
                connection_id = %connection_id,
                "Ignoring ready change from stale connection"
            );
            return;
        };

        debug!(
            target: "lockstep.coordinator",
            peer_id = %peer_id,
            ready = ready,
            previous = previous,
            "Peer ready flag updated"
        );

        self.reevaluate(&format!("{peer_id} is not ready"));
    }

    fn handle_seek(&mut self, peer_id: &PeerId, connection_id: ConnectionId, position: f64) {
        if !self
            .registry
            .record_position(peer_id, connection_id, position)
        {
            debug!(
                target: "lockstep.coordinator",
                peer_id = %peer_id,
                "Ignoring seek from stale connection"
            );
            return;
        }
        self.registry.clear_positions_except(peer_id);

        let outcome = relay_from(
            &self.registry,
            peer_id,
            &Event::SeekRequest { position },
        );
        metrics::record_relay("seek_request");

        info!(
            target: "lockstep.coordinator",
            peer_id = %peer_id,
            position = position,
            delivered = outcome.delivered,
            failed = outcome.failed,
            "Seek relayed"
        );
    }

    fn handle_speed_change(&mut self, peer_id: &PeerId, connection_id: ConnectionId, speed: f64) {
        let current = self
            .registry
            .get(peer_id)
            .is_some_and(|r| r.connection().connection_id() == connection_id);
        if !current {
            return;
        }

        let outcome = relay_from(&self.registry, peer_id, &Event::SpeedChange { speed });
        metrics::record_relay("speed_change");

        info!(
            target: "lockstep.coordinator",
            peer_id = %peer_id,
            speed = speed,
            delivered = outcome.delivered,
            "Speed change relayed"
        );
    }

    fn handle_heartbeat_failed(&mut self, peer_id: &PeerId, connection_id: ConnectionId) {
        match self.heartbeat_policy {
            HeartbeatPolicy::Evict => {
                let Some(record) = self.registry.unregister(peer_id, connection_id) else {
                    return;
                };
                record.connection().close("heartbeat timeout");
                metrics::set_peers_connected(self.registry.len());
            }
            HeartbeatPolicy::MarkUnready => {
                if self.registry.set_ready(peer_id, connection_id, false).is_none() {
                    return;
                }
            }
        }

        warn!(
            target: "lockstep.heartbeat",
            peer_id = %peer_id,
            connection_id = %connection_id,
            policy = self.heartbeat_policy.as_str(),
            "Peer stopped answering heartbeats"
        );
        metrics::record_heartbeat_failure(self.heartbeat_policy.as_str());

        self.stop_and_reevaluate(&format!("{peer_id} stopped answering heartbeats"));
    }

    fn handle_desync(&mut self, violation: &Violation) {
        let reason = violation.reason();
        match self.barrier.force_stop(&reason) {
            Some(change) => {
                warn!(
                    target: "lockstep.desync",
                    peer_a = %violation.a,
                    peer_b = %violation.b,
                    diff_seconds = violation.diff,
                    "Desync detected, stopping playback"
                );
                metrics::record_desync_stop();
                self.broadcast_gate(&change);
            }
            None => {
                debug!(
                    target: "lockstep.desync",
                    peer_a = %violation.a,
                    peer_b = %violation.b,
                    diff_seconds = violation.diff,
                    "Desync while not playing, ignoring"
                );
            }
        }
    }

    /// Feed the current global readiness to the barrier.
    fn reevaluate(&mut self, stop_reason: &str) {
        let readiness = self.registry.global_readiness();
        if let Some(change) = self.barrier.evaluate(readiness, stop_reason) {
            self.broadcast_gate(&change);
        }
    }

    /// Stop an armed barrier, then record the recomputed readiness.
    ///
    /// Used when the peer set lost a trustworthy member (removal, heartbeat
    /// failure). If the barrier was waiting, the removal may complete the
    /// ready set and arm it instead.
    fn stop_and_reevaluate(&mut self, reason: &str) {
        if let Some(change) = self.barrier.force_stop(reason) {
            self.broadcast_gate(&change);
        }
        self.reevaluate(reason);
    }

    fn broadcast_gate(&self, change: &GateChange) {
        let outcome = fan_out(&self.registry, None, &change.to_event());
        metrics::record_gate_broadcast(change.allowed);

        info!(
            target: "lockstep.coordinator",
            allowed = change.allowed,
            reason = %change.reason,
            delivered = outcome.delivered,
            failed = outcome.failed,
            "Playback gate broadcast"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::barrier::BarrierState;

    struct FakePeer {
        id: PeerId,
        connection: ConnectionHandle,
        rx: mpsc::Receiver<Event>,
    }

    impl FakePeer {
        fn new(id: &str) -> Self {
            let (sender, rx) = mpsc::channel(32);
            Self {
                id: PeerId::parse(id).unwrap(),
                connection: ConnectionHandle::new(
                    ConnectionId::new(),
                    sender,
                    CancellationToken::new(),
                ),
                rx,
            }
        }

        fn conn(&self) -> ConnectionId {
            self.connection.connection_id()
        }

        fn drain(&mut self) -> Vec<Event> {
            let mut events = Vec::new();
            while let Ok(event) = self.rx.try_recv() {
                events.push(event);
            }
            events
        }

        fn gates(&mut self) -> Vec<bool> {
            self.drain()
                .into_iter()
                .filter_map(|e| match e {
                    Event::PlaybackGate { allowed, .. } => Some(allowed),
                    _ => None,
                })
                .collect()
        }
    }

    async fn join(handle: &CoordinatorHandle, peer: &FakePeer) {
        handle
            .register(peer.id.clone(), peer.connection.clone())
            .await
            .unwrap();
    }

    async fn ready(handle: &CoordinatorHandle, peer: &FakePeer, ready: bool) {
        handle
            .ready_changed(peer.id.clone(), peer.conn(), ready)
            .await
            .unwrap();
    }

    fn spawn(policy: HeartbeatPolicy) -> CoordinatorHandle {
        let (handle, _task) = CoordinatorActor::spawn(policy, CancellationToken::new());
        handle
    }

    #[tokio::test]
    async fn test_three_peers_arm_exactly_once() {
        let handle = spawn(HeartbeatPolicy::Evict);
        let mut a = FakePeer::new("a");
        let mut b = FakePeer::new("b");
        let mut c = FakePeer::new("c");
        for p in [&a, &b, &c] {
            join(&handle, p).await;
        }

        ready(&handle, &a, true).await;
        ready(&handle, &c, true).await;
        assert_eq!(handle.status().await.unwrap().barrier, BarrierState::Waiting);

        ready(&handle, &b, true).await;
        // Re-sending the same value is not an edge.
        ready(&handle, &b, true).await;
        ready(&handle, &a, true).await;
        assert_eq!(handle.status().await.unwrap().barrier, BarrierState::Armed);

        for p in [&mut a, &mut b, &mut c] {
            assert_eq!(p.gates(), vec![true]);
        }
    }

    #[tokio::test]
    async fn test_removal_while_armed_stops_remaining_peers_once() {
        let handle = spawn(HeartbeatPolicy::Evict);
        let mut a = FakePeer::new("a");
        let mut b = FakePeer::new("b");
        let c = FakePeer::new("c");
        for p in [&a, &b, &c] {
            join(&handle, p).await;
            ready(&handle, p, true).await;
        }
        handle.status().await.unwrap();
        a.drain();
        b.drain();

        handle.disconnected(c.id.clone(), c.conn()).await.unwrap();
        let status = handle.status().await.unwrap();

        assert_eq!(status.peer_count, 2);
        assert_eq!(status.barrier, BarrierState::Waiting);
        assert_eq!(a.gates(), vec![false]);
        assert_eq!(b.gates(), vec![false]);
        assert!(c.connection.is_closed());

        // Still all ready: no re-arm until someone toggles.
        ready(&handle, &a, true).await;
        assert_eq!(handle.status().await.unwrap().barrier, BarrierState::Waiting);
        ready(&handle, &a, false).await;
        ready(&handle, &a, true).await;
        assert_eq!(handle.status().await.unwrap().barrier, BarrierState::Armed);
        assert_eq!(b.gates(), vec![true]);
    }

    #[tokio::test]
    async fn test_unready_peer_leaving_arms_the_rest() {
        let handle = spawn(HeartbeatPolicy::Evict);
        let mut a = FakePeer::new("a");
        let mut b = FakePeer::new("b");
        let c = FakePeer::new("c");
        for p in [&a, &b, &c] {
            join(&handle, p).await;
        }
        ready(&handle, &a, true).await;
        ready(&handle, &b, true).await;

        handle.disconnected(c.id.clone(), c.conn()).await.unwrap();
        assert_eq!(handle.status().await.unwrap().barrier, BarrierState::Armed);
        assert_eq!(a.gates(), vec![true]);
        assert_eq!(b.gates(), vec![true]);
    }

    #[tokio::test]
    async fn test_reconnect_replaces_record_and_ignores_stale_disconnect() {
        let handle = spawn(HeartbeatPolicy::Evict);
        let mut a = FakePeer::new("a");
        let old_b = FakePeer::new("b");
        join(&handle, &a).await;
        join(&handle, &old_b).await;
        ready(&handle, &a, true).await;
        ready(&handle, &old_b, true).await;
        handle.status().await.unwrap();
        a.drain();

        let new_b = FakePeer::new("b");
        join(&handle, &new_b).await;
        handle.status().await.unwrap();
        assert!(old_b.connection.is_closed());

        // The stale reader reports its exit after the replacement.
        handle
            .disconnected(old_b.id.clone(), old_b.conn())
            .await
            .unwrap();

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 2);
        let b_record = snapshot.iter().find(|p| p.peer_id.as_str() == "b").unwrap();
        assert_eq!(b_record.connection_id(), new_b.conn());
        assert!(!b_record.ready);

        // Replacement while armed stops everyone exactly once.
        assert_eq!(a.gates(), vec![false]);

        ready(&handle, &new_b, true).await;
        assert_eq!(handle.status().await.unwrap().barrier, BarrierState::Armed);
    }

    #[tokio::test]
    async fn test_seek_relay_updates_position_and_skips_sender() {
        let handle = spawn(HeartbeatPolicy::Evict);
        let mut x = FakePeer::new("x");
        let mut y = FakePeer::new("y");
        join(&handle, &x).await;
        join(&handle, &y).await;
        handle.position_report(y.id.clone(), y.conn(), 3.0).await.unwrap();

        handle.seek(x.id.clone(), x.conn(), 42.0).await.unwrap();
        let snapshot = handle.snapshot().await.unwrap();

        assert_eq!(y.drain(), vec![Event::SeekRequest { position: 42.0 }]);
        assert!(x.drain().is_empty());
        let x_record = snapshot.iter().find(|p| p.peer_id == x.id).unwrap();
        let y_record = snapshot.iter().find(|p| p.peer_id == y.id).unwrap();
        assert_eq!(x_record.last_position, Some(42.0));
        assert_eq!(y_record.last_position, None);
    }

    #[tokio::test]
    async fn test_speed_change_relayed() {
        let handle = spawn(HeartbeatPolicy::Evict);
        let mut x = FakePeer::new("x");
        let mut y = FakePeer::new("y");
        join(&handle, &x).await;
        join(&handle, &y).await;

        handle.speed_change(x.id.clone(), x.conn(), 1.5).await.unwrap();
        handle.status().await.unwrap();

        assert_eq!(y.drain(), vec![Event::SpeedChange { speed: 1.5 }]);
        assert!(x.drain().is_empty());
    }

    #[tokio::test]
    async fn test_heartbeat_failure_mark_unready_keeps_peer() {
        let handle = spawn(HeartbeatPolicy::MarkUnready);
        let mut a = FakePeer::new("a");
        let b = FakePeer::new("b");
        for p in [&a, &b] {
            join(&handle, p).await;
            ready(&handle, p, true).await;
        }
        handle.status().await.unwrap();
        a.drain();

        handle.heartbeat_failed(b.id.clone(), b.conn()).await.unwrap();
        let snapshot = handle.snapshot().await.unwrap();

        assert_eq!(snapshot.len(), 2);
        assert!(!snapshot.iter().find(|p| p.peer_id == b.id).unwrap().ready);
        assert!(!b.connection.is_closed());
        assert_eq!(a.gates(), vec![false]);
    }

    #[tokio::test]
    async fn test_heartbeat_failure_evict_removes_peer() {
        let handle = spawn(HeartbeatPolicy::Evict);
        let mut a = FakePeer::new("a");
        let b = FakePeer::new("b");
        for p in [&a, &b] {
            join(&handle, p).await;
            ready(&handle, p, true).await;
        }
        handle.status().await.unwrap();
        a.drain();

        handle.heartbeat_failed(b.id.clone(), b.conn()).await.unwrap();
        let status = handle.status().await.unwrap();

        assert_eq!(status.peer_count, 1);
        assert!(b.connection.is_closed());
        let events = a.drain();
        assert_eq!(
            events,
            vec![Event::gate(false, "b stopped answering heartbeats")]
        );
    }

    #[tokio::test]
    async fn test_desync_stops_only_when_armed() {
        let handle = spawn(HeartbeatPolicy::Evict);
        let mut a = FakePeer::new("a");
        let b = FakePeer::new("b");
        join(&handle, &a).await;
        join(&handle, &b).await;

        let violation = Violation {
            a: a.id.clone(),
            b: b.id.clone(),
            diff: 6.0,
        };
        handle.desync_detected(violation.clone()).await.unwrap();
        handle.status().await.unwrap();
        assert!(a.gates().is_empty());

        ready(&handle, &a, true).await;
        ready(&handle, &b, true).await;
        handle.status().await.unwrap();
        a.drain();

        handle.desync_detected(violation).await.unwrap();
        handle.status().await.unwrap();
        assert_eq!(
            a.drain(),
            vec![Event::gate(false, "desync between a and b (6.0s)")]
        );
    }

    #[tokio::test]
    async fn test_cancel_closes_all_connections() {
        let (handle, task) =
            CoordinatorActor::spawn(HeartbeatPolicy::Evict, CancellationToken::new());
        let a = FakePeer::new("a");
        join(&handle, &a).await;
        handle.status().await.unwrap();

        handle.cancel();
        task.await.unwrap();

        assert!(handle.is_cancelled());
        assert!(a.connection.is_closed());
    }
}
