//! `PeerRegistry` - authoritative table of registered peers.
//!
//! Owned by the `CoordinatorActor`; every mutation happens on the actor's
//! task. Other tasks only ever see [`PeerSnapshot`] copies.
//!
//! Updates are fenced by `ConnectionId`: a record is only touched by the
//! connection that currently owns it.

use crate::actors::connection::ConnectionHandle;

use common::types::{ConnectionId, PeerId};
use std::collections::HashMap;
use tokio::time::Instant;

/// Latest `Pong` seen from a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatAck {
    /// Highest nonce acknowledged on this connection.
    pub nonce: u64,
    /// When it arrived.
    pub at: Instant,
}

/// One registered peer.
#[derive(Debug)]
pub struct PeerRecord {
    id: PeerId,
    connection: ConnectionHandle,
    ready: bool,
    last_position: Option<f64>,
    last_heartbeat_ack: Option<HeartbeatAck>,
}

impl PeerRecord {
    fn new(id: PeerId, connection: ConnectionHandle) -> Self {
        Self {
            id,
            connection,
            ready: false,
            last_position: None,
            last_heartbeat_ack: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> &PeerId {
        &self.id
    }

    #[must_use]
    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    #[must_use]
    pub fn last_position(&self) -> Option<f64> {
        self.last_position
    }

    fn snapshot(&self) -> PeerSnapshot {
        PeerSnapshot {
            peer_id: self.id.clone(),
            connection: self.connection.clone(),
            ready: self.ready,
            last_position: self.last_position,
            last_heartbeat_ack: self.last_heartbeat_ack,
        }
    }
}

/// Point-in-time copy of one [`PeerRecord`].
#[derive(Debug, Clone)]
pub struct PeerSnapshot {
    pub peer_id: PeerId,
    pub connection: ConnectionHandle,
    pub ready: bool,
    pub last_position: Option<f64>,
    pub last_heartbeat_ack: Option<HeartbeatAck>,
}

impl PeerSnapshot {
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection.connection_id()
    }
}

/// Table of registered peers, at most one record per [`PeerId`].
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<PeerId, PeerRecord>,
}

impl PeerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh, not-ready record for `id`.
    ///
    /// An existing record for the same id is displaced: its connection is
    /// closed and the record is returned.
    pub fn register(&mut self, id: PeerId, connection: ConnectionHandle) -> Option<PeerRecord> {
        let displaced = self.peers.remove(&id);
        if let Some(old) = &displaced {
            old.connection.close("replaced by a newer connection");
        }
        self.peers.insert(id.clone(), PeerRecord::new(id, connection));
        displaced
    }

    /// Remove the record for `id` if `connection_id` still owns it.
    pub fn unregister(&mut self, id: &PeerId, connection_id: ConnectionId) -> Option<PeerRecord> {
        self.owned_by(id, connection_id)?;
        self.peers.remove(id)
    }

    /// Set the ready flag. Returns the previous value, or `None` if the
    /// connection does not own the record.
    pub fn set_ready(
        &mut self,
        id: &PeerId,
        connection_id: ConnectionId,
        ready: bool,
    ) -> Option<bool> {
        let record = self.owned_by(id, connection_id)?;
        Some(std::mem::replace(&mut record.ready, ready))
    }

    /// Record the latest reported position.
    pub fn record_position(
        &mut self,
        id: &PeerId,
        connection_id: ConnectionId,
        position: f64,
    ) -> bool {
        match self.owned_by(id, connection_id) {
            Some(record) => {
                record.last_position = Some(position);
                true
            }
            None => false,
        }
    }

    /// Forget the positions of everyone except `id`.
    ///
    /// Used after relaying a seek: the receivers are about to jump, so their
    /// old positions say nothing about their sync state until they report
    /// again.
    pub fn clear_positions_except(&mut self, id: &PeerId) {
        for record in self.peers.values_mut().filter(|r| &r.id != id) {
            record.last_position = None;
        }
    }

    /// Record a `Pong`. Acks never move backwards.
    pub fn record_heartbeat_ack(
        &mut self,
        id: &PeerId,
        connection_id: ConnectionId,
        nonce: u64,
        at: Instant,
    ) -> bool {
        let Some(record) = self.owned_by(id, connection_id) else {
            return false;
        };
        match record.last_heartbeat_ack {
            Some(ack) if ack.nonce >= nonce => {}
            _ => record.last_heartbeat_ack = Some(HeartbeatAck { nonce, at }),
        }
        true
    }

    /// `peerCount > 1` and every peer is ready.
    #[must_use]
    pub fn global_readiness(&self) -> bool {
        self.peers.len() > 1 && self.peers.values().all(|r| r.ready)
    }

    /// Consistent copy of the peer set, ordered by peer id.
    #[must_use]
    pub fn snapshot(&self) -> Vec<PeerSnapshot> {
        let mut peers: Vec<PeerSnapshot> = self.peers.values().map(PeerRecord::snapshot).collect();
        peers.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        peers
    }

    /// Iterate over the records in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.values()
    }

    #[must_use]
    pub fn get(&self, id: &PeerId) -> Option<&PeerRecord> {
        self.peers.get(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Remove every record, closing each connection.
    pub fn close_all(&mut self, reason: &str) -> usize {
        let count = self.peers.len();
        for (_, record) in self.peers.drain() {
            record.connection.close(reason);
        }
        count
    }

    fn owned_by(&mut self, id: &PeerId, connection_id: ConnectionId) -> Option<&mut PeerRecord> {
        self.peers
            .get_mut(id)
            .filter(|r| r.connection.connection_id() == connection_id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use sync_protocol::Event;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn peer(id: &str) -> PeerId {
        PeerId::parse(id).unwrap()
    }

    fn connection() -> (ConnectionHandle, mpsc::Receiver<Event>) {
        let (sender, receiver) = mpsc::channel(8);
        (
            ConnectionHandle::new(ConnectionId::new(), sender, CancellationToken::new()),
            receiver,
        )
    }

    #[tokio::test]
    async fn test_register_replaces_and_closes_old_connection() {
        let mut registry = PeerRegistry::new();
        let (old, _rx1) = connection();
        let (new, _rx2) = connection();

        assert!(registry.register(peer("alice"), old.clone()).is_none());
        registry.set_ready(&peer("alice"), old.connection_id(), true);

        let displaced = registry.register(peer("alice"), new.clone()).unwrap();
        assert!(displaced.is_ready());
        assert!(old.is_closed());
        assert!(!new.is_closed());

        assert_eq!(registry.len(), 1);
        let record = registry.get(&peer("alice")).unwrap();
        assert_eq!(record.connection().connection_id(), new.connection_id());
        assert!(!record.is_ready());
    }

    #[tokio::test]
    async fn test_stale_connection_cannot_touch_new_record() {
        let mut registry = PeerRegistry::new();
        let (old, _rx1) = connection();
        let (new, _rx2) = connection();
        registry.register(peer("alice"), old.clone());
        registry.register(peer("alice"), new.clone());

        assert_eq!(registry.set_ready(&peer("alice"), old.connection_id(), true), None);
        assert!(!registry.record_position(&peer("alice"), old.connection_id(), 3.0));
        assert!(registry
            .unregister(&peer("alice"), old.connection_id())
            .is_none());
        assert_eq!(registry.len(), 1);

        assert!(registry
            .unregister(&peer("alice"), new.connection_id())
            .is_some());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_global_readiness_needs_two_ready_peers() {
        let mut registry = PeerRegistry::new();
        let (a, _rx1) = connection();
        let (b, _rx2) = connection();

        registry.register(peer("a"), a.clone());
        registry.set_ready(&peer("a"), a.connection_id(), true);
        assert!(!registry.global_readiness(), "a single peer never plays");

        registry.register(peer("b"), b.clone());
        assert!(!registry.global_readiness());

        assert_eq!(registry.set_ready(&peer("b"), b.connection_id(), true), Some(false));
        assert!(registry.global_readiness());

        registry.unregister(&peer("b"), b.connection_id());
        assert!(!registry.global_readiness());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_ack_keeps_highest_nonce() {
        let mut registry = PeerRegistry::new();
        let (a, _rx) = connection();
        registry.register(peer("a"), a.clone());

        let now = Instant::now();
        registry.record_heartbeat_ack(&peer("a"), a.connection_id(), 5, now);
        registry.record_heartbeat_ack(&peer("a"), a.connection_id(), 3, now);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot[0].last_heartbeat_ack.unwrap().nonce, 5);
    }

    #[tokio::test]
    async fn test_snapshot_is_a_copy() {
        let mut registry = PeerRegistry::new();
        let (a, _rx1) = connection();
        let (b, _rx2) = connection();
        registry.register(peer("b"), b.clone());
        registry.register(peer("a"), a.clone());
        registry.record_position(&peer("a"), a.connection_id(), 10.0);

        let snapshot = registry.snapshot();
        registry.record_position(&peer("a"), a.connection_id(), 99.0);
        registry.clear_positions_except(&peer("b"));

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].peer_id.as_str(), "a");
        assert_eq!(snapshot[0].last_position, Some(10.0));
        assert_eq!(registry.get(&peer("a")).unwrap().last_position(), None);
    }

    #[tokio::test]
    async fn test_close_all() {
        let mut registry = PeerRegistry::new();
        let (a, _rx) = connection();
        registry.register(peer("a"), a.clone());

        assert_eq!(registry.close_all("shutdown"), 1);
        assert!(a.is_closed());
        assert!(registry.is_empty());
    }
}
