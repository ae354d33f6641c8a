//! Message types for coordinator actor communication.
//!
//! Every per-peer message carries the `ConnectionId` it came from. The
//! coordinator applies it only if that connection still owns the peer's
//! record, so a late message from a replaced connection is dropped.

use crate::actors::connection::ConnectionHandle;
use crate::barrier::BarrierState;
use crate::registry::PeerSnapshot;
use crate::tasks::desync_monitor::Violation;

use common::types::{ConnectionId, PeerId};
use tokio::sync::oneshot;

/// Messages sent to the `CoordinatorActor`.
#[derive(Debug)]
pub enum CoordinatorMessage {
    /// A connection completed its `Hello`.
    Register {
        peer_id: PeerId,
        connection: ConnectionHandle,
    },

    /// The connection's reader exited.
    Disconnected {
        peer_id: PeerId,
        connection_id: ConnectionId,
    },

    /// `ReadyChanged` from a peer.
    ReadyChanged {
        peer_id: PeerId,
        connection_id: ConnectionId,
        ready: bool,
    },

    /// `PositionReport` from a peer.
    PositionReport {
        peer_id: PeerId,
        connection_id: ConnectionId,
        position: f64,
    },

    /// `SeekRequest` from a peer, to be relayed.
    Seek {
        peer_id: PeerId,
        connection_id: ConnectionId,
        position: f64,
    },

    /// `SpeedChange` from a peer, to be relayed.
    SpeedChange {
        peer_id: PeerId,
        connection_id: ConnectionId,
        speed: f64,
    },

    /// `Pong` from a peer.
    HeartbeatAck {
        peer_id: PeerId,
        connection_id: ConnectionId,
        nonce: u64,
    },

    /// The heartbeat monitor gave up on a connection.
    HeartbeatFailed {
        peer_id: PeerId,
        connection_id: ConnectionId,
    },

    /// The desync monitor found two peers too far apart.
    DesyncDetected { violation: Violation },

    /// Point-in-time copy of the registry.
    Snapshot {
        respond_to: oneshot::Sender<Vec<PeerSnapshot>>,
    },

    /// Barrier state and peer count.
    GetStatus {
        respond_to: oneshot::Sender<CoordinatorStatus>,
    },
}

/// Summary returned by `CoordinatorHandle::status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorStatus {
    pub barrier: BarrierState,
    pub peer_count: usize,
}
