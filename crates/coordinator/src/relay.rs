//! Broadcast fan-out: gate changes to everyone, seeks and speed changes to
//! everyone but the sender.
//!
//! Each destination gets a non-blocking enqueue into its own bounded
//! outbound queue, so one slow peer never stalls the others. A failed
//! enqueue has already closed that peer's connection; its reader will
//! report the disconnect.

use crate::registry::PeerRegistry;

use common::types::PeerId;
use sync_protocol::Event;
use tracing::debug;

/// Result of one fan-out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanOut {
    /// Peers the event was queued for.
    pub delivered: usize,
    /// Peers whose connection was closed or overflowed.
    pub failed: usize,
}

/// Queue `event` for every registered peer except `exclude`.
pub fn fan_out(registry: &PeerRegistry, exclude: Option<&PeerId>, event: &Event) -> FanOut {
    let mut outcome = FanOut::default();

    for record in registry.iter().filter(|r| Some(r.id()) != exclude) {
        match record.connection().try_send(event.clone()) {
            Ok(()) => outcome.delivered += 1,
            Err(e) => {
                debug!(
                    target: "lockstep.coordinator",
                    peer_id = %record.id(),
                    event = event.kind(),
                    error = %e,
                    "Broadcast skipped peer"
                );
                outcome.failed += 1;
            }
        }
    }

    outcome
}

/// Relay a peer's seek or speed change to every other peer.
pub fn relay_from(registry: &PeerRegistry, sender: &PeerId, event: &Event) -> FanOut {
    fan_out(registry, Some(sender), event)
}
