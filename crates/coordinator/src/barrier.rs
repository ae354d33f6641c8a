//! `ReadinessBarrier` - edge-triggered playback permission.
//!
//! The barrier never stores readiness itself. Callers recompute
//! `PeerRegistry::global_readiness` after each relevant mutation and feed it
//! to [`ReadinessBarrier::evaluate`]; the barrier keeps only the previous
//! computed value to detect edges.
//!
//! ```text
//!            rising edge (false -> true)
//!   WAITING ----------------------------> ARMED
//!      ^                                    |
//!      +------------------------------------+
//!        falling edge, or force_stop (removal, desync, heartbeat)
//! ```
//!
//! A forced stop leaves the remembered value alone. While everyone still
//! reports ready the computed value stays `true`, so the barrier re-arms
//! only after some peer goes unready and ready again.

use sync_protocol::Event;

/// Reason carried by the `PlaybackGate{allowed:true}` broadcast.
pub const ALL_READY_REASON: &str = "everyone is ready";

/// Barrier state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierState {
    /// Playback not permitted.
    Waiting,
    /// Playback permitted.
    Armed,
}

impl BarrierState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            BarrierState::Waiting => "waiting",
            BarrierState::Armed => "armed",
        }
    }
}

/// A transition that must be broadcast to every current peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateChange {
    pub allowed: bool,
    pub reason: String,
}

impl GateChange {
    /// The `PlaybackGate` event announcing this change.
    #[must_use]
    pub fn to_event(&self) -> Event {
        Event::gate(self.allowed, self.reason.clone())
    }
}

/// Two-state barrier over the computed global readiness.
#[derive(Debug)]
pub struct ReadinessBarrier {
    state: BarrierState,
    last_computed: bool,
}

impl Default for ReadinessBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessBarrier {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: BarrierState::Waiting,
            last_computed: false,
        }
    }

    #[must_use]
    pub fn state(&self) -> BarrierState {
        self.state
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.state == BarrierState::Armed
    }

    /// Feed a freshly computed global readiness.
    ///
    /// Returns a change only on an edge: arming on false -> true, stopping
    /// with `stop_reason` on true -> false while armed. An unchanged value
    /// never produces a change.
    pub fn evaluate(&mut self, global_readiness: bool, stop_reason: &str) -> Option<GateChange> {
        let previous = std::mem::replace(&mut self.last_computed, global_readiness);

        match (previous, global_readiness, self.state) {
            (false, true, BarrierState::Waiting) => {
                self.state = BarrierState::Armed;
                Some(GateChange {
                    allowed: true,
                    reason: ALL_READY_REASON.to_string(),
                })
            }
            (true, false, BarrierState::Armed) => {
                self.state = BarrierState::Waiting;
                Some(GateChange {
                    allowed: false,
                    reason: stop_reason.to_string(),
                })
            }
            _ => None,
        }
    }

    /// Stop regardless of readiness. No-op unless armed.
    pub fn force_stop(&mut self, reason: &str) -> Option<GateChange> {
        if self.state != BarrierState::Armed {
            return None;
        }
        self.state = BarrierState::Waiting;
        Some(GateChange {
            allowed: false,
            reason: reason.to_string(),
        })
    }
}
