//! Metrics definitions for the coordinator.
//!
//! All metrics follow Prometheus naming conventions:
//! - `lockstep_` prefix
//! - `_total` suffix for counters
//!
//! Only the `metrics` facade is used here. The binary installs no recorder,
//! so these calls are no-ops unless an embedder installs one.
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `allowed`: 2 values
//! - `kind`: bounded by `Event` variants and violation kinds (< 10 values)
//! - `policy`: 2 values

use metrics::{counter, gauge};

/// Set the number of registered peers.
///
/// Metric: `lockstep_peers_connected`
pub fn set_peers_connected(count: usize) {
    // usize to f64 conversion is safe for realistic peer counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("lockstep_peers_connected").set(count as f64);
}

/// Record a `PlaybackGate` broadcast.
///
/// Metric: `lockstep_gate_broadcasts_total`
/// Labels: `allowed`
pub fn record_gate_broadcast(allowed: bool) {
    counter!(
        "lockstep_gate_broadcasts_total",
        "allowed" => if allowed { "true" } else { "false" }
    )
    .increment(1);
}

/// Record a relayed seek or speed change.
///
/// Metric: `lockstep_seeks_relayed_total`
/// Labels: `kind` (`seek_request`, `speed_change`)
pub fn record_relay(kind: &'static str) {
    counter!("lockstep_seeks_relayed_total", "kind" => kind).increment(1);
}

/// Record a peer whose pings timed out.
///
/// Metric: `lockstep_heartbeat_failures_total`
/// Labels: `policy`
pub fn record_heartbeat_failure(policy: &'static str) {
    counter!("lockstep_heartbeat_failures_total", "policy" => policy).increment(1);
}

/// Record a stop forced by the desync monitor.
///
/// Metric: `lockstep_desync_stops_total`
pub fn record_desync_stop() {
    counter!("lockstep_desync_stops_total").increment(1);
}

/// Record a connection closed for breaking the protocol.
///
/// Metric: `lockstep_protocol_violations_total`
/// Labels: `kind`
pub fn record_protocol_violation(kind: &'static str) {
    counter!("lockstep_protocol_violations_total", "kind" => kind).increment(1);
}
