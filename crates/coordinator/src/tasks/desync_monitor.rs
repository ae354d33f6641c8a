//! Desync monitor background task.
//!
//! Periodically compares the last reported positions of every pair of peers
//! and reports the first pair further apart than the threshold. Peers that
//! have not reported a position yet are exempt.
//!
//! # Graceful Shutdown
//!
//! The task exits when the cancellation token is triggered or the
//! coordinator goes away.

use crate::actors::CoordinatorHandle;

use common::types::PeerId;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Two peers whose positions diverged.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub a: PeerId,
    pub b: PeerId,
    /// Absolute position difference in seconds.
    pub diff: f64,
}

impl Violation {
    /// Human readable gate reason.
    #[must_use]
    pub fn reason(&self) -> String {
        format!("desync between {} and {} ({:.1}s)", self.a, self.b, self.diff)
    }
}

/// Find the first pair whose positions differ by more than `threshold`.
///
/// Peers with `None` are skipped. The scan stops at the first violation.
#[must_use]
pub fn find_violation(positions: &[(PeerId, Option<f64>)], threshold: f64) -> Option<Violation> {
    let known: Vec<(&PeerId, f64)> = positions
        .iter()
        .filter_map(|(id, position)| position.map(|p| (id, p)))
        .collect();

    for (i, (a, pa)) in known.iter().enumerate() {
        for (b, pb) in known.iter().skip(i + 1) {
            let diff = (pa - pb).abs();
            if diff > threshold {
                return Some(Violation {
                    a: (*a).clone(),
                    b: (*b).clone(),
                    diff,
                });
            }
        }
    }

    None
}

/// Run the desync monitor loop.
pub async fn run_desync_monitor(
    coordinator: CoordinatorHandle,
    check_interval: Duration,
    threshold: f64,
    cancel_token: CancellationToken,
) {
    let mut interval = tokio::time::interval(check_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        target: "lockstep.desync",
        interval_ms = check_interval.as_millis(),
        threshold_seconds = threshold,
        "Desync monitor started"
    );

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!(target: "lockstep.desync", "Desync monitor received shutdown signal, exiting");
                break;
            }
            _ = interval.tick() => {
                let peers = match coordinator.snapshot().await {
                    Ok(peers) => peers,
                    Err(e) => {
                        warn!(target: "lockstep.desync", error = %e, "Coordinator unavailable, stopping desync monitor");
                        break;
                    }
                };

                let positions: Vec<(PeerId, Option<f64>)> = peers
                    .into_iter()
                    .map(|p| (p.peer_id, p.last_position))
                    .collect();

                if let Some(violation) = find_violation(&positions, threshold) {
                    debug!(
                        target: "lockstep.desync",
                        peer_a = %violation.a,
                        peer_b = %violation.b,
                        diff_seconds = violation.diff,
                        "Positions diverged"
                    );
                    if coordinator.desync_detected(violation).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}
