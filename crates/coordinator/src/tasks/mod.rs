//! Periodic background tasks driven by registry snapshots.

pub mod desync_monitor;
pub mod heartbeat_monitor;

pub use desync_monitor::run_desync_monitor;
pub use heartbeat_monitor::run_heartbeat_monitor;
