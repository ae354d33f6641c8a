//! Actor model for the coordinator.
//!
//! ```text
//! CoordinatorActor (singleton)
//! ├── owns PeerRegistry and ReadinessBarrier
//! └── holds one ConnectionHandle per registered peer
//!     └── ConnectionActor (one per TCP connection, drains the outbound queue)
//! ```
//!
//! Connection readers, the heartbeat monitor and the desync monitor send
//! [`CoordinatorMessage`]s; nothing else touches the registry.
//!
//! # Modules
//!
//! - [`coordinator`] - `CoordinatorActor` singleton that owns session state
//! - [`connection`] - `ConnectionActor` per TCP connection
//! - [`messages`] - Message types for actor communication

pub mod connection;
pub mod coordinator;
pub mod messages;

// Re-export primary types
pub use connection::{ConnectionActor, ConnectionHandle};
pub use coordinator::{CoordinatorActor, CoordinatorHandle};
pub use messages::{CoordinatorMessage, CoordinatorStatus};
