//! Lockstep coordinator library.
//!
//! The coordinator keeps a group of viewers in lockstep: playback is allowed
//! only while every connected peer reports ready, seeks and speed changes
//! from one peer are relayed to the others, and peers that drift apart or
//! stop answering heartbeats stop everyone.
//!
//! # Architecture
//!
//! ```text
//! accept loop (server)
//! └── per connection: reader task + ConnectionActor (writer)
//!         │ CoordinatorMessage
//!         ▼
//!     CoordinatorActor ── PeerRegistry, ReadinessBarrier
//!         ▲
//!         ├── heartbeat monitor (Ping / Pong timeout)
//!         └── desync monitor (position divergence)
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Coordinator and connection actors
//! - [`barrier`] - Edge-triggered playback permission
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types
//! - [`registry`] - Registered peers
//! - [`relay`] - Broadcast fan-out
//! - [`server`] - TCP accept loop and connection readers
//! - [`tasks`] - Heartbeat and desync monitors

#![warn(clippy::pedantic)]

pub mod actors;
pub mod barrier;
pub mod config;
pub mod errors;
pub mod observability;
pub mod registry;
pub mod relay;
pub mod server;
pub mod tasks;
