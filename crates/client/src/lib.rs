//! Lockstep client library.
//!
//! Connects one local media player to a Lockstep coordinator. Player events
//! become protocol messages, coordinator messages become player commands,
//! and remote seeks are never echoed back as local ones.
//!
//! # Modules
//!
//! - [`config`] - Client configuration from environment
//! - [`errors`] - Error types
//! - [`mpv`] - mpv JSON IPC adapter
//! - [`player`] - Player capability surface
//! - [`runtime`] - `SessionActor` driving the session
//! - [`session`] - Pure `ClientSession` state machine
//! - [`transport`] - Reconnecting coordinator connection

#![warn(clippy::pedantic)]

pub mod config;
pub mod errors;
#[cfg(unix)]
pub mod mpv;
pub mod player;
pub mod runtime;
pub mod session;
pub mod transport;
