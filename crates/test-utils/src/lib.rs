//! # Lockstep Test Utilities
//!
//! Shared harnesses for Lockstep integration tests.
//!
//! ## Modules
//!
//! - `server_harness` - `TestCoordinator`, a real coordinator on a random port
//! - `test_peer` - `TestPeer`, a raw protocol client with assertion helpers
//! - `mock_player` - `MockPlayer`, a scripted player for client tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use lockstep_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let coordinator = TestCoordinator::spawn().await?;
//!     let mut alice = TestPeer::join(coordinator.addr(), "alice").await?;
//!     let mut bob = TestPeer::join(coordinator.addr(), "bob").await?;
//!
//!     alice.set_ready(true).await?;
//!     bob.set_ready(true).await?;
//!     alice.expect_gate(true).await;
//!     Ok(())
//! }
//! ```

pub mod mock_player;
pub mod server_harness;
pub mod test_peer;

pub use mock_player::*;
pub use server_harness::*;
pub use test_peer::*;

use std::time::Duration;

/// How long assertion helpers wait before failing a test.
pub const EXPECT_TIMEOUT: Duration = Duration::from_secs(3);
