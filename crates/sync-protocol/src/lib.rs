//! Wire protocol shared by the Lockstep coordinator and its clients.
//!
//! Every message is one [`Event`](event::Event) encoded as a single line of
//! JSON. The transport only guarantees per-connection FIFO order.

#![warn(clippy::pedantic)]

pub mod codec;
pub mod event;

pub use codec::{decode_event, encode_event, CodecError, EventCodec, MAX_LINE_LENGTH};
pub use event::Event;
