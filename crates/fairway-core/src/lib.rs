//! Shared contracts for the `fairway` workspace.
//!
//! This crate carries only what every other `fairway-*` crate needs to agree
//! on: the scoped buffer (C1 in the design docs), a stable error type, the
//! deadline/cancellation primitives, a clock abstraction, and the small id
//! types used to address shards and connections. It intentionally does not
//! know about scheduling, queueing, framing, or RPC — those live in their own
//! crates and depend on this one, not the other way around.

pub mod buffer;
pub mod contract;
pub mod error;
pub mod ids;
pub mod time;

pub use buffer::{RecvBuf, RemoteHandle, SendBuf, MIN_CHUNK_SIZE};
pub use contract::{Cancellation, Deadline};
pub use error::CoreError;
pub use ids::{ConnectionId, MessageId, ShardId};
pub use time::{Clock, Instant, SystemClock};
