//! The per-shard cooperative executor.
//!
//! A `fairway` process runs one [`shard::Shard`] per OS thread, each driving
//! its own single-threaded Tokio `LocalSet`. Work never migrates between
//! shards implicitly — crossing shard boundaries always goes through
//! [`shard::ShardHandle::submit`], which is explicit at every call site.
//! Everything in [`sync`] (condvar, gate, semaphore, bounded queue) and
//! [`timer`] assumes it's used within one shard's tasks, not shared racily
//! across OS threads.

pub mod error;
pub mod shard;
pub mod sync;
pub mod task;
pub mod timer;

pub use error::SchedError;
pub use shard::{Shard, ShardHandle, SubmitFuture};
pub use task::{spawn_local, LocalTaskHandle};
pub use timer::Timer;
