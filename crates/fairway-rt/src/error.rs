//! Errors produced by the scheduler primitives. These are failure modes of
//! the *scheduling* layer, not of application code running on top of it —
//! an application's own errors travel back through its own return types.

/// Things that can go wrong waiting on a scheduler primitive.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    /// The target shard's command channel is gone (its thread exited).
    #[error("target shard is no longer running")]
    ShardGone,

    /// A [`crate::sync::BoundedQueue`] was aborted while a caller was
    /// blocked on push or pop.
    #[error("queue was aborted")]
    Aborted,

    /// A [`crate::sync::WeightedSemaphore`] was broken while a caller was
    /// blocked on acquire, or had already been broken before the call.
    #[error("semaphore is broken")]
    Broken,

    /// A [`crate::sync::Gate`] has been closed and rejects new entries.
    #[error("gate is closed")]
    GateClosed,
}
