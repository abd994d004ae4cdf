//! Shard-local synchronization primitives. These assume they're used from
//! within a single shard's cooperative tasks — there's no real contention,
//! just ordering between suspended tasks, so the implementations favor
//! clarity over lock-free cleverness.

mod condvar;
mod gate;
mod queue;
mod semaphore;

pub use condvar::Condvar;
pub use gate::{Gate, GateGuard};
pub use queue::BoundedQueue;
pub use semaphore::{SemaphorePermit, WeightedSemaphore};
