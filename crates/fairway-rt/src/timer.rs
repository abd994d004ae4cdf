//! Cancellable one-shot timers.
//!
//! A [`Timer`] races its own deadline against an external [`Timer::cancel`]
//! call; exactly one of "fire" or "cancel" wins, enforced with a single CAS
//! so double-cancel and cancel-after-fire are both safe no-ops.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::task::spawn_local;

const PENDING: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

/// A timer started with [`Timer::after`]. Dropping the handle does not
/// cancel the timer — call [`Timer::cancel`] explicitly, same as the
/// scheduler's other "explicit is better than implicit" primitives.
#[derive(Clone)]
pub struct Timer {
    state: Arc<AtomicU8>,
}

impl Timer {
    /// Schedule `callback` to run after `duration`, on the current shard.
    /// Must be called from inside a running `LocalSet` (see
    /// [`crate::shard::Shard`]).
    pub fn after<F>(duration: Duration, callback: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        let state = Arc::new(AtomicU8::new(PENDING));
        let state_for_task = Arc::clone(&state);
        spawn_local(async move {
            tokio::time::sleep(duration).await;
            if state_for_task
                .compare_exchange(PENDING, FIRED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                callback();
            }
        });
        Self { state }
    }

    /// Cancel the timer if it has not already fired. Returns `true` if this
    /// call is the one that suppressed it, `false` if it had already fired
    /// or already been cancelled.
    pub fn cancel(&self) -> bool {
        self.state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn has_fired(&self) -> bool {
        self.state.load(Ordering::Acquire) == FIRED
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }
}
