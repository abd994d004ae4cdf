//! Cancellation and deadline primitives shared by the scheduler, fair queue,
//! and RPC engine. Deliberately minimal: a `Deadline` is just an optional
//! absolute instant, and a `Cancellation` is just a shared flag. Neither
//! drives anything by itself — callers are responsible for checking them at
//! their own suspension points, per the "explicit, visible cancellation"
//! requirement the scheduler is built around.

use crate::time::Instant;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A shared cancellation flag. Cloning a `Cancellation` produces another
/// handle to the *same* underlying flag — there is no tree of child tokens,
/// just independent observers of one bit.
#[derive(Clone, Debug, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Mark this token cancelled. Returns `true` if this call was the one
    /// that flipped it (idempotent: a second call returns `false` and does
    /// nothing further), matching the "double-cancel must be idempotent"
    /// requirement.
    pub fn cancel(&self) -> bool {
        self.flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// An absolute point in time after which an operation should be treated as
/// expired. `Deadline::none()` means "no deadline".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    pub const fn none() -> Self {
        Self { at: None }
    }

    pub fn at(instant: Instant) -> Self {
        Self { at: Some(instant) }
    }

    pub fn instant(&self) -> Option<Instant> {
        self.at
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        matches!(self.at, Some(deadline) if now >= deadline)
    }

    /// Remaining time until the deadline, or `None` if there is no deadline
    /// or it has already passed.
    pub fn remaining(&self, now: Instant) -> Option<std::time::Duration> {
        self.at.and_then(|deadline| {
            if deadline > now {
                Some(deadline - now)
            } else {
                None
            }
        })
    }
}
