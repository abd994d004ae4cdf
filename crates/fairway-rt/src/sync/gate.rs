//! A gate: tracks in-flight work and lets a shutdown path wait for all of it
//! to finish while refusing any new entries. Grounded on the
//! enter/leave/close-and-drain shutdown gates used throughout connection
//! teardown.

use std::cell::Cell;
use std::rc::Rc;

use tokio::sync::Notify;

use crate::error::SchedError;

struct Inner {
    count: Cell<usize>,
    closed: Cell<bool>,
    notify: Notify,
}

/// A shard-local (not `Send`) entry gate.
#[derive(Clone)]
pub struct Gate {
    inner: Rc<Inner>,
}

impl Gate {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(Inner {
                count: Cell::new(0),
                closed: Cell::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Register one unit of in-flight work. Fails with
    /// [`SchedError::GateClosed`] once [`Gate::close`] has been called.
    pub fn enter(&self) -> Result<GateGuard, SchedError> {
        if self.inner.closed.get() {
            return Err(SchedError::GateClosed);
        }
        self.inner.count.set(self.inner.count.get() + 1);
        Ok(GateGuard {
            gate: self.clone(),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }

    pub fn count(&self) -> usize {
        self.inner.count.get()
    }

    /// Stop accepting new entries and wait for every outstanding
    /// [`GateGuard`] to drop. Idempotent: calling this more than once just
    /// waits again.
    pub async fn close(&self) {
        self.inner.closed.set(true);
        loop {
            let notified = self.inner.notify.notified();
            if self.inner.count.get() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof of one [`Gate::enter`]. Dropping it releases the slot and, if the
/// gate is closed and this was the last one, wakes whoever is in
/// [`Gate::close`].
pub struct GateGuard {
    gate: Gate,
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        let remaining = self.gate.inner.count.get() - 1;
        self.gate.inner.count.set(remaining);
        if remaining == 0 {
            self.gate.inner.notify.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enter_after_close_is_rejected() {
        let gate = Gate::new();
        let _guard = gate.enter().unwrap();
        gate.inner.closed.set(true);
        assert!(matches!(gate.enter(), Err(SchedError::GateClosed)));
    }

    #[tokio::test]
    async fn close_waits_for_outstanding_guards_to_drop() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let gate = Gate::new();
                let guard = gate.enter().unwrap();

                let closer_gate = gate.clone();
                let closer = tokio::task::spawn_local(async move {
                    closer_gate.close().await;
                });

                tokio::task::yield_now().await;
                assert!(gate.is_closed());
                assert_eq!(gate.count(), 1);

                drop(guard);
                closer.await.unwrap();
                assert_eq!(gate.count(), 0);
            })
            .await;
    }

    #[test]
    fn close_with_no_outstanding_entries_is_instant() {
        let gate = Gate::new();
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        rt.block_on(gate.close());
        assert!(gate.is_closed());
    }
}
