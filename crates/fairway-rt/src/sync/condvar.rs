//! A `wait_until(predicate)` condition variable built on `tokio::sync::Notify`.

use tokio::sync::Notify;

/// Lets any number of tasks wait for a caller-supplied predicate to become
/// true, woken by [`Condvar::notify_waiters`].
///
/// The predicate is re-checked after every wake, so spurious or
/// over-eager notifications are harmless — this is the same contract as a
/// POSIX condvar used correctly, just without a paired mutex (the shard
/// model means there's no concurrent mutation to protect against, only
/// ordering to observe).
pub struct Condvar {
    notify: Notify,
}

impl Condvar {
    pub fn new() -> Self {
        Self {
            notify: Notify::new(),
        }
    }

    /// Wake every task currently parked in [`Condvar::wait_until`].
    pub fn notify_waiters(&self) {
        self.notify.notify_waiters();
    }

    /// Suspend until `predicate` returns `true`.
    ///
    /// The `Notified` future is constructed *before* each predicate check so
    /// a `notify_waiters` call that lands between the check and the await
    /// point is still observed — this is the pattern `tokio::sync::Notify`'s
    /// own docs recommend, not an incidental detail.
    pub async fn wait_until<F>(&self, mut predicate: F)
    where
        F: FnMut() -> bool,
    {
        loop {
            let notified = self.notify.notified();
            if predicate() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[tokio::test]
    async fn wait_until_wakes_after_notify_flips_predicate() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let condvar = Rc::new(Condvar::new());
                let ready = Rc::new(Cell::new(false));

                let waiter_condvar = Rc::clone(&condvar);
                let waiter_ready = Rc::clone(&ready);
                let waiter = tokio::task::spawn_local(async move {
                    waiter_condvar.wait_until(|| waiter_ready.get()).await;
                });

                tokio::task::yield_now().await;
                ready.set(true);
                condvar.notify_waiters();

                waiter.await.unwrap();
            })
            .await;
    }
}
