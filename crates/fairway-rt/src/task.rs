//! Local task handles.
//!
//! A task spawned with [`spawn_local`] runs on whichever shard's `LocalSet`
//! is currently polling — it must be called from inside one (see
//! [`crate::shard::Shard`]). The returned handle, though, is an ordinary
//! `Send` value once the task's output type is `Send`, so it can be awaited
//! from wherever is convenient.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A handle to a task spawned onto the current shard's `LocalSet`.
///
/// Polling this future waits for the task to finish. If the task panicked,
/// the panic is re-raised on the first poll after completion, matching
/// `tokio::task::JoinHandle`'s behavior — callers that want to observe a
/// panic without propagating it should catch it at the task body instead.
pub struct LocalTaskHandle<T> {
    inner: tokio::task::JoinHandle<T>,
}

impl<T> LocalTaskHandle<T> {
    /// Request cancellation of the underlying task. Cancellation is
    /// cooperative at the next `.await` point inside the task, same as
    /// `tokio::task::JoinHandle::abort`.
    pub fn abort(&self) {
        self.inner.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

impl<T> Future for LocalTaskHandle<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll(cx) {
            Poll::Ready(Ok(value)) => Poll::Ready(value),
            Poll::Ready(Err(join_err)) => {
                std::panic::resume_unwind(join_err.into_panic());
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Spawn `fut` onto the current shard's `LocalSet`. Panics if called from
/// outside one — this mirrors `tokio::task::spawn_local`'s own contract and
/// is a programmer error, not a runtime condition callers should recover
/// from.
pub fn spawn_local<F>(fut: F) -> LocalTaskHandle<F::Output>
where
    F: Future + 'static,
    F::Output: 'static,
{
    LocalTaskHandle {
        inner: tokio::task::spawn_local(fut),
    }
}
