//! A shard is one OS thread running a single, dedicated Tokio `LocalSet` on
//! top of a current-thread runtime. All work that belongs to a shard — a
//! connection's send/receive loops, its fair-queue bookkeeping, its timers —
//! runs as `!Send` tasks on that one `LocalSet`, so none of it needs locks.
//!
//! Talking to a shard from another thread (or another shard) goes through
//! [`ShardHandle::submit`], which hands a closure across a channel and
//! brings the result back through a oneshot.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use fairway_core::ShardId;
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::SchedError;

type BoxedCommand = Box<dyn FnOnce() + Send + 'static>;

/// An owned, running shard. [`Shard::shutdown`] stops the loop even if
/// other [`ShardHandle`] clones are still alive elsewhere — shutdown is
/// driven by an explicit signal, not by the command channel's senders all
/// dropping, since cross-shard handles are meant to outlive any one holder.
pub struct Shard {
    id: ShardId,
    handle: ShardHandle,
    stop_tx: watch::Sender<bool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl Shard {
    /// Start a shard on a fresh OS thread.
    pub fn spawn(id: ShardId) -> Self {
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<BoxedCommand>();
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let thread = std::thread::Builder::new()
            .name(format!("fairway-shard-{}", id.0))
            .spawn(move || {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                    .expect("failed to build shard runtime");
                let local = tokio::task::LocalSet::new();

                local.block_on(&rt, async move {
                    loop {
                        tokio::select! {
                            _ = stop_rx.changed() => break,
                            maybe_cmd = cmd_rx.recv() => {
                                match maybe_cmd {
                                    // Commands run synchronously here, inside
                                    // the LocalSet context, so they're free
                                    // to call `tokio::task::spawn_local`.
                                    Some(cmd) => cmd(),
                                    None => break,
                                }
                            }
                        }
                    }
                });

                tracing::debug!(target: "fairway::rt", shard = id.0, "shard thread exiting");
            })
            .expect("failed to spawn shard thread");

        Self {
            id,
            handle: ShardHandle { id, cmd_tx },
            stop_tx,
            thread: Some(thread),
        }
    }

    pub fn id(&self) -> ShardId {
        self.id
    }

    /// A cloneable, `Send` proxy other shards and threads use to submit work
    /// here.
    pub fn handle(&self) -> ShardHandle {
        self.handle.clone()
    }

    /// Stop the shard and block until its thread exits, regardless of how
    /// many [`ShardHandle`] clones are still outstanding — submissions
    /// racing with shutdown simply resolve to [`SchedError::ShardGone`]
    /// once the loop has exited and dropped the receiver.
    pub fn shutdown(mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Shard {
    fn drop(&mut self) {
        if self.thread.is_some() {
            let _ = self.stop_tx.send(true);
        }
        // Deliberately not joined here: `Drop` can't block safely inside an
        // async context, and `shutdown` is the documented way to wait for
        // the thread to exit. Dropping without calling `shutdown` just
        // signals the stop and leaks the `JoinHandle`.
    }
}

/// A `Clone + Send + Sync` proxy for submitting work to a [`Shard`] from any
/// thread, including another shard's.
#[derive(Clone)]
pub struct ShardHandle {
    id: ShardId,
    cmd_tx: mpsc::UnboundedSender<BoxedCommand>,
}

impl ShardHandle {
    pub fn id(&self) -> ShardId {
        self.id
    }

    /// Run `f` on this shard and resolve once it (and the future it
    /// returns) completes. `f` itself must be `Send` to cross into the
    /// channel, but the future it produces, and its internal state, need
    /// not be — it runs entirely on the target shard's `LocalSet`.
    ///
    /// Submissions issued from the same calling shard arrive here in the
    /// order they were sent, because that shard issues them one at a time
    /// from its own single thread and the underlying channel is FIFO per
    /// sender.
    pub fn submit<F, Fut, T>(&self, f: F) -> SubmitFuture<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let cmd: BoxedCommand = Box::new(move || {
            crate::task::spawn_local(async move {
                let result = f().await;
                let _ = tx.send(result);
            });
        });
        // If the shard is gone, `rx` is dropped along with `tx` and the
        // receiver observes a RecvError, which we map to ShardGone below.
        let _ = self.cmd_tx.send(cmd);
        SubmitFuture { rx }
    }
}

/// The future returned by [`ShardHandle::submit`].
pub struct SubmitFuture<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Future for SubmitFuture<T> {
    type Output = Result<T, SchedError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(value)) => Poll::Ready(Ok(value)),
            Poll::Ready(Err(_)) => Poll::Ready(Err(SchedError::ShardGone)),
            Poll::Pending => Poll::Pending,
        }
    }
}
