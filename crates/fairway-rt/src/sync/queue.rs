//! A bounded, abortable async queue. Used to hand frames between a
//! connection's receive loop and whatever is consuming them (a stream
//! child, a dispatch point) without unbounded buffering.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

use crate::error::SchedError;

struct Inner<T> {
    capacity: usize,
    items: Mutex<VecDeque<T>>,
    not_full: Notify,
    not_empty: Notify,
    aborted: AtomicBool,
}

/// An async FIFO queue with a fixed capacity and a one-way "abort" switch.
#[derive(Clone)]
pub struct BoundedQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "BoundedQueue capacity must be positive");
        Self {
            inner: Arc::new(Inner {
                capacity,
                items: Mutex::new(VecDeque::with_capacity(capacity)),
                not_full: Notify::new(),
                not_empty: Notify::new(),
                aborted: AtomicBool::new(false),
            }),
        }
    }

    /// Push `item`, waiting for room if the queue is at capacity. Fails if
    /// the queue is aborted, either before the call or while waiting.
    pub async fn push_eventually(&self, item: T) -> Result<(), SchedError> {
        let mut item = Some(item);
        loop {
            if self.inner.aborted.load(Ordering::Acquire) {
                return Err(SchedError::Aborted);
            }
            let not_full = self.inner.not_full.notified();
            {
                let mut items = self.inner.items.lock().await;
                if items.len() < self.inner.capacity {
                    items.push_back(item.take().expect("item consumed twice"));
                    drop(items);
                    self.inner.not_empty.notify_one();
                    return Ok(());
                }
            }
            not_full.await;
        }
    }

    /// Pop the next item, waiting if the queue is empty. Fails once the
    /// queue is aborted and drained.
    pub async fn pop(&self) -> Result<T, SchedError> {
        loop {
            let not_empty = self.inner.not_empty.notified();
            {
                let mut items = self.inner.items.lock().await;
                if let Some(item) = items.pop_front() {
                    drop(items);
                    self.inner.not_full.notify_one();
                    return Ok(item);
                }
            }
            if self.inner.aborted.load(Ordering::Acquire) {
                return Err(SchedError::Aborted);
            }
            not_empty.await;
        }
    }

    /// Abort the queue: every blocked and future `push_eventually`/`pop`
    /// call fails, even if items remain buffered.
    pub fn abort(&self) {
        self.inner.aborted.store(true, Ordering::Release);
        self.inner.not_full.notify_waiters();
        self.inner.not_empty.notify_waiters();
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::Acquire)
    }

    pub async fn len(&self) -> usize {
        self.inner.items.lock().await.len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_then_pop_round_trips_in_fifo_order() {
        let queue = BoundedQueue::new(2);
        queue.push_eventually(1).await.unwrap();
        queue.push_eventually(2).await.unwrap();
        assert_eq!(queue.pop().await.unwrap(), 1);
        assert_eq!(queue.pop().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn push_blocks_until_capacity_frees_up() {
        let queue = BoundedQueue::new(1);
        queue.push_eventually(1).await.unwrap();

        let pusher = queue.clone();
        let pusher = tokio::spawn(async move { pusher.push_eventually(2).await });

        tokio::task::yield_now().await;
        assert!(!pusher.is_finished());

        assert_eq!(queue.pop().await.unwrap(), 1);
        pusher.await.unwrap().unwrap();
        assert_eq!(queue.pop().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn abort_wakes_a_blocked_pop_with_an_error() {
        let queue: BoundedQueue<u32> = BoundedQueue::new(1);
        let popper = queue.clone();
        let popper = tokio::spawn(async move { popper.pop().await });

        tokio::task::yield_now().await;
        queue.abort();

        assert!(matches!(popper.await.unwrap(), Err(SchedError::Aborted)));
    }

    #[tokio::test]
    async fn abort_drains_buffered_items_before_failing() {
        let queue = BoundedQueue::new(2);
        queue.push_eventually(1).await.unwrap();
        queue.abort();
        assert_eq!(queue.pop().await.unwrap(), 1);
        assert!(matches!(queue.pop().await, Err(SchedError::Aborted)));
    }
}
