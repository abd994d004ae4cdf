//! A weighted semaphore that can be broken: every blocked and future
//! `acquire` then fails instead of hanging, used to unblock backpressured
//! senders when a connection or shard is torn down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::SchedError;

/// A counting semaphore supporting multi-unit acquires, plus an explicit
/// "broken" state.
#[derive(Clone)]
pub struct WeightedSemaphore {
    inner: Arc<tokio::sync::Semaphore>,
    broken: Arc<AtomicBool>,
}

impl WeightedSemaphore {
    pub fn new(units: usize) -> Self {
        Self {
            inner: Arc::new(tokio::sync::Semaphore::new(units)),
            broken: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Acquire `units` permits, waiting if necessary.
    pub async fn acquire(&self, units: u32) -> Result<SemaphorePermit, SchedError> {
        if self.broken.load(Ordering::Acquire) {
            return Err(SchedError::Broken);
        }
        match self.inner.acquire_many(units).await {
            Ok(permit) => {
                permit.forget();
                Ok(SemaphorePermit {
                    sem: Arc::clone(&self.inner),
                    units,
                })
            }
            Err(_closed) => Err(SchedError::Broken),
        }
    }

    /// Try to acquire without waiting.
    pub fn try_acquire(&self, units: u32) -> Result<SemaphorePermit, SchedError> {
        if self.broken.load(Ordering::Acquire) {
            return Err(SchedError::Broken);
        }
        match self.inner.try_acquire_many(units) {
            Ok(permit) => {
                permit.forget();
                Ok(SemaphorePermit {
                    sem: Arc::clone(&self.inner),
                    units,
                })
            }
            Err(_) => Err(SchedError::Broken),
        }
    }

    pub fn available_units(&self) -> usize {
        self.inner.available_permits()
    }

    /// Permanently break the semaphore: every waiter, current and future,
    /// fails with [`SchedError::Broken`].
    pub fn break_all(&self) {
        self.broken.store(true, Ordering::Release);
        self.inner.close();
    }

    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }
}

/// Proof of an acquired allotment. Dropping it returns the units.
pub struct SemaphorePermit {
    sem: Arc<tokio::sync::Semaphore>,
    units: u32,
}

impl Drop for SemaphorePermit {
    fn drop(&mut self) {
        self.sem.add_permits(self.units as usize);
    }
}
