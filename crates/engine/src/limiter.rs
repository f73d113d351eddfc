//! Bounded concurrency for in-flight transfers.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Caps how many transfers run at once.
///
/// Slots are handed out in FIFO order, so a burst of waiting chunk tasks
/// proceeds in the order they asked.
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    max: usize,
}

impl ConcurrencyLimiter {
    /// Creates a limiter with `max` slots. A limit of 0 is treated as 1.
    pub fn new(max: usize) -> Self {
        let max = max.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max)),
            max,
        }
    }

    /// Waits until a slot is free and claims it until the returned permit
    /// is dropped.
    pub async fn acquire(&self) -> LimiterPermit {
        // The semaphore is never closed, so acquire cannot fail.
        let permit = self.semaphore.clone().acquire_owned().await.unwrap();
        LimiterPermit { _permit: permit }
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn max(&self) -> usize {
        self.max
    }
}

/// A held concurrency slot. Dropping it frees the slot.
pub struct LimiterPermit {
    _permit: OwnedSemaphorePermit,
}
