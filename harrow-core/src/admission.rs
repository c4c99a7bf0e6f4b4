//! Bound on the number of pipelines running at once.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// FIFO admission gate over a fixed number of slots.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// One occupied slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionController {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot. Never fails, only delays.
    pub async fn acquire(&self) -> AdmissionPermit {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .expect("admission semaphore is never closed");
        AdmissionPermit { _permit: permit }
    }

    /// Like [`acquire`](Self::acquire), but gives up when `cancel` fires
    /// while the caller is still queued.
    pub async fn acquire_or_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> Option<AdmissionPermit> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = self.acquire() => Some(permit),
        }
    }

    pub fn release(&self, permit: AdmissionPermit) {
        drop(permit);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }
}
