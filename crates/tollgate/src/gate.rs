// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

/// No slot became available within the wait budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no concurrency slot available after {waited:?}")]
pub struct GateTimedOut {
    /// How long the caller waited.
    pub waited: Duration,
}

/// Bounds the number of vendor calls in flight in this process.
///
/// Capacity is fixed at construction. Slots are handed out in FIFO order by the
/// underlying semaphore.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl ConcurrencyGate {
    /// Creates a gate with `capacity` slots.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Waits up to `wait_budget` for a free slot.
    ///
    /// # Errors
    ///
    /// Returns [`GateTimedOut`] when no slot frees up in time.
    pub async fn reserve(&self, wait_budget: Duration) -> Result<Slot, GateTimedOut> {
        let start = Instant::now();

        // fast path keeps zero budgets usable
        if let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() {
            return Ok(Slot::new(permit, Duration::ZERO));
        }

        match tokio::time::timeout(wait_budget, Arc::clone(&self.semaphore).acquire_owned()).await {
            Ok(Ok(permit)) => Ok(Slot::new(permit, start.elapsed())),
            // the semaphore is never closed, so both arms mean "no slot"
            Ok(Err(_)) | Err(_) => Err(GateTimedOut { waited: start.elapsed() }),
        }
    }

    /// Slots currently held.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.capacity.saturating_sub(self.semaphore.available_permits())
    }

    /// Total number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// A reserved concurrency slot.
///
/// The slot is returned either by [`release`][Self::release] or on drop, whichever
/// comes first; it is never returned twice.
#[derive(Debug)]
pub struct Slot {
    permit: Option<OwnedSemaphorePermit>,
    waited: Duration,
}

impl Slot {
    fn new(permit: OwnedSemaphorePermit, waited: Duration) -> Self {
        Self {
            permit: Some(permit),
            waited,
        }
    }

    /// Returns the slot to the gate.
    ///
    /// The first call returns `true`; later calls do nothing and return `false`.
    pub fn release(&mut self) -> bool {
        self.permit.take().is_some()
    }

    /// Whether the slot is still held.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.permit.is_some()
    }

    /// Time spent waiting for the slot.
    #[must_use]
    pub fn waited(&self) -> Duration {
        self.waited
    }
}
