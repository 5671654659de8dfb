// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Access to the fleet-wide coordination store.
//!
//! The breaker and the global rate limiter share state with every other process
//! through [`SharedCoordinator`]. The trait only exposes atomic primitives, so an
//! implementation never has to understand breaker or limiter semantics.

mod memory;

use std::time::Duration;

pub use memory::InMemoryCoordinator;

/// Outcome of [`SharedCoordinator::sliding_window_acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowDecision {
    /// The member was added to the window.
    Acquired,
    /// The window is full; the oldest entry leaves it after `retry_after`.
    Full {
        /// Time until the next entry expires.
        retry_after: Duration,
    },
}

/// Arguments of a sliding-window acquisition.
#[derive(Debug, Clone, Copy)]
pub struct WindowRequest<'a> {
    /// Unique id of the entry; used to release it again.
    pub member: &'a str,
    /// Maximum entries inside the window.
    pub limit: u32,
    /// Length of the window.
    pub window: Duration,
    /// Current time in Unix milliseconds; entries at or before `now - window` are evicted.
    pub now_millis: u64,
}

/// Capability interface of the coordination store.
///
/// Every operation must be atomic with respect to concurrent callers in any process.
/// Implementations exist for process memory ([`InMemoryCoordinator`]) and Redis
/// (`tollgate_redis`).
pub trait SharedCoordinator: Send + Sync + 'static {
    /// Reads a value.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, CoordinatorError>> + Send;

    /// Writes `new` if the current value equals `expected`, where `None` means absent.
    ///
    /// Returns whether the write happened. A successful write sets the key to expire after `ttl`.
    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, CoordinatorError>> + Send;

    /// Increments a counter and returns the new value; a new counter expires after `ttl`.
    fn increment(&self, key: &str, ttl: Duration) -> impl Future<Output = Result<i64, CoordinatorError>> + Send;

    /// Removes a key.
    fn delete(&self, key: &str) -> impl Future<Output = Result<(), CoordinatorError>> + Send;

    /// Evicts expired entries and adds `request.member` if fewer than `request.limit` remain.
    fn sliding_window_acquire(
        &self,
        key: &str,
        request: WindowRequest<'_>,
    ) -> impl Future<Output = Result<WindowDecision, CoordinatorError>> + Send;

    /// Removes a member added by [`sliding_window_acquire`][Self::sliding_window_acquire].
    fn sliding_window_release(&self, key: &str, member: &str) -> impl Future<Output = Result<(), CoordinatorError>> + Send;
}

/// The coordination store failed or could not be reached.
#[derive(Debug, thiserror::Error)]
#[error("coordination store error: {message}")]
pub struct CoordinatorError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl CoordinatorError {
    /// Creates an error with a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an error wrapping an underlying cause.
    #[must_use]
    pub fn caused_by(message: impl Into<String>, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}
