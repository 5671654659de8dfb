// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Sliding-window limits on call starts.
//!
//! Both limiters guarantee that within any window of length `W` at most `L` permits
//! are handed out per scope key. The [`LocalRateLimiter`] counts inside this process,
//! the [`GlobalRateLimiter`] counts across the fleet through a
//! [`SharedCoordinator`][crate::SharedCoordinator].

mod global;
mod local;

use std::time::Duration;

pub use global::GlobalRateLimiter;
pub use local::LocalRateLimiter;

use crate::error::RateScope;

/// No permit became available within the wait budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{scope:?} rate limit: no permit available after {waited:?}")]
pub struct RateLimitTimedOut {
    /// The limiter that timed out.
    pub scope: RateScope,
    /// How long the caller waited.
    pub waited: Duration,
}

/// A consumed call start.
///
/// Permits are not returned when dropped: a call start stays counted for the whole
/// window. [`LocalRateLimiter::refund`] and [`GlobalRateLimiter::refund`] take the
/// start back when the call never went out.
#[derive(Debug)]
pub struct RatePermit {
    scope: RateScope,
    key: String,
    ticket: Ticket,
    waited: Duration,
}

#[derive(Debug)]
enum Ticket {
    Local(u64),
    Global(String),
    // admitted without a record because the store was unreachable
    Untracked,
}

impl RatePermit {
    /// The limiter that issued the permit.
    #[must_use]
    pub fn scope(&self) -> RateScope {
        self.scope
    }

    /// Time spent waiting for the permit.
    #[must_use]
    pub fn waited(&self) -> Duration {
        self.waited
    }
}
