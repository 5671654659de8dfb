// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::{RateLimitTimedOut, RatePermit, Ticket};
use crate::config::RateConfig;
use crate::error::RateScope;

#[derive(Debug, Default)]
struct Log {
    starts: VecDeque<(Instant, u64)>,
    next_ticket: u64,
}

/// Per-process sliding-log rate limiter.
///
/// Each scope keeps the instants of its admitted call starts. A waiter sleeps until the
/// oldest start leaves the window and then competes again, so nobody spins.
#[derive(Debug)]
pub struct LocalRateLimiter {
    limit: usize,
    window: Duration,
    scopes: Mutex<HashMap<String, Log>>,
}

impl LocalRateLimiter {
    /// Creates a limiter admitting `config.limit` starts per `config.window` and scope.
    #[must_use]
    pub fn new(config: RateConfig) -> Self {
        Self {
            limit: usize::try_from(config.limit).unwrap_or(usize::MAX),
            window: config.window,
            scopes: Mutex::new(HashMap::new()),
        }
    }

    /// Waits up to `wait_budget` for a permit in `scope`.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitTimedOut`] as soon as it is clear that no permit frees up
    /// within the budget.
    pub async fn acquire(&self, scope: &str, wait_budget: Duration) -> Result<RatePermit, RateLimitTimedOut> {
        let start = Instant::now();
        let deadline = start + wait_budget;

        loop {
            let next_free = match self.try_acquire(scope) {
                Ok(ticket) => {
                    return Ok(RatePermit {
                        scope: RateScope::Local,
                        key: scope.to_string(),
                        ticket: Ticket::Local(ticket),
                        waited: start.elapsed(),
                    });
                }
                Err(next_free) => next_free,
            };

            if next_free > deadline {
                return Err(RateLimitTimedOut {
                    scope: RateScope::Local,
                    waited: start.elapsed(),
                });
            }

            tokio::time::sleep_until(next_free).await;
        }
    }

    /// Takes back a permit whose call never started.
    pub fn refund(&self, permit: RatePermit) {
        let Ticket::Local(ticket) = permit.ticket else {
            return;
        };

        if let Some(log) = self.scopes.lock().get_mut(&permit.key) {
            log.starts.retain(|(_, t)| *t != ticket);
        }
    }

    /// Permits issued in `scope` within the current window.
    #[must_use]
    pub fn in_window(&self, scope: &str) -> usize {
        let now = Instant::now();
        self.scopes
            .lock()
            .get(scope)
            .map_or(0, |log| log.starts.iter().filter(|(at, _)| now.duration_since(*at) < self.window).count())
    }

    // Ok(ticket) on success, Err(instant at which the oldest start expires) otherwise.
    fn try_acquire(&self, scope: &str) -> Result<u64, Instant> {
        let now = Instant::now();
        let mut scopes = self.scopes.lock();
        let log = scopes.entry(scope.to_string()).or_default();

        while let Some((at, _)) = log.starts.front()
            && now.duration_since(*at) >= self.window
        {
            log.starts.pop_front();
        }

        if log.starts.len() < self.limit {
            let ticket = log.next_ticket;
            log.next_ticket = log.next_ticket.wrapping_add(1);
            log.starts.push_back((now, ticket));
            return Ok(ticket);
        }

        Err(log.starts.front().map_or(now, |(at, _)| *at + self.window))
    }
}
