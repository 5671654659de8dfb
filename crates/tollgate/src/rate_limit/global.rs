// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use super::{RateLimitTimedOut, RatePermit, Ticket};
use crate::clock::Clock;
use crate::config::RateConfig;
use crate::coordinator::{SharedCoordinator, WindowDecision, WindowRequest};
use crate::error::RateScope;

/// Fleet-wide sliding-window rate limiter.
///
/// Every acquisition is one atomic window operation on the coordination store. A full
/// window is polled again after `min(retry_after, poll_interval)` until the wait budget
/// is used up.
///
/// When the store fails, the limiter admits the call (`fail_open`) or reports a
/// timeout. Either way a warning is logged.
#[derive(Debug)]
pub struct GlobalRateLimiter<C> {
    coordinator: Arc<C>,
    config: RateConfig,
    key_prefix: String,
    poll_interval: Duration,
    fail_open: bool,
    clock: Clock,
}

impl<C: SharedCoordinator> GlobalRateLimiter<C> {
    /// Creates a limiter over `coordinator`.
    #[must_use]
    pub fn new(coordinator: Arc<C>, config: RateConfig, key_prefix: impl Into<String>, poll_interval: Duration, fail_open: bool) -> Self {
        Self {
            coordinator,
            config,
            key_prefix: key_prefix.into(),
            poll_interval,
            fail_open,
            clock: Clock::new(),
        }
    }

    pub(crate) fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Waits up to `wait_budget` for a permit in `scope`.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitTimedOut`] when the fleet-wide window stays full for the
    /// whole budget.
    pub async fn acquire(&self, scope: &str, wait_budget: Duration) -> Result<RatePermit, RateLimitTimedOut> {
        let start = Instant::now();
        let deadline = start + wait_budget;
        let key = self.key(scope);
        let member = Uuid::new_v4().simple().to_string();

        loop {
            let request = WindowRequest {
                member: &member,
                limit: self.config.limit,
                window: self.config.window,
                now_millis: self.clock.unix_millis(),
            };

            let retry_after = match self.coordinator.sliding_window_acquire(&key, request).await {
                Ok(WindowDecision::Acquired) => {
                    return Ok(RatePermit {
                        scope: RateScope::Global,
                        key,
                        ticket: Ticket::Global(member),
                        waited: start.elapsed(),
                    });
                }
                Ok(WindowDecision::Full { retry_after }) => retry_after,
                Err(error) => {
                    tracing::event!(
                        name: "tollgate.rate_limit.store_error",
                        tracing::Level::WARN,
                        rate_limit.key = %key,
                        rate_limit.fail_open = self.fail_open,
                        error = %error,
                    );

                    if self.fail_open {
                        return Ok(RatePermit {
                            scope: RateScope::Global,
                            key,
                            ticket: Ticket::Untracked,
                            waited: start.elapsed(),
                        });
                    }
                    return Err(RateLimitTimedOut {
                        scope: RateScope::Global,
                        waited: start.elapsed(),
                    });
                }
            };

            let now = Instant::now();
            if now >= deadline {
                return Err(RateLimitTimedOut {
                    scope: RateScope::Global,
                    waited: start.elapsed(),
                });
            }

            let pause = retry_after.min(self.poll_interval).min(deadline - now);
            tokio::time::sleep(pause).await;
        }
    }

    /// Takes back a permit whose call never started.
    pub async fn refund(&self, permit: RatePermit) {
        let Ticket::Global(member) = permit.ticket else {
            return;
        };

        if let Err(error) = self.coordinator.sliding_window_release(&permit.key, &member).await {
            tracing::event!(
                name: "tollgate.rate_limit.store_error",
                tracing::Level::WARN,
                rate_limit.key = %permit.key,
                error = %error,
            );
        }
    }

    fn key(&self, scope: &str) -> String {
        format!("{}:rate:{scope}", self.key_prefix)
    }
}
