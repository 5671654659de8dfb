// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Fleet-wide circuit breaker.
//!
//! The breaker state lives in one record in the coordination store, so a vendor
//! outage observed by some processes stops calls from all of them. Every state change
//! is a compare-and-swap on that record; a lost race re-reads and re-applies.
//!
//! ```text
//!            failure_threshold consecutive failures
//!   Closed ───────────────────────────────────────▶ Open
//!     ▲                                              │ cooldown elapsed,
//!     │ success_threshold probe successes            │ first allow()
//!     │                                              ▼
//!     └──────────────────────────────────────── HalfOpen
//!                    any probe failure: back to Open
//! ```

mod record;

use std::sync::Arc;
use std::time::Duration;

use record::{BreakerRecord, Entry, Transition};
pub use record::{CircuitState, ExecutionMode};

use crate::clock::Clock;
use crate::config::BreakerConfig;
use crate::constants::MAX_CAS_ATTEMPTS;
use crate::coordinator::{CoordinatorError, SharedCoordinator};

/// Outcome of [`CircuitBreaker::allow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerDecision {
    /// The call may proceed in the given mode.
    Allowed(ExecutionMode),
    /// The circuit is open.
    Rejected {
        /// Time until the breaker lets probes through.
        retry_after: Duration,
    },
}

/// Circuit breaker backed by a [`SharedCoordinator`].
///
/// When the store cannot be reached, `allow` fails open or closed according to
/// `fail_open`, and outcomes are dropped. Both cases are logged.
#[derive(Debug)]
pub struct CircuitBreaker<C> {
    coordinator: Arc<C>,
    config: BreakerConfig,
    key: String,
    fail_open: bool,
    clock: Clock,
}

impl<C: SharedCoordinator> CircuitBreaker<C> {
    /// Creates a breaker for `vendor_key`.
    #[must_use]
    pub fn new(coordinator: Arc<C>, config: BreakerConfig, key_prefix: &str, vendor_key: &str, fail_open: bool) -> Self {
        Self {
            coordinator,
            config,
            key: format!("{key_prefix}:breaker:{vendor_key}"),
            fail_open,
            clock: Clock::new(),
        }
    }

    pub(crate) fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Decides whether a call may go out.
    pub async fn allow(&self) -> BreakerDecision {
        let config = self.config;
        let outcome = self.update(|record, now| record.enter(now, &config)).await;

        match outcome {
            Ok((entry, transition)) => {
                self.log_transition(transition);
                match entry {
                    Entry::Allowed(mode) => BreakerDecision::Allowed(mode),
                    Entry::Rejected { retry_after_millis } => BreakerDecision::Rejected {
                        retry_after: Duration::from_millis(retry_after_millis),
                    },
                }
            }
            Err(error) => {
                tracing::event!(
                    name: "tollgate.breaker.store_error",
                    tracing::Level::WARN,
                    breaker.key = %self.key,
                    breaker.fail_open = self.fail_open,
                    error = %error,
                );

                if self.fail_open {
                    BreakerDecision::Allowed(ExecutionMode::Normal)
                } else {
                    BreakerDecision::Rejected {
                        retry_after: self.config.cooldown,
                    }
                }
            }
        }
    }

    /// Records that a call admitted in `mode` succeeded.
    pub async fn record_success(&self, mode: ExecutionMode) {
        let config = self.config;
        self.record("success", |record, _| record.succeed(mode, &config)).await;
    }

    /// Records that a call admitted in `mode` failed.
    pub async fn record_failure(&self, mode: ExecutionMode) {
        let config = self.config;
        self.record("failure", |record, now| record.fail(mode, now, &config)).await;
    }

    /// Returns an unused probe, for a probe that never reached the vendor.
    pub async fn cancel_probe(&self) {
        self.record("cancel_probe", |record, _| {
            record.cancel_probe();
            Transition::Unchanged
        })
        .await;
    }

    /// Closes the circuit by removing the shared record.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError`] when the store fails.
    pub async fn reset(&self) -> Result<(), CoordinatorError> {
        self.coordinator.delete(&self.key).await?;
        tracing::event!(name: "tollgate.breaker", tracing::Level::INFO, breaker.key = %self.key, breaker.transition = "reset");
        Ok(())
    }

    /// Current state as seen by this process.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError`] when the store fails.
    pub async fn state(&self) -> Result<CircuitState, CoordinatorError> {
        let raw = self.coordinator.get(&self.key).await?;
        Ok(self.decode(raw.as_deref()).state)
    }

    async fn record(&self, outcome: &'static str, apply: impl FnMut(&mut BreakerRecord, u64) -> Transition + Send) {
        match self.update(apply).await {
            Ok(Transition::Unchanged) => {}
            Ok(transition) => self.log_transition(transition),
            Err(error) => {
                tracing::event!(
                    name: "tollgate.breaker.store_error",
                    tracing::Level::WARN,
                    breaker.key = %self.key,
                    breaker.outcome = outcome,
                    error = %error,
                );
            }
        }
    }

    async fn update<R, F>(&self, mut apply: F) -> Result<R, CoordinatorError>
    where
        F: FnMut(&mut BreakerRecord, u64) -> R + Send,
        R: Send,
    {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let raw = self.coordinator.get(&self.key).await?;
            let current = self.decode(raw.as_deref());

            let mut next = current.clone();
            let result = apply(&mut next, self.clock.unix_millis());
            if next == current {
                return Ok(result);
            }

            let encoded =
                serde_json::to_string(&next).map_err(|error| CoordinatorError::caused_by("cannot encode breaker record", error))?;

            if self
                .coordinator
                .compare_and_swap(&self.key, raw.as_deref(), &encoded, self.config.state_ttl)
                .await?
            {
                return Ok(result);
            }
        }

        Err(CoordinatorError::new(format!(
            "breaker record '{}' still contended after {MAX_CAS_ATTEMPTS} attempts",
            self.key
        )))
    }

    fn decode(&self, raw: Option<&str>) -> BreakerRecord {
        let Some(raw) = raw else {
            return BreakerRecord::default();
        };

        serde_json::from_str(raw).unwrap_or_else(|error| {
            tracing::event!(
                name: "tollgate.breaker.corrupt_record",
                tracing::Level::WARN,
                breaker.key = %self.key,
                error = %error,
            );
            BreakerRecord::default()
        })
    }

    fn log_transition(&self, transition: Transition) {
        let (name, level_warn) = match transition {
            Transition::Opened => ("opened", true),
            Transition::Reopened => ("reopened", true),
            Transition::HalfOpened => ("half_opened", false),
            Transition::Closed => ("closed", false),
            Transition::Unchanged => return,
        };

        if level_warn {
            tracing::event!(name: "tollgate.breaker", tracing::Level::WARN, breaker.key = %self.key, breaker.transition = name);
        } else {
            tracing::event!(name: "tollgate.breaker", tracing::Level::INFO, breaker.key = %self.key, breaker.transition = name);
        }
    }
}
