// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use serde::{Deserialize, Serialize};

use crate::clock::millis;
use crate::config::BreakerConfig;

/// State of the shared circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow normally.
    #[default]
    Closed,
    /// Calls are rejected without reaching the vendor.
    Open,
    /// A bounded number of probe calls test whether the vendor recovered.
    HalfOpen,
}

/// How an allowed call runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionMode {
    /// The circuit was closed.
    Normal,
    /// The call is a half-open probe; its outcome decides the next state.
    Probe,
}

/// The record every process reads and writes through compare-and-swap.
///
/// Timestamps are Unix milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct BreakerRecord {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub failures_since: u64,
    pub consecutive_successes: u32,
    pub opened_at: u64,
    pub half_opened_at: u64,
    pub probes_in_flight: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Entry {
    Allowed(ExecutionMode),
    Rejected { retry_after_millis: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    Unchanged,
    Opened,
    HalfOpened,
    Closed,
    Reopened,
}

impl BreakerRecord {
    pub fn enter(&mut self, now: u64, config: &BreakerConfig) -> (Entry, Transition) {
        let cooldown = millis(config.cooldown);

        match self.state {
            CircuitState::Closed => (Entry::Allowed(ExecutionMode::Normal), Transition::Unchanged),
            CircuitState::Open => {
                let reopens_at = self.opened_at.saturating_add(cooldown);
                if now < reopens_at {
                    return (
                        Entry::Rejected {
                            retry_after_millis: reopens_at - now,
                        },
                        Transition::Unchanged,
                    );
                }

                *self = Self {
                    state: CircuitState::HalfOpen,
                    opened_at: self.opened_at,
                    half_opened_at: now,
                    probes_in_flight: 1,
                    ..Self::default()
                };
                (Entry::Allowed(ExecutionMode::Probe), Transition::HalfOpened)
            }
            CircuitState::HalfOpen => {
                if self.probes_in_flight < config.half_open_max_probes {
                    self.probes_in_flight += 1;
                    return (Entry::Allowed(ExecutionMode::Probe), Transition::Unchanged);
                }

                // probes that never reported back are written off after another cooldown
                let refresh_at = self.half_opened_at.saturating_add(cooldown);
                if now >= refresh_at {
                    self.half_opened_at = now;
                    self.probes_in_flight = 1;
                    return (Entry::Allowed(ExecutionMode::Probe), Transition::Unchanged);
                }

                (
                    Entry::Rejected {
                        retry_after_millis: refresh_at - now,
                    },
                    Transition::Unchanged,
                )
            }
        }
    }

    pub fn succeed(&mut self, mode: ExecutionMode, config: &BreakerConfig) -> Transition {
        match (self.state, mode) {
            (CircuitState::Closed, _) => {
                self.consecutive_failures = 0;
                Transition::Unchanged
            }
            (CircuitState::HalfOpen, ExecutionMode::Probe) => {
                self.probes_in_flight = self.probes_in_flight.saturating_sub(1);
                self.consecutive_successes = self.consecutive_successes.saturating_add(1);

                if self.consecutive_successes >= config.success_threshold {
                    *self = Self::default();
                    Transition::Closed
                } else {
                    Transition::Unchanged
                }
            }
            // results of calls admitted before the circuit opened are stale
            (CircuitState::Open, _) | (CircuitState::HalfOpen, ExecutionMode::Normal) => Transition::Unchanged,
        }
    }

    pub fn fail(&mut self, mode: ExecutionMode, now: u64, config: &BreakerConfig) -> Transition {
        match (self.state, mode) {
            (CircuitState::Closed, _) => {
                let window_expired = now.saturating_sub(self.failures_since) > millis(config.failure_window);
                if self.consecutive_failures == 0 || window_expired {
                    self.consecutive_failures = 1;
                    self.failures_since = now;
                } else {
                    self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                }

                if self.consecutive_failures >= config.failure_threshold {
                    self.open(now);
                    Transition::Opened
                } else {
                    Transition::Unchanged
                }
            }
            (CircuitState::HalfOpen, ExecutionMode::Probe) => {
                self.open(now);
                Transition::Reopened
            }
            (CircuitState::Open, _) | (CircuitState::HalfOpen, ExecutionMode::Normal) => Transition::Unchanged,
        }
    }

    pub fn cancel_probe(&mut self) {
        if self.state == CircuitState::HalfOpen {
            self.probes_in_flight = self.probes_in_flight.saturating_sub(1);
        }
    }

    fn open(&mut self, now: u64) {
        *self = Self {
            state: CircuitState::Open,
            opened_at: now,
            ..Self::default()
        };
    }
}
