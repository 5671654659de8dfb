// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::cmp::min;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::BackoffConfig;
use crate::rnd::JitterSource;

/// Width of the jitter band relative to the delay; 0.5 yields `[0.75*d, 1.25*d]`.
const JITTER_FACTOR: f64 = 0.5;

const EXPONENTIAL_FACTOR: f64 = 2.0;

/// Shape of the backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay for every retry.
    ///
    /// **Example with `2s` base delay:** `2s, 2s, 2s, ...`
    Constant,

    /// Delay grows with the attempt number.
    ///
    /// **Example with `2s` base delay:** `2s, 4s, 6s, ...`
    Linear,

    /// Delay doubles with each attempt.
    ///
    /// **Example with `2s` base delay:** `2s, 4s, 8s, ...`
    #[default]
    Exponential,
}

/// Computes the delay to wait after a failed attempt.
///
/// `delay` is a pure function of the attempt index, the configuration and the jitter
/// source, so injecting [`JitterSource::fixed`] makes it fully deterministic. Every
/// delay is clamped to the configured cap, both before and after jitter.
///
/// ```
/// use std::time::Duration;
///
/// use tollgate::{BackoffConfig, BackoffPolicy};
///
/// let policy = BackoffPolicy::new(&BackoffConfig {
///     base: Duration::from_millis(100),
///     cap: Duration::from_secs(1),
///     jitter: false,
///     ..BackoffConfig::default()
/// });
///
/// assert_eq!(policy.delay(0), Duration::from_millis(100));
/// assert_eq!(policy.delay(3), Duration::from_millis(800));
/// assert_eq!(policy.delay(10), Duration::from_secs(1));
/// ```
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    backoff: Backoff,
    base: Duration,
    cap: Duration,
    jitter: bool,
    source: JitterSource,
}

impl BackoffPolicy {
    /// Creates a policy with the default jitter source.
    #[must_use]
    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            backoff: config.kind,
            base: config.base,
            cap: config.cap,
            jitter: config.jitter,
            source: JitterSource::default(),
        }
    }

    /// Replaces the jitter source.
    #[must_use]
    pub fn with_jitter_source(mut self, source: JitterSource) -> Self {
        self.source = source;
        self
    }

    /// Upper bound of any delay.
    #[must_use]
    pub fn cap(&self) -> Duration {
        self.cap
    }

    /// Returns the delay to wait after attempt `attempt_index` (0-based) failed.
    #[must_use]
    pub fn delay(&self, attempt_index: u32) -> Duration {
        if self.base.is_zero() {
            return Duration::ZERO;
        }

        let delay = match self.backoff {
            Backoff::Constant => self.base,
            Backoff::Linear => self.base.saturating_mul(attempt_index.saturating_add(1)),
            Backoff::Exponential => duration_mul_pow2(self.base, attempt_index),
        };

        let delay = min(delay, self.cap);

        if self.jitter {
            min(apply_jitter(delay, &self.source), self.cap)
        } else {
            delay
        }
    }
}

fn duration_mul_pow2(base: Duration, attempt: u32) -> Duration {
    let factor = EXPONENTIAL_FACTOR.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
    secs_to_duration_saturating(base.as_secs_f64() * factor)
}

/// Adds a symmetric, uniform jitter centered on `delay`.
fn apply_jitter(delay: Duration, source: &JitterSource) -> Duration {
    let ms = delay.as_secs_f64() * 1000.0;
    let offset = (ms * JITTER_FACTOR) / 2.0;
    let random_delay = (ms * JITTER_FACTOR).mul_add(source.next_f64(), -offset);

    secs_to_duration_saturating((ms + random_delay) / 1000.0)
}

fn secs_to_duration_saturating(secs: f64) -> Duration {
    if secs <= 0.0 {
        return Duration::ZERO;
    }

    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}
