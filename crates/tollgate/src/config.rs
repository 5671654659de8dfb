// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Configuration of the governor.
//!
//! Every knob has a default taken from the crate constants. Configurations can be
//! loaded from any `serde` format; durations are encoded as integer milliseconds.
//!
//! ```
//! use std::time::Duration;
//!
//! use tollgate::GovernorConfig;
//!
//! let config: GovernorConfig = serde_json::from_str(
//!     r#"{ "vendor_key": "payments", "concurrency": 8, "call_timeout": 1500 }"#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.vendor_key, "payments");
//! assert_eq!(config.concurrency, 8);
//! assert_eq!(config.call_timeout, Duration::from_millis(1500));
//! assert!(config.validate().is_ok());
//! ```

use std::borrow::Cow;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::Backoff;
use crate::constants::*;

/// Top-level configuration of a [`Governor`][crate::Governor].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct GovernorConfig {
    /// Identifies the vendor; scopes rate limits and the shared breaker record.
    pub vendor_key: String,

    /// Prefix of every key written to the coordination store.
    pub key_prefix: String,

    /// Capacity of the per-process concurrency gate.
    pub concurrency: usize,

    /// Per-process rate limit.
    pub local_rate: RateConfig,

    /// Fleet-wide rate limit enforced through the coordination store, if any.
    pub global_rate: Option<RateConfig>,

    /// Interval at which a saturated global limiter is polled again.
    #[serde(with = "duration_ms")]
    pub global_poll_interval: Duration,

    /// Time an attempt may wait for rate permits and a concurrency slot.
    #[serde(with = "duration_ms")]
    pub admission_budget: Duration,

    /// Per-attempt timeout around the vendor call.
    #[serde(with = "duration_ms")]
    pub call_timeout: Duration,

    /// End-to-end deadline of a call when the request carries none.
    #[serde(with = "duration_ms")]
    pub sla_deadline: Duration,

    /// Upper bound of the cleanup that runs after SLA expiry or cancellation.
    #[serde(with = "duration_ms")]
    pub cleanup_timeout: Duration,

    /// Maximum attempts per call, including the first one.
    pub max_attempts: u32,

    /// Whether admission timeouts (rate or gate waits) are retried.
    pub admission_timeout_retry: AdmissionTimeoutRetry,

    /// Backoff between attempts.
    pub backoff: BackoffConfig,

    /// Shared circuit breaker.
    pub breaker: BreakerConfig,

    /// Outer admission control and load shedding.
    pub admission: AdmissionConfig,

    /// Transport timeouts handed to the call executor.
    pub transport: TransportTimeouts,

    /// Admit calls when the coordination store cannot be reached.
    pub fail_open: bool,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            vendor_key: DEFAULT_VENDOR_KEY.to_string(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            local_rate: RateConfig::default(),
            global_rate: None,
            global_poll_interval: DEFAULT_GLOBAL_POLL_INTERVAL,
            admission_budget: DEFAULT_ADMISSION_BUDGET,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            sla_deadline: DEFAULT_SLA_DEADLINE,
            cleanup_timeout: DEFAULT_CLEANUP_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            admission_timeout_retry: AdmissionTimeoutRetry::default(),
            backoff: BackoffConfig::default(),
            breaker: BreakerConfig::default(),
            admission: AdmissionConfig::default(),
            transport: TransportTimeouts::default(),
            fail_open: true,
        }
    }
}

impl GovernorConfig {
    /// Creates the default configuration for the given vendor.
    #[must_use]
    pub fn new(vendor_key: impl Into<String>) -> Self {
        Self {
            vendor_key: vendor_key.into(),
            ..Self::default()
        }
    }

    /// Checks that the configuration can drive a governor.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] naming the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.vendor_key.is_empty() {
            return Err(ConfigError::invalid("vendor_key", "must not be empty"));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::invalid("concurrency", "must be at least 1"));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts", "must be at least 1"));
        }
        if self.call_timeout.is_zero() {
            return Err(ConfigError::invalid("call_timeout", "must be positive"));
        }
        if self.sla_deadline.is_zero() {
            return Err(ConfigError::invalid("sla_deadline", "must be positive"));
        }
        if self.global_poll_interval.is_zero() {
            return Err(ConfigError::invalid("global_poll_interval", "must be positive"));
        }

        self.local_rate.validate("local_rate")?;
        if let Some(global) = &self.global_rate {
            global.validate("global_rate")?;
        }
        if self.backoff.cap < self.backoff.base {
            return Err(ConfigError::invalid("backoff.cap", "must not be below backoff.base"));
        }
        self.breaker.validate()?;
        self.admission.validate()
    }
}

/// Sliding-window rate limit: at most `limit` call starts per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateConfig {
    /// Maximum call starts within one window.
    pub limit: u32,

    /// Length of the window.
    #[serde(with = "duration_ms")]
    pub window: Duration,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_RATE_LIMIT,
            window: DEFAULT_RATE_WINDOW,
        }
    }
}

impl RateConfig {
    /// Creates a limit of `limit` call starts per `window`.
    #[must_use]
    pub fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window }
    }

    fn validate(&self, field: &'static str) -> Result<(), ConfigError> {
        if self.limit == 0 {
            return Err(ConfigError::invalid(field, "limit must be at least 1"));
        }
        if self.window.is_zero() {
            return Err(ConfigError::invalid(field, "window must be positive"));
        }
        Ok(())
    }
}

/// Whether attempts that time out waiting for local admission are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionTimeoutRetry {
    /// Local admission timeouts end the call. Retrying would only deepen the queue.
    #[default]
    Never,

    /// A timeout of the first attempt is retried once after backoff.
    Once,
}

/// Backoff schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Shape of the schedule.
    pub kind: Backoff,

    /// Delay after the first failed attempt, before jitter.
    #[serde(with = "duration_ms")]
    pub base: Duration,

    /// Upper bound of any delay.
    #[serde(with = "duration_ms")]
    pub cap: Duration,

    /// Spread delays by ±25%.
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            kind: Backoff::default(),
            base: DEFAULT_BACKOFF_BASE,
            cap: DEFAULT_BACKOFF_CAP,
            jitter: DEFAULT_USE_JITTER,
        }
    }
}

/// Shared circuit breaker settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// Window in which consecutive failures are counted.
    #[serde(with = "duration_ms")]
    pub failure_window: Duration,

    /// Consecutive probe successes that close the circuit again.
    pub success_threshold: u32,

    /// Time the circuit stays open before probing.
    #[serde(with = "duration_ms")]
    pub cooldown: Duration,

    /// Probes allowed in flight while half-open.
    pub half_open_max_probes: u32,

    /// Expiry of the shared record, refreshed on every write.
    #[serde(with = "duration_ms")]
    pub state_ttl: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            failure_window: DEFAULT_FAILURE_WINDOW,
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
            cooldown: DEFAULT_COOLDOWN,
            half_open_max_probes: DEFAULT_HALF_OPEN_PROBES,
            state_ttl: DEFAULT_BREAKER_STATE_TTL,
        }
    }
}

impl BreakerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("breaker.failure_threshold", "must be at least 1"));
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::invalid("breaker.success_threshold", "must be at least 1"));
        }
        if self.half_open_max_probes == 0 {
            return Err(ConfigError::invalid("breaker.half_open_max_probes", "must be at least 1"));
        }
        if self.state_ttl < self.cooldown {
            return Err(ConfigError::invalid("breaker.state_ttl", "must not be below breaker.cooldown"));
        }
        Ok(())
    }
}

/// Outer admission control settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Hard limit of requests in flight; critical requests are shed only beyond it.
    pub max_in_flight: usize,

    /// Requests a single caller may have in flight, if limited.
    pub per_caller_max_in_flight: Option<usize>,

    /// Failure rate at which non-critical requests are shed.
    pub error_rate_threshold: f32,

    /// Samples required before the failure rate is considered.
    pub min_throughput: u32,

    /// Period over which the failure rate is sampled.
    #[serde(with = "duration_ms")]
    pub sampling_duration: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            per_caller_max_in_flight: None,
            error_rate_threshold: DEFAULT_ERROR_RATE_THRESHOLD,
            min_throughput: DEFAULT_MIN_THROUGHPUT,
            sampling_duration: DEFAULT_SAMPLING_DURATION,
        }
    }
}

impl AdmissionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_in_flight == 0 {
            return Err(ConfigError::invalid("admission.max_in_flight", "must be at least 1"));
        }
        if self.per_caller_max_in_flight == Some(0) {
            return Err(ConfigError::invalid("admission.per_caller_max_in_flight", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.error_rate_threshold) {
            return Err(ConfigError::invalid("admission.error_rate_threshold", "must be within 0.0..=1.0"));
        }
        Ok(())
    }
}

/// Timeouts of the vendor transport, passed to the call executor with every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportTimeouts {
    /// Establishing a connection.
    #[serde(with = "duration_ms")]
    pub connect: Duration,

    /// Waiting for response bytes.
    #[serde(with = "duration_ms")]
    pub read: Duration,

    /// Sending request bytes.
    #[serde(with = "duration_ms")]
    pub write: Duration,

    /// Taking a connection out of the pool.
    #[serde(with = "duration_ms")]
    pub pool_acquire: Duration,
}

impl Default for TransportTimeouts {
    fn default() -> Self {
        Self {
            connect: DEFAULT_CONNECT_TIMEOUT,
            read: DEFAULT_READ_TIMEOUT,
            write: DEFAULT_WRITE_TIMEOUT,
            pool_acquire: DEFAULT_POOL_ACQUIRE_TIMEOUT,
        }
    }
}

/// A configuration value is out of range.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid configuration for `{field}`: {reason}")]
pub struct ConfigError {
    field: &'static str,
    reason: Cow<'static, str>,
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<Cow<'static, str>>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }

    /// Name of the offending field.
    #[must_use]
    pub fn field(&self) -> &'static str {
        self.field
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
