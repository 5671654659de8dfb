// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

/// Default number of concurrent in-flight vendor calls per process.
///
/// Sized for a typical vendor connection pool. The gate capacity should not exceed
/// the pool size of the transport, otherwise calls wait for connections inside the
/// per-attempt timeout instead of inside the admission budget.
pub(crate) const DEFAULT_CONCURRENCY: usize = 64;

/// Default local rate: 100 call starts per window.
pub(crate) const DEFAULT_RATE_LIMIT: u32 = 100;

/// Default length of the rate-limiting window.
pub(crate) const DEFAULT_RATE_WINDOW: Duration = Duration::from_secs(1);

/// Default admission budget covering rate limiter and concurrency gate waits.
pub(crate) const DEFAULT_ADMISSION_BUDGET: Duration = Duration::from_secs(2);

/// Default per-attempt timeout.
pub(crate) const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default end-to-end deadline for one logical call.
///
/// Should exceed `max_attempts * call_timeout` plus the backoff sum, otherwise the
/// last attempts are never reached.
pub(crate) const DEFAULT_SLA_DEADLINE: Duration = Duration::from_secs(60);

/// Default maximum attempts, including the first one.
///
/// The default is inherited from Polly v8, which also uses 3 attempts.
pub(crate) const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay of the backoff schedule.
pub(crate) const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(200);

/// Default upper bound of any single backoff delay.
pub(crate) const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(10);

/// Enable jitter by default to desynchronize clients.
pub(crate) const DEFAULT_USE_JITTER: bool = true;

/// Consecutive failures within the failure window that open the circuit.
pub(crate) const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Window in which consecutive failures are counted.
pub(crate) const DEFAULT_FAILURE_WINDOW: Duration = Duration::from_secs(60);

/// Consecutive probe successes that close a half-open circuit.
pub(crate) const DEFAULT_SUCCESS_THRESHOLD: u32 = 2;

/// Time the circuit stays open before probes are let through.
pub(crate) const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

/// Probes allowed in flight while the circuit is half-open.
pub(crate) const DEFAULT_HALF_OPEN_PROBES: u32 = 1;

/// Expiry of the shared breaker record, refreshed on every write.
pub(crate) const DEFAULT_BREAKER_STATE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Interval at which a saturated global rate limiter is polled again.
pub(crate) const DEFAULT_GLOBAL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Upper bound for the shielded cleanup that follows SLA expiry or cancellation.
pub(crate) const DEFAULT_CLEANUP_TIMEOUT: Duration = Duration::from_secs(1);

/// Key prefix for every record in the coordination store.
pub(crate) const DEFAULT_KEY_PREFIX: &str = "tollgate";

/// Default vendor key, used as the rate and breaker scope.
pub(crate) const DEFAULT_VENDOR_KEY: &str = "vendor";

/// Default hard limit of requests in flight through the admission controller.
pub(crate) const DEFAULT_MAX_IN_FLIGHT: usize = 1024;

/// Failure rate above which non-critical requests are shed.
pub(crate) const DEFAULT_ERROR_RATE_THRESHOLD: f32 = 0.5;

/// Minimum samples before the error rate is taken into account.
pub(crate) const DEFAULT_MIN_THROUGHPUT: u32 = 20;

/// Length of the sampling period used for the local error rate.
pub(crate) const DEFAULT_SAMPLING_DURATION: Duration = Duration::from_secs(30);

/// Minimum allowed length of the sampling period.
pub(crate) const MIN_SAMPLING_DURATION: Duration = Duration::from_secs(1);

/// Default transport connect timeout.
pub(crate) const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default transport read timeout.
pub(crate) const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(25);

/// Default transport write timeout.
pub(crate) const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for taking a connection out of the transport pool.
pub(crate) const DEFAULT_POOL_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(2);

/// Attempts of a compare-and-swap loop before the other writer is assumed to have won.
pub(crate) const MAX_CAS_ATTEMPTS: u32 = 8;
