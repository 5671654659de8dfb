// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Governor for outbound calls to a rate-limited, occasionally failing vendor.
//!
//! A fleet of processes that all call the same vendor needs to agree on how hard it
//! may push. [`Governor`] wraps a [`CallExecutor`] and runs every call through a
//! fixed pipeline of protections:
//!
//! | Layer | Scope | Fails with |
//! |---|---|---|
//! | [`AdmissionController`] | process | [`ErrorKind::AdmissionRejected`] |
//! | SLA deadline | call | [`ErrorKind::SlaExceeded`] |
//! | [`CircuitBreaker`] | fleet | [`ErrorKind::CircuitOpen`] |
//! | [`GlobalRateLimiter`] | fleet | [`ErrorKind::RateLimited`] |
//! | [`LocalRateLimiter`] | process | [`ErrorKind::RateLimited`] |
//! | [`ConcurrencyGate`] | process | [`ErrorKind::ConcurrencyExhausted`] |
//! | call timeout | attempt | [`ErrorKind::VendorTimeout`] |
//!
//! The breaker and the global limiter share state through a [`SharedCoordinator`].
//! [`InMemoryCoordinator`] covers a single process and tests; the `tollgate_redis`
//! crate provides a Redis-backed implementation for a fleet.
//!
//! # Retries
//!
//! Failed attempts are classified by [`classify`]. Retryable failures are retried
//! after a [`BackoffPolicy`] delay, during which the attempt holds no concurrency slot
//! and no rate permit. A `Retry-After` header on a 5xx response replaces the backoff
//! delay, capped at the backoff cap.
//!
//! # Deadlines and cancellation
//!
//! When the SLA deadline elapses or the caller drops the future returned by
//! [`Governor::call`], the in-flight attempt is abandoned. A cleanup task that is not
//! affected by the cancellation emits an [`AbandonedRecord`] and records a breaker
//! failure for the attempt that was talking to the vendor.
//!
//! # Observability
//!
//! Each attempt produces an [`AttemptRecord`] handed to every registered
//! [`AttemptObserver`]. [`TracingObserver`] is registered by default and logs through
//! `tracing`. With the `metrics` feature, `MetricsObserver` reports OpenTelemetry
//! metrics.
//!
//! # Configuration
//!
//! [`GovernorConfig`] deserializes with `serde`; durations are given in milliseconds
//! and every field has a default.
//!
//! ```
//! use tollgate::GovernorConfig;
//!
//! let config: GovernorConfig = serde_json::from_str(
//!     r#"{ "vendor_key": "payments", "concurrency": 16, "local_rate": { "limit": 50, "window": 1000 } }"#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.concurrency, 16);
//! assert!(config.validate().is_ok());
//! ```

mod admission;
mod attempt;
mod backoff;
mod breaker;
mod clock;
mod config;
mod constants;
mod coordinator;
mod error;
mod executor;
mod gate;
mod governor;
mod health;
#[cfg(any(feature = "metrics", test))]
mod metrics;
mod observe;
mod rate_limit;
mod request;
mod retry;
mod rnd;
#[cfg(test)]
mod testing;

pub use admission::{AdmissionController, AdmissionDecision, InFlight, ShedReason};
pub use attempt::Attempt;
pub use backoff::{Backoff, BackoffPolicy};
pub use breaker::{BreakerDecision, CircuitBreaker, CircuitState, ExecutionMode};
pub use config::{
    AdmissionConfig, AdmissionTimeoutRetry, BackoffConfig, BreakerConfig, ConfigError, GovernorConfig, RateConfig,
    TransportTimeouts,
};
pub use coordinator::{CoordinatorError, InMemoryCoordinator, SharedCoordinator, WindowDecision, WindowRequest};
pub use error::{CallError, ErrorKind, FailureClass, RateScope};
pub use executor::{AttemptContext, CallExecutor, TimeoutPhase, TransportError, TransportErrorKind, VendorResponse};
pub use gate::{ConcurrencyGate, GateTimedOut, Slot};
pub use governor::{CallResponse, Governor, GovernorBuilder};
#[cfg(any(feature = "metrics", test))]
#[cfg_attr(docsrs, doc(cfg(feature = "metrics")))]
pub use metrics::MetricsObserver;
pub use observe::{AbandonReason, AbandonedRecord, AttemptObserver, AttemptOutcome, AttemptRecord, TracingObserver};
pub use rate_limit::{GlobalRateLimiter, LocalRateLimiter, RateLimitTimedOut, RatePermit};
pub use request::{CallRequest, CallRequestBuilder, CallerId, CorrelationId, Priority};
pub use retry::{Verdict, classify};
pub use rnd::JitterSource;
