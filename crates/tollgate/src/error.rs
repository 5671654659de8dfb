// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::time::Duration;

use http::StatusCode;
use recoverable::{Recovery, RecoveryInfo};

/// The closed set of ways a call can fail.
///
/// Every failed call surfaces exactly one kind. Classification into retryable and
/// terminal outcomes is done by [`classify`][crate::classify].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Shed by the admission controller before any resource was reserved.
    AdmissionRejected,
    /// The shared circuit breaker is open.
    CircuitOpen,
    /// No rate permit became available within the admission budget.
    RateLimited,
    /// No concurrency slot became available within the admission budget.
    ConcurrencyExhausted,
    /// Connection-level failure, including timeouts reported by the transport.
    VendorTransportError,
    /// The per-attempt timeout elapsed.
    VendorTimeout,
    /// The vendor answered 4xx.
    VendorClientError,
    /// The vendor answered 5xx.
    VendorServerError,
    /// The end-to-end deadline elapsed.
    SlaExceeded,
}

impl ErrorKind {
    /// Stable snake-case name used in logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AdmissionRejected => "admission_rejected",
            Self::CircuitOpen => "circuit_open",
            Self::RateLimited => "rate_limited",
            Self::ConcurrencyExhausted => "concurrency_exhausted",
            Self::VendorTransportError => "vendor_transport_error",
            Self::VendorTimeout => "vendor_timeout",
            Self::VendorClientError => "vendor_client_error",
            Self::VendorServerError => "vendor_server_error",
            Self::SlaExceeded => "sla_exceeded",
        }
    }

    /// Returns `true` when the vendor was actually reached or tried.
    #[must_use]
    pub fn is_vendor_failure(self) -> bool {
        matches!(
            self,
            Self::VendorTransportError | Self::VendorTimeout | Self::VendorClientError | Self::VendorServerError
        )
    }

    /// Ingress-facing category of this kind.
    #[must_use]
    pub fn class(self) -> FailureClass {
        match self {
            Self::AdmissionRejected | Self::ConcurrencyExhausted => FailureClass::Overloaded,
            Self::RateLimited => FailureClass::RateLimited,
            Self::CircuitOpen => FailureClass::UpstreamUnavailable,
            Self::VendorTransportError | Self::VendorServerError => FailureClass::UpstreamFailed,
            Self::VendorClientError => FailureClass::ClientError,
            Self::VendorTimeout | Self::SlaExceeded => FailureClass::Timeout,
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a failure is reported to the ingress caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// This process is shedding load.
    Overloaded,
    /// Call-start budget exhausted.
    RateLimited,
    /// The vendor is considered down; no call was made.
    UpstreamUnavailable,
    /// The vendor failed after all attempts.
    UpstreamFailed,
    /// The vendor rejected the request.
    ClientError,
    /// A deadline elapsed.
    Timeout,
}

impl FailureClass {
    /// HTTP status the ingress should answer with.
    ///
    /// Local budgets that ran out answer 429, like a gRPC `RESOURCE_EXHAUSTED`. An
    /// open circuit answers 503, so callers can tell "no call was made" from a
    /// vendor that kept failing (502).
    #[must_use]
    pub fn status_code(self) -> StatusCode {
        match self {
            Self::Overloaded | Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::UpstreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::UpstreamFailed => StatusCode::BAD_GATEWAY,
            Self::ClientError => StatusCode::BAD_REQUEST,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

/// Which rate limiter ran out of budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateScope {
    /// The per-process limiter.
    Local,
    /// The fleet-wide limiter in the coordination store.
    Global,
}

/// The single error surfaced for a failed call.
///
/// ```
/// use tollgate::{CallError, ErrorKind, FailureClass};
///
/// let error = CallError::new(ErrorKind::CircuitOpen, "circuit is open");
/// assert_eq!(error.kind(), ErrorKind::CircuitOpen);
/// assert_eq!(error.class(), FailureClass::UpstreamUnavailable);
/// assert_eq!(error.to_string(), "circuit_open: circuit is open");
/// ```
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct CallError {
    kind: ErrorKind,
    message: Cow<'static, str>,
    attempts: u32,
    status: Option<StatusCode>,
    retry_after: Option<Duration>,
    rate_scope: Option<RateScope>,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl CallError {
    /// Creates an error of the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            message: message.into(),
            attempts: 0,
            status: None,
            retry_after: None,
            rate_scope: None,
            source: None,
        }
    }

    pub(crate) fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    pub(crate) fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub(crate) fn with_rate_scope(mut self, scope: RateScope) -> Self {
        self.rate_scope = Some(scope);
        self
    }

    pub(crate) fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub(crate) fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Kind of failure.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Ingress-facing category.
    #[must_use]
    pub fn class(&self) -> FailureClass {
        self.kind.class()
    }

    /// HTTP status the ingress should answer with.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        self.class().status_code()
    }

    /// Human-readable detail.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Attempts started before the call failed; zero when it never got past admission.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Status the vendor answered with, for vendor client and server errors.
    #[must_use]
    pub fn vendor_status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Hint for when trying again may succeed.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    /// Limiter that timed out, for [`ErrorKind::RateLimited`].
    #[must_use]
    pub fn rate_scope(&self) -> Option<RateScope> {
        self.rate_scope
    }
}

impl Recovery for CallError {
    fn recovery(&self) -> RecoveryInfo {
        let info = match self.kind {
            ErrorKind::VendorTransportError
            | ErrorKind::VendorTimeout
            | ErrorKind::VendorServerError
            | ErrorKind::RateLimited
            | ErrorKind::ConcurrencyExhausted
            | ErrorKind::AdmissionRejected => RecoveryInfo::retry(),
            ErrorKind::CircuitOpen => RecoveryInfo::unavailable(),
            ErrorKind::VendorClientError | ErrorKind::SlaExceeded => RecoveryInfo::never(),
        };

        match self.retry_after {
            Some(delay) => info.delay(delay),
            None => info,
        }
    }
}
