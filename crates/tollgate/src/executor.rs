// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The seam to the vendor transport.

use std::borrow::Cow;
use std::fmt::{self, Display};
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};

use crate::attempt::Attempt;
use crate::config::TransportTimeouts;
use crate::request::{CallRequest, CorrelationId};

/// Performs exactly one network round-trip to the vendor.
///
/// Implementations wrap the HTTP client of choice. They must not retry internally;
/// retries, timeouts around the whole attempt and admission are handled by the
/// [`Governor`][crate::Governor]. The transport should honor
/// [`AttemptContext::timeouts`] for its connect, read, write and pool phases.
pub trait CallExecutor: Send + Sync + 'static {
    /// Sends `request` and returns whatever the vendor answered.
    fn execute(&self, request: &CallRequest, context: &AttemptContext) -> impl Future<Output = Result<VendorResponse, TransportError>> + Send;
}

/// Per-attempt information handed to the executor.
#[derive(Debug, Clone, Copy)]
pub struct AttemptContext {
    attempt: Attempt,
    correlation_id: CorrelationId,
    timeouts: TransportTimeouts,
}

impl AttemptContext {
    pub(crate) fn new(attempt: Attempt, correlation_id: CorrelationId, timeouts: TransportTimeouts) -> Self {
        Self {
            attempt,
            correlation_id,
            timeouts,
        }
    }

    /// The attempt being executed.
    #[must_use]
    pub fn attempt(&self) -> Attempt {
        self.attempt
    }

    /// Correlation id of the call.
    #[must_use]
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Transport timeouts to apply.
    #[must_use]
    pub fn timeouts(&self) -> TransportTimeouts {
        self.timeouts
    }
}

/// What the vendor answered.
#[derive(Debug, Clone)]
pub struct VendorResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl VendorResponse {
    /// Creates a response without headers.
    #[must_use]
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Attaches headers.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Response status.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Response headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Response body.
    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Consumes the response and returns the body.
    #[must_use]
    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// `Retry-After` given in delta-seconds, if present.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        self.headers
            .get(http::header::RETRY_AFTER)?
            .to_str()
            .ok()?
            .trim()
            .parse::<u64>()
            .ok()
            .map(Duration::from_secs)
    }
}

/// Phase of the transport that timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeoutPhase {
    /// Establishing the connection.
    Connect,
    /// Waiting for the response.
    Read,
    /// Sending the request.
    Write,
    /// Waiting for a pooled connection.
    PoolAcquire,
}

/// Kind of transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// The connection could not be established or broke.
    Connect,
    /// A transport-level timeout fired.
    Timeout(TimeoutPhase),
    /// The response could not be understood.
    Protocol,
    /// Anything else.
    Other,
}

impl Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => f.write_str("connect"),
            Self::Timeout(phase) => write!(f, "{phase:?} timeout"),
            Self::Protocol => f.write_str("protocol"),
            Self::Other => f.write_str("other"),
        }
    }
}

/// The vendor could not be talked to.
#[derive(Debug, thiserror::Error)]
#[error("transport error ({kind}): {message}")]
pub struct TransportError {
    kind: TransportErrorKind,
    message: Cow<'static, str>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl TransportError {
    /// Creates a transport error.
    #[must_use]
    pub fn new(kind: TransportErrorKind, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Attaches the underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Kind of failure.
    #[must_use]
    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }
}
