// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::{self, Display};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

/// Priority tier used by the admission controller when shedding load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Shed first.
    Sheddable,
    /// Shed under pressure.
    #[default]
    Standard,
    /// Shed only at the hard in-flight limit.
    Critical,
}

/// Identity of the upstream caller, used for per-caller fairness.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallerId(Arc<str>);

impl CallerId {
    /// Creates a caller identity.
    #[must_use]
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Returns the identity as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CallerId {
    fn default() -> Self {
        Self::new("anonymous")
    }
}

impl Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CallerId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

/// Correlates every record emitted for one logical call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generates a random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for CorrelationId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// A single logical call to the vendor.
///
/// The request is immutable once built; retries resend the same payload.
///
/// ```
/// use std::time::Duration;
///
/// use tollgate::{CallRequest, Priority};
///
/// let request = CallRequest::builder("{\"amount\":10}")
///     .caller("checkout")
///     .priority(Priority::Critical)
///     .timeout(Duration::from_secs(5))
///     .build();
///
/// assert_eq!(request.caller().as_str(), "checkout");
/// assert_eq!(request.priority(), Priority::Critical);
/// assert!(request.deadline().is_some());
/// ```
#[derive(Debug, Clone)]
pub struct CallRequest {
    payload: Bytes,
    caller: CallerId,
    priority: Priority,
    deadline: Option<Instant>,
    correlation_id: CorrelationId,
}

impl CallRequest {
    /// Creates a request with default caller, priority and correlation id.
    #[must_use]
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self::builder(payload).build()
    }

    /// Starts building a request.
    #[must_use]
    pub fn builder(payload: impl Into<Bytes>) -> CallRequestBuilder {
        CallRequestBuilder {
            request: Self {
                payload: payload.into(),
                caller: CallerId::default(),
                priority: Priority::default(),
                deadline: None,
                correlation_id: CorrelationId::generate(),
            },
        }
    }

    /// Opaque request body sent to the vendor.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Who issued the call.
    #[must_use]
    pub fn caller(&self) -> &CallerId {
        &self.caller
    }

    /// Shedding tier.
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Absolute end-to-end deadline, if the caller set one.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Correlation id shared by all attempts.
    #[must_use]
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }
}

/// Builder for [`CallRequest`].
#[derive(Debug)]
pub struct CallRequestBuilder {
    request: CallRequest,
}

impl CallRequestBuilder {
    /// Sets the caller identity.
    #[must_use]
    pub fn caller(mut self, caller: impl Into<CallerId>) -> Self {
        self.request.caller = caller.into();
        self
    }

    /// Sets the priority tier.
    #[must_use]
    pub fn priority(mut self, priority: Priority) -> Self {
        self.request.priority = priority;
        self
    }

    /// Sets an absolute deadline.
    #[must_use]
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.request.deadline = Some(deadline);
        self
    }

    /// Sets the deadline relative to now.
    #[must_use]
    pub fn timeout(self, timeout: Duration) -> Self {
        self.deadline(Instant::now() + timeout)
    }

    /// Uses an existing correlation id, e.g. one propagated from upstream.
    #[must_use]
    pub fn correlation_id(mut self, id: impl Into<CorrelationId>) -> Self {
        self.request.correlation_id = id.into();
        self
    }

    /// Finishes the request.
    #[must_use]
    pub fn build(self) -> CallRequest {
        self.request
    }
}
