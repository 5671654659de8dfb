// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;
use std::fmt::{self, Display};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::config::AdmissionConfig;
use crate::health::HealthWindow;
use crate::request::{CallRequest, CallerId, Priority};

/// Outcome of [`AdmissionController::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// The request may proceed.
    Accept,
    /// The request is shed.
    Reject(ShedReason),
}

/// Why a request was shed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShedReason {
    /// Too many requests in flight for the request's tier.
    QueueDepth,
    /// The vendor error rate is too high for the request's tier.
    ErrorRate,
    /// The caller already uses its share of in-flight requests.
    CallerQuota,
}

impl Display for ShedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::QueueDepth => "queue depth",
            Self::ErrorRate => "vendor error rate",
            Self::CallerQuota => "caller quota",
        })
    }
}

/// Local load shedding in front of every other layer.
///
/// [`admit`][Self::admit] is O(1), never blocks on I/O and looks at process-local
/// state only: in-flight depth, per-caller in-flight counts and the recent vendor
/// error rate. Depth thresholds depend on the tier:
///
/// | Tier | Shed at depth | Shed when error rate is unhealthy |
/// |---|---|---|
/// | `Sheddable` | 50% of `max_in_flight` | yes |
/// | `Standard` | 80% of `max_in_flight` | yes |
/// | `Critical` | `max_in_flight` | no |
#[derive(Debug)]
pub struct AdmissionController {
    config: AdmissionConfig,
    in_flight: Arc<AtomicUsize>,
    callers: Arc<Mutex<HashMap<CallerId, usize>>>,
    health: Mutex<HealthWindow>,
}

impl AdmissionController {
    /// Creates a controller.
    #[must_use]
    pub fn new(config: AdmissionConfig) -> Self {
        Self {
            health: Mutex::new(HealthWindow::new(
                config.sampling_duration,
                config.error_rate_threshold,
                config.min_throughput,
            )),
            config,
            in_flight: Arc::new(AtomicUsize::new(0)),
            callers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Decides whether `request` may proceed, without reserving anything.
    ///
    /// Concurrent callers can all see room for one more request; use
    /// [`try_enter`][Self::try_enter] to admit and reserve in one step.
    #[must_use]
    pub fn admit(&self, request: &CallRequest) -> AdmissionDecision {
        let depth = self.in_flight.load(Ordering::Acquire);
        if depth >= self.depth_limit(request.priority()) {
            return AdmissionDecision::Reject(ShedReason::QueueDepth);
        }

        if let Some(limit) = self.config.per_caller_max_in_flight {
            let used = self.callers.lock().get(request.caller()).copied().unwrap_or(0);
            if used >= limit {
                return AdmissionDecision::Reject(ShedReason::CallerQuota);
            }
        }

        if self.sheds_on_error_rate(request.priority()) {
            return AdmissionDecision::Reject(ShedReason::ErrorRate);
        }

        AdmissionDecision::Accept
    }

    /// Admits `request` and counts it as in flight until the returned guard is dropped.
    ///
    /// The depth and per-caller checks reserve their slot atomically, so concurrent
    /// requests never push either count past its limit.
    ///
    /// # Errors
    ///
    /// Returns the [`ShedReason`] when the request is shed; nothing stays reserved.
    pub fn try_enter(&self, request: &CallRequest) -> Result<InFlight, ShedReason> {
        let depth_limit = self.depth_limit(request.priority());
        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |depth| (depth < depth_limit).then_some(depth + 1))
            .map_err(|_| ShedReason::QueueDepth)?;

        let mut callers = self.callers.lock();
        let used = callers.get(request.caller()).copied().unwrap_or(0);
        if self.config.per_caller_max_in_flight.is_some_and(|limit| used >= limit) {
            drop(callers);
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            return Err(ShedReason::CallerQuota);
        }
        callers.insert(request.caller().clone(), used + 1);
        drop(callers);

        let guard = InFlight {
            in_flight: Arc::clone(&self.in_flight),
            callers: Arc::clone(&self.callers),
            caller: request.caller().clone(),
        };

        // Dropping the guard releases both reservations.
        if self.sheds_on_error_rate(request.priority()) {
            return Err(ShedReason::ErrorRate);
        }

        Ok(guard)
    }

    /// Feeds a vendor outcome into the error-rate window.
    pub fn record(&self, success: bool) {
        self.health.lock().record(success, Instant::now());
    }

    /// Requests currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    fn sheds_on_error_rate(&self, priority: Priority) -> bool {
        priority != Priority::Critical && self.health.lock().snapshot(Instant::now()).unhealthy
    }

    fn depth_limit(&self, priority: Priority) -> usize {
        let max = self.config.max_in_flight;
        match priority {
            Priority::Sheddable => max / 2,
            Priority::Standard => max.saturating_mul(4) / 5,
            Priority::Critical => max,
        }
    }
}

/// Keeps a request counted as in flight; dropping it decrements the counts.
#[derive(Debug)]
pub struct InFlight {
    in_flight: Arc<AtomicUsize>,
    callers: Arc<Mutex<HashMap<CallerId, usize>>>,
    caller: CallerId,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);

        let mut callers = self.callers.lock();
        if let Some(count) = callers.get_mut(&self.caller) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                callers.remove(&self.caller);
            }
        }
    }
}
