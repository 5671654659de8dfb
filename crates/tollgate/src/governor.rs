// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{Instant, timeout, timeout_at};

use crate::admission::AdmissionController;
use crate::attempt::Attempt;
use crate::backoff::BackoffPolicy;
use crate::breaker::{BreakerDecision, CircuitBreaker, ExecutionMode};
use crate::clock::Clock;
use crate::config::{ConfigError, GovernorConfig};
use crate::coordinator::{InMemoryCoordinator, SharedCoordinator};
use crate::error::{CallError, ErrorKind};
use crate::executor::{AttemptContext, CallExecutor, TransportError, VendorResponse};
use crate::gate::{ConcurrencyGate, Slot};
use crate::observe::{AbandonReason, AbandonedRecord, AttemptObserver, AttemptOutcome, AttemptRecord, Observers, TracingObserver};
use crate::rate_limit::{GlobalRateLimiter, LocalRateLimiter, RateLimitTimedOut, RatePermit};
use crate::request::{CallRequest, CorrelationId};
use crate::retry::RetryOrchestrator;
use crate::rnd::JitterSource;

/// Governs every outbound call to one vendor.
///
/// A call passes through the layers in a fixed order:
///
/// 1. the [admission controller][AdmissionController] sheds load locally;
/// 2. the whole call runs under the SLA deadline;
/// 3. each attempt checks the shared [circuit breaker][CircuitBreaker], then acquires
///    a global rate permit, a local rate permit and a [concurrency slot][ConcurrencyGate]
///    within the admission budget;
/// 4. the [executor][CallExecutor] runs under the per-attempt call timeout;
/// 5. failed attempts are classified and retried after a backoff that holds no slot.
///
/// When the deadline elapses or the caller drops the call, a cleanup task that cannot
/// be cancelled records the abandonment and, if an attempt was talking to the vendor,
/// counts it as a breaker failure.
///
/// The governor is cheap to clone; clones share all state.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use http::StatusCode;
/// use tollgate::{
///     AttemptContext, CallExecutor, CallRequest, Governor, GovernorConfig, InMemoryCoordinator,
///     TransportError, VendorResponse,
/// };
///
/// struct Echo;
///
/// impl CallExecutor for Echo {
///     async fn execute(&self, request: &CallRequest, _: &AttemptContext) -> Result<VendorResponse, TransportError> {
///         Ok(VendorResponse::new(StatusCode::OK, request.payload().clone()))
///     }
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let governor = Governor::builder(Echo, Arc::new(InMemoryCoordinator::new()))
///     .config(GovernorConfig::new("echo"))
///     .build()?;
///
/// let response = governor.call(CallRequest::new("ping")).await?;
/// assert_eq!(response.response().body().as_ref(), b"ping");
/// assert_eq!(response.attempts(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Governor<E, C = InMemoryCoordinator> {
    inner: Arc<Inner<E, C>>,
}

impl<E, C> Clone for Governor<E, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[derive(Debug)]
struct Inner<E, C> {
    config: GovernorConfig,
    executor: E,
    admission: AdmissionController,
    breaker: CircuitBreaker<C>,
    global_limiter: Option<GlobalRateLimiter<C>>,
    local_limiter: LocalRateLimiter,
    gate: ConcurrencyGate,
    orchestrator: RetryOrchestrator,
    observers: Observers,
}

/// A successful call.
#[derive(Debug, Clone)]
pub struct CallResponse {
    response: VendorResponse,
    attempts: u32,
    elapsed: Duration,
}

impl CallResponse {
    /// What the vendor answered.
    #[must_use]
    pub fn response(&self) -> &VendorResponse {
        &self.response
    }

    /// Consumes the wrapper.
    #[must_use]
    pub fn into_response(self) -> VendorResponse {
        self.response
    }

    /// Attempts it took, including the successful one.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Time from admission to the response.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

impl<E: CallExecutor, C: SharedCoordinator> Governor<E, C> {
    /// Starts building a governor around `executor`, sharing state through `coordinator`.
    #[must_use]
    pub fn builder(executor: E, coordinator: Arc<C>) -> GovernorBuilder<E, C> {
        GovernorBuilder {
            executor,
            coordinator,
            config: GovernorConfig::default(),
            observers: Observers::default(),
            logs: true,
            jitter: None,
        }
    }

    /// Sends `request` to the vendor under every protection layer.
    ///
    /// # Errors
    ///
    /// Returns a [`CallError`] whose [`kind`][CallError::kind] says which layer failed
    /// the call. See [`ErrorKind`] for the full list.
    pub async fn call(&self, request: CallRequest) -> Result<CallResponse, CallError> {
        let inner = &*self.inner;
        let started = Instant::now();

        let _in_flight = match inner.admission.try_enter(&request) {
            Ok(in_flight) => in_flight,
            Err(reason) => {
                tracing::event!(
                    name: "tollgate.shed",
                    tracing::Level::INFO,
                    correlation_id = %request.correlation_id(),
                    caller = %request.caller(),
                    priority = ?request.priority(),
                    shed.reason = %reason,
                );
                return Err(CallError::new(ErrorKind::AdmissionRejected, format!("shed by {reason}")));
            }
        };

        let sla_deadline = started + inner.config.sla_deadline;
        let deadline = request.deadline().map_or(sla_deadline, |requested| requested.min(sla_deadline));

        let progress = Arc::new(Progress::default());
        let mut guard = CancelGuard::new(Arc::clone(&self.inner), Arc::clone(&progress), request.correlation_id(), started);

        let orchestrated = timeout_at(
            deadline,
            inner
                .orchestrator
                .run(|attempt| inner.run_attempt(&request, attempt, &progress), &inner.observers),
        )
        .await;
        guard.disarm();

        match orchestrated {
            Ok(Ok(completed)) => Ok(CallResponse {
                response: completed.value,
                attempts: completed.attempts,
                elapsed: started.elapsed(),
            }),
            Ok(Err(error)) => Err(error),
            Err(_elapsed) => {
                let attempts = progress.attempts();
                let task = tokio::spawn(cleanup(
                    Arc::clone(&self.inner),
                    progress.snapshot(),
                    AbandonReason::SlaExceeded,
                    request.correlation_id(),
                    started,
                ));

                // The task runs to completion even if this future is dropped while waiting.
                if let Err(error) = task.await {
                    tracing::event!(name: "tollgate.cleanup", tracing::Level::ERROR, error = %error);
                }

                Err(CallError::new(
                    ErrorKind::SlaExceeded,
                    format!("deadline elapsed after {:?}", deadline.saturating_duration_since(started)),
                )
                .with_attempts(attempts))
            }
        }
    }

    /// The shared circuit breaker of this vendor.
    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker<C> {
        &self.inner.breaker
    }

    /// The concurrency gate of this process.
    #[must_use]
    pub fn gate(&self) -> &ConcurrencyGate {
        &self.inner.gate
    }

    /// The admission controller of this process.
    #[must_use]
    pub fn admission(&self) -> &AdmissionController {
        &self.inner.admission
    }

    /// Configuration the governor was built with.
    #[must_use]
    pub fn config(&self) -> &GovernorConfig {
        &self.inner.config
    }
}

impl<E: CallExecutor, C: SharedCoordinator> Inner<E, C> {
    async fn run_attempt(
        &self,
        request: &CallRequest,
        attempt: Attempt,
        progress: &Progress,
    ) -> (Result<VendorResponse, CallError>, AttemptRecord) {
        let started = Instant::now();
        progress.started(attempt);

        let mut record = AttemptRecord {
            correlation_id: request.correlation_id(),
            attempt_index: attempt.index(),
            is_last: attempt.is_last(),
            duration: Duration::ZERO,
            outcome: AttemptOutcome::TerminalError,
            error: None,
            status: None,
            breaker_mode: None,
            global_rate_wait: Duration::ZERO,
            local_rate_wait: Duration::ZERO,
            gate_wait: Duration::ZERO,
            retry_delay: None,
        };

        let result = self.attempt(request, attempt, progress, &mut record).await;

        record.duration = started.elapsed();
        record.error = result.as_ref().err().map(CallError::kind);
        (result, record)
    }

    async fn attempt(
        &self,
        request: &CallRequest,
        attempt: Attempt,
        progress: &Progress,
        record: &mut AttemptRecord,
    ) -> Result<VendorResponse, CallError> {
        let mode = match self.breaker.allow().await {
            BreakerDecision::Allowed(mode) => mode,
            BreakerDecision::Rejected { retry_after } => {
                return Err(CallError::new(ErrorKind::CircuitOpen, "circuit is open").with_retry_after(Some(retry_after)));
            }
        };
        record.breaker_mode = Some(mode);

        let mut slot = match self.reserve(record).await {
            Ok(slot) => slot,
            Err(error) => {
                if mode == ExecutionMode::Probe {
                    self.breaker.cancel_probe().await;
                }
                return Err(error);
            }
        };

        let context = AttemptContext::new(attempt, request.correlation_id(), self.config.transport);
        progress.calling(attempt, mode);
        let outcome = timeout(self.config.call_timeout, self.executor.execute(request, &context)).await;
        progress.returned();
        slot.release();

        let result = self.interpret(outcome, record);

        // 4xx means the vendor is up and answering.
        let vendor_ok = match &result {
            Ok(_) => true,
            Err(error) => error.kind() == ErrorKind::VendorClientError,
        };
        self.admission.record(vendor_ok);
        if vendor_ok {
            self.breaker.record_success(mode).await;
        } else {
            self.breaker.record_failure(mode).await;
        }

        result
    }

    /// Acquires rate permits and a slot within the admission budget.
    ///
    /// Permits taken before a later layer times out are refunded.
    async fn reserve(&self, record: &mut AttemptRecord) -> Result<Slot, CallError> {
        let deadline = Instant::now() + self.config.admission_budget;
        let scope = self.config.vendor_key.as_str();

        let global = match &self.global_limiter {
            Some(limiter) => match limiter.acquire(scope, remaining(deadline)).await {
                Ok(permit) => {
                    record.global_rate_wait = permit.waited();
                    Some(permit)
                }
                Err(timed_out) => {
                    record.global_rate_wait = timed_out.waited;
                    return Err(rate_limited(timed_out));
                }
            },
            None => None,
        };

        let local = match self.local_limiter.acquire(scope, remaining(deadline)).await {
            Ok(permit) => {
                record.local_rate_wait = permit.waited();
                permit
            }
            Err(timed_out) => {
                record.local_rate_wait = timed_out.waited;
                self.refund_global(global).await;
                return Err(rate_limited(timed_out));
            }
        };

        match self.gate.reserve(remaining(deadline)).await {
            Ok(slot) => {
                record.gate_wait = slot.waited();
                Ok(slot)
            }
            Err(timed_out) => {
                record.gate_wait = timed_out.waited;
                self.local_limiter.refund(local);
                self.refund_global(global).await;
                Err(CallError::new(ErrorKind::ConcurrencyExhausted, timed_out.to_string()))
            }
        }
    }

    async fn refund_global(&self, permit: Option<RatePermit>) {
        if let (Some(limiter), Some(permit)) = (&self.global_limiter, permit) {
            limiter.refund(permit).await;
        }
    }

    fn interpret(
        &self,
        outcome: Result<Result<VendorResponse, TransportError>, tokio::time::error::Elapsed>,
        record: &mut AttemptRecord,
    ) -> Result<VendorResponse, CallError> {
        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(error)) => {
                return Err(CallError::new(ErrorKind::VendorTransportError, error.to_string()).with_source(error));
            }
            Err(_elapsed) => {
                return Err(CallError::new(
                    ErrorKind::VendorTimeout,
                    format!("no response within {:?}", self.config.call_timeout),
                ));
            }
        };

        let status = response.status();
        record.status = Some(status);

        if status.is_client_error() {
            Err(CallError::new(ErrorKind::VendorClientError, format!("vendor answered {status}")).with_status(status))
        } else if status.is_server_error() {
            Err(CallError::new(ErrorKind::VendorServerError, format!("vendor answered {status}"))
                .with_status(status)
                .with_retry_after(response.retry_after()))
        } else {
            Ok(response)
        }
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

fn rate_limited(timed_out: RateLimitTimedOut) -> CallError {
    CallError::new(ErrorKind::RateLimited, timed_out.to_string()).with_rate_scope(timed_out.scope)
}

/// Where a call is, for the cleanup of an abandoned call.
#[derive(Debug, Default)]
struct Progress(Mutex<ProgressSnapshot>);

#[derive(Debug, Clone, Copy, Default)]
struct ProgressSnapshot {
    attempts: u32,
    in_flight: Option<(u32, ExecutionMode)>,
}

impl Progress {
    fn started(&self, attempt: Attempt) {
        self.0.lock().attempts = attempt.count();
    }

    fn calling(&self, attempt: Attempt, mode: ExecutionMode) {
        self.0.lock().in_flight = Some((attempt.index(), mode));
    }

    fn returned(&self) {
        self.0.lock().in_flight = None;
    }

    fn attempts(&self) -> u32 {
        self.0.lock().attempts
    }

    fn snapshot(&self) -> ProgressSnapshot {
        *self.0.lock()
    }
}

/// Runs the cleanup of a call abandoned in `snapshot`'s state.
///
/// Never calls the vendor. Breaker accounting is bounded by the cleanup timeout.
async fn cleanup<E, C>(
    inner: Arc<Inner<E, C>>,
    snapshot: ProgressSnapshot,
    reason: AbandonReason,
    correlation_id: CorrelationId,
    started: Instant,
) where
    E: CallExecutor,
    C: SharedCoordinator,
{
    inner.observers.abandoned(&AbandonedRecord {
        correlation_id,
        reason,
        attempts: snapshot.attempts,
        in_flight_attempt: snapshot.in_flight.map(|(index, _)| index),
        elapsed: started.elapsed(),
    });

    let Some((_, mode)) = snapshot.in_flight else {
        return;
    };

    inner.admission.record(false);
    if timeout(inner.config.cleanup_timeout, inner.breaker.record_failure(mode)).await.is_err() {
        tracing::event!(
            name: "tollgate.cleanup",
            tracing::Level::WARN,
            correlation_id = %correlation_id,
            cleanup.timeout = inner.config.cleanup_timeout.as_secs_f32(),
            "breaker accounting did not finish in time",
        );
    }
}

/// Spawns the cleanup when the call future is dropped before it finished.
struct CancelGuard {
    on_drop: Option<Box<dyn FnOnce() + Send>>,
}

impl CancelGuard {
    fn new<E, C>(inner: Arc<Inner<E, C>>, progress: Arc<Progress>, correlation_id: CorrelationId, started: Instant) -> Self
    where
        E: CallExecutor,
        C: SharedCoordinator,
    {
        Self {
            on_drop: Some(Box::new(move || {
                let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                    return;
                };

                runtime.spawn(cleanup(
                    inner,
                    progress.snapshot(),
                    AbandonReason::Cancelled,
                    correlation_id,
                    started,
                ));
            })),
        }
    }

    fn disarm(&mut self) {
        self.on_drop = None;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if let Some(on_drop) = self.on_drop.take() {
            on_drop();
        }
    }
}

/// Builds a [`Governor`].
#[derive(Debug)]
pub struct GovernorBuilder<E, C> {
    executor: E,
    coordinator: Arc<C>,
    config: GovernorConfig,
    observers: Observers,
    logs: bool,
    jitter: Option<JitterSource>,
}

impl<E: CallExecutor, C: SharedCoordinator> GovernorBuilder<E, C> {
    /// Sets the configuration; defaults to [`GovernorConfig::default`].
    #[must_use]
    pub fn config(mut self, config: GovernorConfig) -> Self {
        self.config = config;
        self
    }

    /// Adds an observer that receives every attempt and abandonment record.
    #[must_use]
    pub fn observer(mut self, observer: impl AttemptObserver) -> Self {
        self.observers.push(Arc::new(observer));
        self
    }

    /// Turns the built-in `tracing` observer on or off; on by default.
    #[must_use]
    pub fn logs(mut self, enabled: bool) -> Self {
        self.logs = enabled;
        self
    }

    /// Replaces the randomness used for backoff jitter.
    #[must_use]
    pub fn jitter_source(mut self, source: JitterSource) -> Self {
        self.jitter = Some(source);
        self
    }

    /// Validates the configuration and builds the governor.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the configuration is invalid.
    pub fn build(self) -> Result<Governor<E, C>, ConfigError> {
        let Self {
            executor,
            coordinator,
            config,
            mut observers,
            logs,
            jitter,
        } = self;

        config.validate()?;

        if logs {
            observers.push(Arc::new(TracingObserver));
        }

        let clock = Clock::new();

        let breaker = CircuitBreaker::new(
            Arc::clone(&coordinator),
            config.breaker,
            &config.key_prefix,
            &config.vendor_key,
            config.fail_open,
        )
        .with_clock(clock);

        let global_limiter = config.global_rate.map(|rate| {
            GlobalRateLimiter::new(
                Arc::clone(&coordinator),
                rate,
                config.key_prefix.clone(),
                config.global_poll_interval,
                config.fail_open,
            )
            .with_clock(clock)
        });

        let backoff = BackoffPolicy::new(&config.backoff);
        let backoff = match jitter {
            Some(source) => backoff.with_jitter_source(source),
            None => backoff,
        };

        let inner = Inner {
            admission: AdmissionController::new(config.admission),
            breaker,
            global_limiter,
            local_limiter: LocalRateLimiter::new(config.local_rate),
            gate: ConcurrencyGate::new(config.concurrency),
            orchestrator: RetryOrchestrator::new(config.max_attempts, backoff, config.admission_timeout_retry),
            observers,
            executor,
            config,
        };

        Ok(Governor { inner: Arc::new(inner) })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use http::StatusCode;

    use super::*;
    use crate::backoff::Backoff;
    use crate::breaker::CircuitState;
    use crate::config::RateConfig;
    use crate::testing::{RecordingObserver, UnavailableCoordinator};

    #[derive(Debug, Default)]
    struct Countdown {
        calls: AtomicU32,
        failures_before_success: u32,
        latency: Duration,
    }

    impl CallExecutor for Countdown {
        async fn execute(&self, _request: &CallRequest, _context: &AttemptContext) -> Result<VendorResponse, TransportError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.latency).await;
            if call < self.failures_before_success {
                Ok(VendorResponse::new(StatusCode::BAD_GATEWAY, ""))
            } else {
                Ok(VendorResponse::new(StatusCode::OK, "done"))
            }
        }
    }

    fn config() -> GovernorConfig {
        let mut config = GovernorConfig::new("vendor");
        config.backoff.kind = Backoff::Constant;
        config.backoff.jitter = false;
        config.backoff.base = Duration::from_millis(100);
        config
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_server_errors() {
        let recorder = Arc::new(RecordingObserver::default());
        let governor = Governor::builder(
            Countdown {
                failures_before_success: 2,
                ..Countdown::default()
            },
            Arc::new(InMemoryCoordinator::new()),
        )
        .config(config())
        .observer(Arc::clone(&recorder))
        .logs(false)
        .build()
        .unwrap();

        let response = governor.call(CallRequest::new("x")).await.unwrap();

        assert_eq!(response.attempts(), 3);
        assert_eq!(response.response().status(), StatusCode::OK);
        let records = recorder.attempts();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].error, Some(ErrorKind::VendorServerError));
        assert_eq!(records[0].status, Some(StatusCode::BAD_GATEWAY));
        assert_eq!(records[0].retry_delay, Some(Duration::from_millis(100)));
        assert_eq!(records[2].outcome, AttemptOutcome::Success);
        assert_eq!(governor.gate().in_use(), 0);
        assert_eq!(governor.admission().in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn per_attempt_timeout() {
        let mut config = config();
        config.call_timeout = Duration::from_secs(1);
        config.max_attempts = 1;

        let governor = Governor::builder(
            Countdown {
                latency: Duration::from_secs(5),
                ..Countdown::default()
            },
            Arc::new(InMemoryCoordinator::new()),
        )
        .config(config)
        .build()
        .unwrap();

        let error = governor.call(CallRequest::new("x")).await.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::VendorTimeout);
        assert_eq!(error.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn request_deadline_tighter_than_sla() {
        let recorder = Arc::new(RecordingObserver::default());
        let governor = Governor::builder(
            Countdown {
                latency: Duration::from_secs(10),
                ..Countdown::default()
            },
            Arc::new(InMemoryCoordinator::new()),
        )
        .config(config())
        .observer(Arc::clone(&recorder))
        .build()
        .unwrap();

        let started = Instant::now();
        let request = CallRequest::builder("x").timeout(Duration::from_secs(3)).build();
        let error = governor.call(request).await.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::SlaExceeded);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(3) && elapsed < Duration::from_millis(3010), "{elapsed:?}");

        let abandoned = recorder.abandoned();
        assert_eq!(abandoned.len(), 1);
        assert_eq!(abandoned[0].reason, AbandonReason::SlaExceeded);
        assert_eq!(abandoned[0].in_flight_attempt, Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn fail_closed_rejects_when_store_is_down() {
        let mut config = config();
        config.fail_open = false;

        let governor = Governor::builder(Countdown::default(), Arc::new(UnavailableCoordinator))
            .config(config)
            .build()
            .unwrap();

        let error = governor.call(CallRequest::new("x")).await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::CircuitOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn fail_open_calls_through_when_store_is_down() {
        let mut config = config();
        config.global_rate = Some(RateConfig::new(1, Duration::from_secs(1)));

        let governor = Governor::builder(Countdown::default(), Arc::new(UnavailableCoordinator))
            .config(config)
            .build()
            .unwrap();

        let response = governor.call(CallRequest::new("x")).await.unwrap();
        assert_eq!(response.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn client_errors_keep_the_circuit_closed() {
        #[derive(Debug)]
        struct BadRequest;

        impl CallExecutor for BadRequest {
            async fn execute(&self, _: &CallRequest, _: &AttemptContext) -> Result<VendorResponse, TransportError> {
                Ok(VendorResponse::new(StatusCode::BAD_REQUEST, ""))
            }
        }

        let mut config = config();
        config.breaker.failure_threshold = 1;
        let governor = Governor::builder(BadRequest, Arc::new(InMemoryCoordinator::new()))
            .config(config)
            .build()
            .unwrap();

        for _ in 0..3 {
            let error = governor.call(CallRequest::new("x")).await.unwrap_err();
            assert_eq!(error.kind(), ErrorKind::VendorClientError);
            assert_eq!(error.attempts(), 1);
        }

        assert_eq!(governor.breaker().state().await.unwrap(), CircuitState::Closed);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = config();
        config.concurrency = 0;

        let error = Governor::builder(Countdown::default(), Arc::new(InMemoryCoordinator::new()))
            .config(config)
            .build()
            .unwrap_err();

        assert_eq!(error.field(), "concurrency");
    }
}
