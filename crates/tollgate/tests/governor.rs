// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests for the governor using only the public API.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use http::StatusCode;
use parking_lot::Mutex;
use tokio::time::Instant;
use tollgate::{
    AbandonReason, AbandonedRecord, AttemptContext, AttemptObserver, AttemptRecord, Backoff, CallExecutor, CallRequest,
    CircuitState, ErrorKind, FailureClass, Governor, GovernorConfig, InMemoryCoordinator, Priority, RateConfig,
    TransportError, TransportErrorKind, VendorResponse,
};

type Respond = dyn Fn(u32, &AttemptContext) -> Result<StatusCode, TransportError> + Send + Sync;

/// A fake vendor that counts calls and tracks its own concurrency.
#[derive(Clone)]
struct Vendor(Arc<VendorState>);

struct VendorState {
    latency: Duration,
    respond: Box<Respond>,
    calls: AtomicU32,
    active: AtomicUsize,
    peak: AtomicUsize,
    starts: Mutex<Vec<Instant>>,
}

impl Vendor {
    fn new(latency: Duration, respond: impl Fn(u32, &AttemptContext) -> Result<StatusCode, TransportError> + Send + Sync + 'static) -> Self {
        Self(Arc::new(VendorState {
            latency,
            respond: Box::new(respond),
            calls: AtomicU32::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            starts: Mutex::new(Vec::new()),
        }))
    }

    fn always(status: StatusCode) -> Self {
        Self::new(Duration::ZERO, move |_, _| Ok(status))
    }

    fn calls(&self) -> u32 {
        self.0.calls.load(Ordering::SeqCst)
    }

    fn peak(&self) -> usize {
        self.0.peak.load(Ordering::SeqCst)
    }

    fn starts(&self) -> Vec<Instant> {
        self.0.starts.lock().clone()
    }
}

impl CallExecutor for Vendor {
    async fn execute(&self, _request: &CallRequest, context: &AttemptContext) -> Result<VendorResponse, TransportError> {
        let call = self.0.calls.fetch_add(1, Ordering::SeqCst);
        self.0.starts.lock().push(Instant::now());
        let active = self.0.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.0.peak.fetch_max(active, Ordering::SeqCst);

        tokio::time::sleep(self.0.latency).await;

        self.0.active.fetch_sub(1, Ordering::SeqCst);
        (self.0.respond)(call, context).map(|status| VendorResponse::new(status, "body"))
    }
}

#[derive(Debug, Default, Clone)]
struct Recorder {
    attempts: Arc<Mutex<Vec<AttemptRecord>>>,
    abandoned: Arc<Mutex<Vec<AbandonedRecord>>>,
}

impl AttemptObserver for Recorder {
    fn on_attempt(&self, record: &AttemptRecord) {
        self.attempts.lock().push(record.clone());
    }

    fn on_abandoned(&self, record: &AbandonedRecord) {
        self.abandoned.lock().push(record.clone());
    }
}

fn config() -> GovernorConfig {
    let mut config = GovernorConfig::new("vendor");
    config.backoff.kind = Backoff::Constant;
    config.backoff.base = Duration::from_millis(200);
    config.backoff.jitter = false;
    config
}

fn governor(vendor: &Vendor, config: GovernorConfig) -> (Governor<Vendor>, Recorder) {
    let recorder = Recorder::default();
    let governor = Governor::builder(vendor.clone(), Arc::new(InMemoryCoordinator::new()))
        .config(config)
        .observer(recorder.clone())
        .build()
        .unwrap();
    (governor, recorder)
}

#[tokio::test(start_paused = true)]
async fn happy_path() {
    let vendor = Vendor::always(StatusCode::OK);
    let (governor, recorder) = governor(&vendor, config());

    let response = governor.call(CallRequest::new("ping")).await.unwrap();

    assert_eq!(response.response().status(), StatusCode::OK);
    assert_eq!(response.attempts(), 1);
    assert_eq!(vendor.calls(), 1);
    assert_eq!(recorder.attempts.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn server_error_then_success() {
    let vendor = Vendor::new(Duration::ZERO, |call, _| {
        Ok(if call == 0 { StatusCode::SERVICE_UNAVAILABLE } else { StatusCode::OK })
    });
    let (governor, recorder) = governor(&vendor, config());

    let response = governor.call(CallRequest::new("ping")).await.unwrap();

    assert_eq!(response.attempts(), 2);
    let starts = vendor.starts();
    assert!(starts[1] - starts[0] >= Duration::from_millis(200));

    let attempts = recorder.attempts.lock().clone();
    assert_eq!(attempts[0].error, Some(ErrorKind::VendorServerError));
    assert_eq!(attempts[0].retry_delay, Some(Duration::from_millis(200)));
    assert_eq!(attempts[1].error, None);
}

#[tokio::test(start_paused = true)]
async fn server_errors_exhaust_attempts() {
    let vendor = Vendor::always(StatusCode::SERVICE_UNAVAILABLE);
    let (governor, _) = governor(&vendor, config());

    let error = governor.call(CallRequest::new("ping")).await.unwrap_err();

    assert_eq!(error.kind(), ErrorKind::VendorServerError);
    assert_eq!(error.attempts(), 3);
    assert_eq!(error.vendor_status(), Some(StatusCode::SERVICE_UNAVAILABLE));
    assert_eq!(error.class(), FailureClass::UpstreamFailed);
    assert_eq!(vendor.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn client_error_is_not_retried() {
    let vendor = Vendor::always(StatusCode::BAD_REQUEST);
    let (governor, _) = governor(&vendor, config());

    let error = governor.call(CallRequest::new("ping")).await.unwrap_err();

    assert_eq!(error.kind(), ErrorKind::VendorClientError);
    assert_eq!(error.attempts(), 1);
    assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(vendor.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn transport_errors_are_retried() {
    let vendor = Vendor::new(Duration::ZERO, |call, _| {
        if call == 0 {
            Err(TransportError::new(TransportErrorKind::Connect, "connection refused"))
        } else {
            Ok(StatusCode::OK)
        }
    });
    let (governor, recorder) = governor(&vendor, config());

    let response = governor.call(CallRequest::new("ping")).await.unwrap();

    assert_eq!(response.attempts(), 2);
    assert_eq!(recorder.attempts.lock()[0].error, Some(ErrorKind::VendorTransportError));
}

#[tokio::test(start_paused = true)]
async fn breaker_trips_for_the_whole_fleet() {
    let vendor = Vendor::always(StatusCode::INTERNAL_SERVER_ERROR);
    let coordinator = Arc::new(InMemoryCoordinator::new());

    let mut config = config();
    config.max_attempts = 1;
    config.breaker.failure_threshold = 5;

    let first = Governor::builder(vendor.clone(), Arc::clone(&coordinator))
        .config(config.clone())
        .build()
        .unwrap();
    let second = Governor::builder(vendor.clone(), Arc::clone(&coordinator))
        .config(config)
        .build()
        .unwrap();

    for _ in 0..5 {
        let error = first.call(CallRequest::new("ping")).await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::VendorServerError);
    }

    let error = first.call(CallRequest::new("ping")).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::CircuitOpen);
    assert!(error.retry_after().is_some());

    let error = second.call(CallRequest::new("ping")).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::CircuitOpen);
    assert_eq!(error.class(), FailureClass::UpstreamUnavailable);
    assert_eq!(error.status_code(), StatusCode::SERVICE_UNAVAILABLE);

    assert_eq!(vendor.calls(), 5);
    assert_eq!(second.breaker().state().await.unwrap(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn breaker_recovers_after_cooldown() {
    let vendor = Vendor::new(Duration::ZERO, |call, _| {
        Ok(if call < 2 { StatusCode::BAD_GATEWAY } else { StatusCode::OK })
    });

    let mut config = config();
    config.max_attempts = 1;
    config.breaker.failure_threshold = 2;
    config.breaker.success_threshold = 1;
    config.breaker.cooldown = Duration::from_secs(5);
    let (governor, _) = governor(&vendor, config);

    for _ in 0..2 {
        let _ = governor.call(CallRequest::new("ping")).await;
    }
    assert_eq!(governor.breaker().state().await.unwrap(), CircuitState::Open);

    tokio::time::sleep(Duration::from_secs(5)).await;

    let response = governor.call(CallRequest::new("ping")).await.unwrap();
    assert_eq!(response.response().status(), StatusCode::OK);
    assert_eq!(governor.breaker().state().await.unwrap(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn sla_cuts_slow_vendor() {
    let vendor = Vendor::new(Duration::from_secs(5), |_, _| Ok(StatusCode::OK));

    let mut config = config();
    config.sla_deadline = Duration::from_secs(2);
    config.breaker.failure_threshold = 1;
    let (governor, recorder) = governor(&vendor, config);

    let started = Instant::now();
    let error = governor.call(CallRequest::new("ping")).await.unwrap_err();
    let elapsed = started.elapsed();

    assert_eq!(error.kind(), ErrorKind::SlaExceeded);
    assert_eq!(error.status_code(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(error.attempts(), 1);
    assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_millis(2100), "{elapsed:?}");

    let abandoned = recorder.abandoned.lock().clone();
    assert_eq!(abandoned.len(), 1);
    assert_eq!(abandoned[0].reason, AbandonReason::SlaExceeded);
    assert_eq!(abandoned[0].in_flight_attempt, Some(0));

    // the cut attempt counts as a breaker failure
    assert_eq!(governor.breaker().state().await.unwrap(), CircuitState::Open);
    assert_eq!(governor.gate().in_use(), 0);
    assert_eq!(governor.admission().in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancelled_call_is_cleaned_up() {
    let vendor = Vendor::new(Duration::from_secs(5), |_, _| Ok(StatusCode::OK));
    let (governor, recorder) = governor(&vendor, config());

    let task = tokio::spawn({
        let governor = governor.clone();
        async move { governor.call(CallRequest::new("ping")).await }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(governor.gate().in_use(), 1);

    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());
    tokio::time::sleep(Duration::from_millis(10)).await;

    let abandoned = recorder.abandoned.lock().clone();
    assert_eq!(abandoned.len(), 1);
    assert_eq!(abandoned[0].reason, AbandonReason::Cancelled);
    assert_eq!(abandoned[0].in_flight_attempt, Some(0));
    assert_eq!(governor.gate().in_use(), 0);
    assert_eq!(governor.admission().in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn backoff_holds_no_slot() {
    let vendor = Vendor::new(Duration::from_millis(10), |_, context| {
        Ok(if context.attempt().is_first() {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::OK
        })
    });

    let mut config = config();
    config.concurrency = 2;
    config.backoff.base = Duration::from_secs(1);
    config.breaker.failure_threshold = 100;
    let (governor, _) = governor(&vendor, config);

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let governor = governor.clone();
            tokio::spawn(async move { governor.call(CallRequest::new("ping")).await })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(500)).await;

    // every first attempt went through two slots while the others were backing off
    assert_eq!(vendor.calls(), 10);
    assert_eq!(governor.gate().in_use(), 0);

    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap().attempts(), 2);
    }
    assert!(vendor.peak() <= 2);
}

#[tokio::test(start_paused = true)]
async fn concurrency_never_exceeds_capacity() {
    let vendor = Vendor::new(Duration::from_millis(50), |_, _| Ok(StatusCode::OK));

    let mut config = config();
    config.concurrency = 3;
    config.admission_budget = Duration::from_secs(10);
    let (governor, _) = governor(&vendor, config);

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let governor = governor.clone();
            tokio::spawn(async move { governor.call(CallRequest::new("ping")).await })
        })
        .collect();

    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(vendor.calls(), 20);
    assert_eq!(vendor.peak(), 3);
}

#[tokio::test(start_paused = true)]
async fn gate_timeout_surfaces_concurrency_exhausted() {
    let vendor = Vendor::new(Duration::from_secs(10), |_, _| Ok(StatusCode::OK));

    let mut config = config();
    config.concurrency = 1;
    config.admission_budget = Duration::from_millis(100);
    let (governor, _) = governor(&vendor, config);

    let _holder = tokio::spawn({
        let governor = governor.clone();
        async move { governor.call(CallRequest::new("slow")).await }
    });
    tokio::time::sleep(Duration::from_millis(1)).await;

    let error = governor.call(CallRequest::new("ping")).await.unwrap_err();

    assert_eq!(error.kind(), ErrorKind::ConcurrencyExhausted);
    assert_eq!(error.class(), FailureClass::Overloaded);
    assert_eq!(error.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn global_rate_limit_holds_in_every_window() {
    let vendor = Vendor::always(StatusCode::OK);

    let mut config = config();
    config.global_rate = Some(RateConfig::new(5, Duration::from_secs(1)));
    config.admission_budget = Duration::from_secs(10);
    let (governor, _) = governor(&vendor, config);

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let governor = governor.clone();
            tokio::spawn(async move { governor.call(CallRequest::new("ping")).await })
        })
        .collect();

    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let mut starts = vendor.starts();
    starts.sort();
    assert_eq!(starts.len(), 20);
    for (i, start) in starts.iter().enumerate() {
        let in_window = starts[i..].iter().take_while(|s| **s - *start < Duration::from_secs(1)).count();
        assert!(in_window <= 5, "{in_window} starts within one window");
    }
}

#[tokio::test(start_paused = true)]
async fn sheddable_requests_are_shed_first() {
    let vendor = Vendor::new(Duration::from_secs(1), |_, _| Ok(StatusCode::OK));

    let mut config = config();
    config.admission.max_in_flight = 10;
    let (governor, _) = governor(&vendor, config);

    let _busy: Vec<_> = (0..5)
        .map(|_| {
            let governor = governor.clone();
            tokio::spawn(async move { governor.call(CallRequest::new("busy")).await })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(governor.admission().in_flight(), 5);

    let sheddable = CallRequest::builder("low").priority(Priority::Sheddable).build();
    let error = governor.call(sheddable).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::AdmissionRejected);
    assert_eq!(error.attempts(), 0);
    assert_eq!(error.status_code(), StatusCode::TOO_MANY_REQUESTS);

    let critical = CallRequest::builder("high").priority(Priority::Critical).build();
    governor.call(critical).await.unwrap();
}
