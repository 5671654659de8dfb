// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-attempt records and the observers that receive them.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;

use crate::breaker::ExecutionMode;
use crate::error::ErrorKind;
use crate::request::CorrelationId;

/// How an attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttemptOutcome {
    /// The vendor answered with a non-error status.
    Success,
    /// The attempt failed and another one may follow.
    RetryableError,
    /// The attempt failed and ended the call.
    TerminalError,
    /// The per-attempt timeout elapsed.
    Timeout,
}

impl AttemptOutcome {
    /// Stable snake-case name used in logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::RetryableError => "retryable_error",
            Self::TerminalError => "terminal_error",
            Self::Timeout => "timeout",
        }
    }
}

/// Emitted once per attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    /// Correlation id of the call.
    pub correlation_id: CorrelationId,
    /// 0-based attempt index.
    pub attempt_index: u32,
    /// Whether the attempt was the last one allowed.
    pub is_last: bool,
    /// Time from the start of the attempt to its outcome, admission included.
    pub duration: Duration,
    /// How the attempt ended.
    pub outcome: AttemptOutcome,
    /// Error kind for failed attempts.
    pub error: Option<ErrorKind>,
    /// Vendor status, when the vendor answered.
    pub status: Option<StatusCode>,
    /// Breaker mode the attempt ran in, when the breaker let it through.
    pub breaker_mode: Option<ExecutionMode>,
    /// Time spent waiting for the fleet-wide rate limiter.
    pub global_rate_wait: Duration,
    /// Time spent waiting for the local rate limiter.
    pub local_rate_wait: Duration,
    /// Time spent waiting for a concurrency slot.
    pub gate_wait: Duration,
    /// Time until the next attempt starts, when one follows.
    pub retry_delay: Option<Duration>,
}

/// Why a call was abandoned before it produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbandonReason {
    /// The end-to-end deadline elapsed.
    SlaExceeded,
    /// The caller dropped the call.
    Cancelled,
}

/// Emitted by the shielded cleanup of an abandoned call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbandonedRecord {
    /// Correlation id of the call.
    pub correlation_id: CorrelationId,
    /// Why the call was abandoned.
    pub reason: AbandonReason,
    /// Attempts started before abandonment.
    pub attempts: u32,
    /// Index of the attempt that was talking to the vendor, if any.
    pub in_flight_attempt: Option<u32>,
    /// Time from the start of the call to abandonment.
    pub elapsed: Duration,
}

/// Receives observability records.
///
/// Observers run inline on the call path and inside the shielded cleanup, so they
/// must be fast and must not block.
pub trait AttemptObserver: Send + Sync + Debug + 'static {
    /// Called after every attempt.
    fn on_attempt(&self, record: &AttemptRecord);

    /// Called when a call is abandoned.
    fn on_abandoned(&self, record: &AbandonedRecord) {
        _ = record;
    }
}

impl<T: AttemptObserver + ?Sized> AttemptObserver for Arc<T> {
    fn on_attempt(&self, record: &AttemptRecord) {
        (**self).on_attempt(record);
    }

    fn on_abandoned(&self, record: &AbandonedRecord) {
        (**self).on_abandoned(record);
    }
}

/// Logs every record as a structured `tracing` event.
///
/// Successful attempts are logged at `DEBUG`, failed ones at `WARN` and abandoned
/// calls at `ERROR`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl AttemptObserver for TracingObserver {
    fn on_attempt(&self, record: &AttemptRecord) {
        macro_rules! emit {
            ($level:expr) => {
                tracing::event!(
                    name: "tollgate.attempt",
                    $level,
                    correlation_id = %record.correlation_id,
                    attempt.index = record.attempt_index,
                    attempt.is_last = record.is_last,
                    attempt.outcome = record.outcome.as_str(),
                    attempt.duration = record.duration.as_secs_f32(),
                    attempt.error = record.error.map(ErrorKind::as_str),
                    attempt.status = record.status.map(|s| s.as_u16()),
                    wait.global_rate = record.global_rate_wait.as_secs_f32(),
                    wait.local_rate = record.local_rate_wait.as_secs_f32(),
                    wait.gate = record.gate_wait.as_secs_f32(),
                    retry.delay = record.retry_delay.map(|d| d.as_secs_f32()),
                )
            };
        }

        if record.outcome == AttemptOutcome::Success {
            emit!(tracing::Level::DEBUG);
        } else {
            emit!(tracing::Level::WARN);
        }
    }

    fn on_abandoned(&self, record: &AbandonedRecord) {
        tracing::event!(
            name: "tollgate.abandoned",
            tracing::Level::ERROR,
            correlation_id = %record.correlation_id,
            abandon.reason = ?record.reason,
            abandon.attempts = record.attempts,
            abandon.in_flight_attempt = record.in_flight_attempt,
            abandon.elapsed = record.elapsed.as_secs_f32(),
        );
    }
}

/// Fans records out to several observers.
#[derive(Debug, Default)]
pub(crate) struct Observers(Vec<Arc<dyn AttemptObserver>>);

impl Observers {
    pub fn push(&mut self, observer: Arc<dyn AttemptObserver>) {
        self.0.push(observer);
    }

    pub fn attempt(&self, record: &AttemptRecord) {
        for observer in &self.0 {
            observer.on_attempt(record);
        }
    }

    pub fn abandoned(&self, record: &AbandonedRecord) {
        for observer in &self.0 {
            observer.on_abandoned(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingObserver;

    fn record(outcome: AttemptOutcome) -> AttemptRecord {
        AttemptRecord {
            correlation_id: CorrelationId::generate(),
            attempt_index: 0,
            is_last: false,
            duration: Duration::from_millis(12),
            outcome,
            error: None,
            status: Some(StatusCode::OK),
            breaker_mode: Some(ExecutionMode::Normal),
            global_rate_wait: Duration::ZERO,
            local_rate_wait: Duration::ZERO,
            gate_wait: Duration::ZERO,
            retry_delay: None,
        }
    }

    #[test]
    fn observers_fan_out() {
        let a = Arc::new(RecordingObserver::default());
        let b = Arc::new(RecordingObserver::default());
        let mut observers = Observers::default();
        observers.push(Arc::clone(&a) as Arc<dyn AttemptObserver>);
        observers.push(Arc::clone(&b) as Arc<dyn AttemptObserver>);

        observers.attempt(&record(AttemptOutcome::Success));

        assert_eq!(a.attempts().len(), 1);
        assert_eq!(b.attempts().len(), 1);
    }

    #[test]
    fn tracing_observer_emits_events() {
        let subscriber = tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).with_test_writer().finish();

        tracing::subscriber::with_default(subscriber, || {
            let observer = TracingObserver;
            observer.on_attempt(&record(AttemptOutcome::Success));
            observer.on_attempt(&record(AttemptOutcome::RetryableError));
            observer.on_abandoned(&AbandonedRecord {
                correlation_id: CorrelationId::generate(),
                reason: AbandonReason::SlaExceeded,
                attempts: 2,
                in_flight_attempt: Some(1),
                elapsed: Duration::from_secs(2),
            });
        });
    }

    #[test]
    fn outcome_names() {
        assert_eq!(AttemptOutcome::RetryableError.as_str(), "retryable_error");
        assert_eq!(AttemptOutcome::Timeout.as_str(), "timeout");
    }
}
