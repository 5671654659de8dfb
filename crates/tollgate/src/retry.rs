// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use crate::attempt::Attempt;
use crate::backoff::BackoffPolicy;
use crate::config::AdmissionTimeoutRetry;
use crate::error::{CallError, ErrorKind, RateScope};
use crate::observe::{AttemptOutcome, AttemptRecord, Observers};

/// Whether a failed attempt is followed by another one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Back off and try again.
    Retry,
    /// Give up and surface the error.
    Terminal,
}

/// Classifies a failed attempt.
///
/// This is the single place that decides retryability; the match over [`ErrorKind`]
/// is exhaustive, so a new kind cannot slip through unclassified.
///
/// | Kind | Verdict |
/// |---|---|
/// | `VendorTransportError`, `VendorTimeout`, `VendorServerError` | retry |
/// | `RateLimited` by the global limiter | retry |
/// | `RateLimited` by the local limiter, `ConcurrencyExhausted` | per [`AdmissionTimeoutRetry`] |
/// | `VendorClientError`, `CircuitOpen`, `SlaExceeded`, `AdmissionRejected` | terminal |
///
/// A retryable failure on the last attempt is terminal.
#[must_use]
pub fn classify(error: &CallError, attempt: Attempt, admission_timeouts: AdmissionTimeoutRetry) -> Verdict {
    let local_admission_timeout = match admission_timeouts {
        AdmissionTimeoutRetry::Never => false,
        AdmissionTimeoutRetry::Once => attempt.is_first(),
    };

    let retryable = match error.kind() {
        ErrorKind::VendorTransportError | ErrorKind::VendorTimeout | ErrorKind::VendorServerError => true,
        ErrorKind::RateLimited => match error.rate_scope() {
            Some(RateScope::Global) => true,
            Some(RateScope::Local) | None => local_admission_timeout,
        },
        ErrorKind::ConcurrencyExhausted => local_admission_timeout,
        ErrorKind::VendorClientError | ErrorKind::CircuitOpen | ErrorKind::SlaExceeded | ErrorKind::AdmissionRejected => false,
    };

    if retryable && !attempt.is_last() {
        Verdict::Retry
    } else {
        Verdict::Terminal
    }
}

/// A call that produced a value.
#[derive(Debug)]
pub(crate) struct Completed<T> {
    pub value: T,
    pub attempts: u32,
}

/// Sequences attempts with backoff in between.
///
/// Each attempt is a future that owns all of its reservations. The future has
/// completed, and dropped them, before the backoff sleep starts.
#[derive(Debug)]
pub(crate) struct RetryOrchestrator {
    max_attempts: u32,
    backoff: BackoffPolicy,
    admission_timeouts: AdmissionTimeoutRetry,
}

impl RetryOrchestrator {
    pub fn new(max_attempts: u32, backoff: BackoffPolicy, admission_timeouts: AdmissionTimeoutRetry) -> Self {
        Self {
            max_attempts,
            backoff,
            admission_timeouts,
        }
    }

    pub async fn run<T, F, Fut>(&self, mut attempt_fn: F, observers: &Observers) -> Result<Completed<T>, CallError>
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = (Result<T, CallError>, AttemptRecord)>,
    {
        let mut attempt = Attempt::first(self.max_attempts);

        loop {
            let (result, mut record) = attempt_fn(attempt).await;

            let error = match result {
                Ok(value) => {
                    record.outcome = AttemptOutcome::Success;
                    observers.attempt(&record);
                    return Ok(Completed {
                        value,
                        attempts: attempt.count(),
                    });
                }
                Err(error) => error,
            };

            let next = match classify(&error, attempt, self.admission_timeouts) {
                Verdict::Retry => attempt.next(self.max_attempts),
                Verdict::Terminal => None,
            };

            record.outcome = match (error.kind(), next) {
                (ErrorKind::VendorTimeout, _) => AttemptOutcome::Timeout,
                (_, Some(_)) => AttemptOutcome::RetryableError,
                (_, None) => AttemptOutcome::TerminalError,
            };

            let Some(next) = next else {
                observers.attempt(&record);
                return Err(error.with_attempts(attempt.count()));
            };

            let delay = self.delay_after(&error, attempt);
            record.retry_delay = Some(delay);
            observers.attempt(&record);

            tracing::event!(
                name: "tollgate.retry",
                tracing::Level::WARN,
                correlation_id = %record.correlation_id,
                attempt.index = attempt.index(),
                attempt.error = error.kind().as_str(),
                retry.delay = delay.as_secs_f32(),
            );

            tokio::time::sleep(delay).await;
            attempt = next;
        }
    }

    fn delay_after(&self, error: &CallError, attempt: Attempt) -> Duration {
        match (error.kind(), error.retry_after()) {
            (ErrorKind::VendorServerError, Some(hint)) => hint.min(self.backoff.cap()),
            _ => self.backoff.delay(attempt.index()),
        }
    }
}
