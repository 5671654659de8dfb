// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing_subscriber::fmt::MakeWriter;

use crate::coordinator::{CoordinatorError, SharedCoordinator, WindowDecision, WindowRequest};
use crate::observe::{AbandonedRecord, AttemptObserver, AttemptRecord};

/// A coordination store that is always down.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct UnavailableCoordinator;

fn unavailable() -> CoordinatorError {
    CoordinatorError::new("store unavailable")
}

impl SharedCoordinator for UnavailableCoordinator {
    async fn get(&self, _key: &str) -> Result<Option<String>, CoordinatorError> {
        Err(unavailable())
    }

    async fn compare_and_swap(
        &self,
        _key: &str,
        _expected: Option<&str>,
        _new: &str,
        _ttl: Duration,
    ) -> Result<bool, CoordinatorError> {
        Err(unavailable())
    }

    async fn increment(&self, _key: &str, _ttl: Duration) -> Result<i64, CoordinatorError> {
        Err(unavailable())
    }

    async fn delete(&self, _key: &str) -> Result<(), CoordinatorError> {
        Err(unavailable())
    }

    async fn sliding_window_acquire(&self, _key: &str, _request: WindowRequest<'_>) -> Result<WindowDecision, CoordinatorError> {
        Err(unavailable())
    }

    async fn sliding_window_release(&self, _key: &str, _member: &str) -> Result<(), CoordinatorError> {
        Err(unavailable())
    }
}

/// Keeps every record it receives.
#[derive(Debug, Default)]
pub(crate) struct RecordingObserver {
    attempts: Mutex<Vec<AttemptRecord>>,
    abandoned: Mutex<Vec<AbandonedRecord>>,
}

impl RecordingObserver {
    pub fn attempts(&self) -> Vec<AttemptRecord> {
        self.attempts.lock().clone()
    }

    pub fn abandoned(&self) -> Vec<AbandonedRecord> {
        self.abandoned.lock().clone()
    }
}

impl AttemptObserver for RecordingObserver {
    fn on_attempt(&self, record: &AttemptRecord) {
        self.attempts.lock().push(record.clone());
    }

    fn on_abandoned(&self, record: &AbandonedRecord) {
        self.abandoned.lock().push(record.clone());
    }
}

/// Collects formatted log output for assertions.
#[derive(Debug, Clone, Default)]
pub(crate) struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock()).into_owned()
    }

    pub fn assert_contains(&self, expected: &str) {
        let output = self.output();
        assert!(output.contains(expected), "log output does not contain '{expected}', got:\n{output}");
    }

    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync + 'static {
        use tracing_subscriber::layer::SubscriberExt;
        tracing_subscriber::registry().with(tracing_subscriber::fmt::layer().with_writer(self.clone()).with_ansi(false))
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = CaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CaptureWriter(Arc::clone(&self.buffer))
    }
}

#[derive(Debug)]
pub(crate) struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

impl Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
