// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use opentelemetry::metrics::{Counter, Histogram, Meter, MeterProvider};
use opentelemetry::{InstrumentationScope, KeyValue};

use crate::observe::{AbandonedRecord, AttemptObserver, AttemptRecord};

const METER_NAME: &str = "tollgate";
const VERSION: &str = "v0.1.0";
const SCHEMA_URL: &str = "https://opentelemetry.io/schemas/1.47.0";

fn create_meter(meter_provider: &dyn MeterProvider) -> Meter {
    meter_provider.meter_with_scope(
        InstrumentationScope::builder(METER_NAME)
            .with_version(VERSION)
            .with_schema_url(SCHEMA_URL)
            .build(),
    )
}

/// Reports attempts and abandoned calls as OpenTelemetry metrics.
///
/// - `tollgate.attempt` counts attempts by outcome and error kind.
/// - `tollgate.attempt.duration` records attempt durations in seconds.
/// - `tollgate.abandoned` counts abandoned calls by reason.
#[derive(Debug, Clone)]
pub struct MetricsObserver {
    attempts: Counter<u64>,
    durations: Histogram<f64>,
    abandoned: Counter<u64>,
    vendor: KeyValue,
}

impl MetricsObserver {
    /// Creates the instruments on `meter_provider`, tagging them with `vendor_key`.
    #[must_use]
    pub fn new(meter_provider: &dyn MeterProvider, vendor_key: impl Into<String>) -> Self {
        let meter = create_meter(meter_provider);

        Self {
            attempts: meter
                .u64_counter("tollgate.attempt")
                .with_description("Emitted once per attempt against the vendor.")
                .with_unit("{attempt}")
                .build(),
            durations: meter
                .f64_histogram("tollgate.attempt.duration")
                .with_description("Duration of an attempt including admission waits.")
                .with_unit("s")
                .build(),
            abandoned: meter
                .u64_counter("tollgate.abandoned")
                .with_description("Emitted when a call is abandoned by deadline or cancellation.")
                .with_unit("{call}")
                .build(),
            vendor: KeyValue::new("tollgate.vendor", vendor_key.into()),
        }
    }
}

impl AttemptObserver for MetricsObserver {
    fn on_attempt(&self, record: &AttemptRecord) {
        let attributes = [
            self.vendor.clone(),
            KeyValue::new("tollgate.attempt.outcome", record.outcome.as_str()),
            KeyValue::new("tollgate.attempt.error", record.error.map_or("none", |kind| kind.as_str())),
        ];

        self.attempts.add(1, &attributes);
        self.durations.record(record.duration.as_secs_f64(), &attributes);
    }

    fn on_abandoned(&self, record: &AbandonedRecord) {
        self.abandoned.add(
            1,
            &[
                self.vendor.clone(),
                KeyValue::new("tollgate.abandon.reason", format!("{:?}", record.reason)),
            ],
        );
    }
}
