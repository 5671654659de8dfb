// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::constants::MIN_SAMPLING_DURATION;

const BUCKET_COUNT: u32 = 10;

/// Failure rate observed over the sampling period.
#[derive(Debug, Copy, Clone, PartialEq)]
pub(crate) struct HealthSnapshot {
    pub throughput: u32,
    pub failure_rate: f32,
    pub unhealthy: bool,
}

impl HealthSnapshot {
    fn new(successes: u32, failures: u32, threshold: f32, min_throughput: u32) -> Self {
        let throughput = successes.saturating_add(failures);
        if throughput == 0 {
            return Self {
                throughput,
                failure_rate: 0.0,
                unhealthy: false,
            };
        }

        #[expect(clippy::cast_possible_truncation, reason = "a rate needs no more precision than f32")]
        let failure_rate = (f64::from(failures) / f64::from(throughput)) as f32;

        Self {
            throughput,
            failure_rate,
            unhealthy: failure_rate >= threshold && throughput >= min_throughput,
        }
    }
}

/// Vendor outcomes over a sliding sampling period, kept in ten fixed-size buckets.
///
/// Recording and reading are O(1) amortized: stale buckets are dropped from the front
/// and at most ten buckets are ever summed.
#[derive(Debug)]
pub(crate) struct HealthWindow {
    sampling: Duration,
    bucket_length: Duration,
    buckets: VecDeque<Bucket>,
    threshold: f32,
    min_throughput: u32,
}

#[derive(Debug)]
struct Bucket {
    started_at: Instant,
    successes: u32,
    failures: u32,
}

impl HealthWindow {
    pub fn new(sampling: Duration, threshold: f32, min_throughput: u32) -> Self {
        let sampling = sampling.max(MIN_SAMPLING_DURATION);
        Self {
            sampling,
            bucket_length: sampling / BUCKET_COUNT,
            buckets: VecDeque::with_capacity(BUCKET_COUNT as usize),
            threshold,
            min_throughput,
        }
    }

    pub fn record(&mut self, success: bool, now: Instant) {
        while let Some(front) = self.buckets.front()
            && now.duration_since(front.started_at) > self.sampling
        {
            self.buckets.pop_front();
        }

        if self
            .buckets
            .back()
            .is_none_or(|back| now.duration_since(back.started_at) >= self.bucket_length)
        {
            self.buckets.push_back(Bucket {
                started_at: now,
                successes: 0,
                failures: 0,
            });
        }

        let Some(bucket) = self.buckets.back_mut() else { return };

        if success {
            bucket.successes = bucket.successes.saturating_add(1);
        } else {
            bucket.failures = bucket.failures.saturating_add(1);
        }
    }

    pub fn snapshot(&self, now: Instant) -> HealthSnapshot {
        let (successes, failures) = self
            .buckets
            .iter()
            .filter(|bucket| now.duration_since(bucket.started_at) <= self.sampling)
            .fold((0_u32, 0_u32), |(s, f), bucket| {
                (s.saturating_add(bucket.successes), f.saturating_add(bucket.failures))
            });

        HealthSnapshot::new(successes, failures, self.threshold, self.min_throughput)
    }
}
