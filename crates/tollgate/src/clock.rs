// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::Instant;

/// Wall-clock milliseconds that advance with the tokio clock.
///
/// Shared records (breaker state, global rate windows) carry Unix timestamps so that
/// every process in the fleet reads them the same way. The clock anchors the system
/// time once and then advances by tokio's monotonic [`Instant`], which keeps
/// timestamps monotonic within the process and lets paused-time tests move them.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Clock {
    anchor_millis: u64,
    anchor_instant: Instant,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    pub fn new() -> Self {
        let anchor_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));

        Self {
            anchor_millis,
            anchor_instant: Instant::now(),
        }
    }

    /// Milliseconds since the Unix epoch.
    pub fn unix_millis(&self) -> u64 {
        let elapsed = u64::try_from(self.anchor_instant.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.anchor_millis.saturating_add(elapsed)
    }
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
