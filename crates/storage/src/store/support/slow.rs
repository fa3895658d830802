#![forbid(unsafe_code)]

use std::time::{Duration, Instant};
use tracing::warn;

/// Logs a warning when dropped later than `threshold` after creation.
pub(in crate::store) struct SlowOpGuard {
    label: &'static str,
    started: Instant,
    threshold: Duration,
}

impl SlowOpGuard {
    pub(in crate::store) fn new(label: &'static str, threshold: Duration) -> Self {
        Self {
            label,
            started: Instant::now(),
            threshold,
        }
    }
}

impl Drop for SlowOpGuard {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        if elapsed > self.threshold {
            warn!(
                op = self.label,
                elapsed_ms = elapsed.as_millis() as u64,
                threshold_ms = self.threshold.as_millis() as u64,
                "slow sqlite transaction"
            );
        }
    }
}
