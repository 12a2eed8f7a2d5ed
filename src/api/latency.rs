//! How long invocations take, end to end.
//!
//! Every `DatasetWriter` run lands here once, whether it wrote, skipped or
//! failed. A skipped incremental run costs one `head` call; a full backfill
//! generates ~40k points and takes seconds, so the range is wide.

use std::sync::Mutex;
use std::time::Duration;

/// Run-duration histogram in microseconds, fed by the writer and served on
/// `/stats/latency` in milliseconds.
pub struct LatencyStats {
    inner: Mutex<hdrhistogram::Histogram<u64>>,
}

impl LatencyStats {
    /// Anything above an hour is dropped rather than clamped.
    pub fn new() -> Self {
        let histogram = hdrhistogram::Histogram::new_with_bounds(1, 3_600_000_000, 3)
            .expect("valid histogram bounds");
        Self { inner: Mutex::new(histogram) }
    }

    /// Sub-microsecond runs count as 1us; the histogram has no zero bucket.
    pub fn record_us(&self, us: u64) {
        if let Ok(mut h) = self.inner.lock() {
            let _ = h.record(us.max(1));
        }
    }

    pub fn record(&self, d: Duration) {
        let us = d.as_micros().min(u128::from(u64::MAX)) as u64;
        self.record_us(us);
    }

    /// Median, p95 and p99 run time in microseconds, or all `None` before the first run.
    pub fn percentiles(&self) -> (Option<u64>, Option<u64>, Option<u64>) {
        let Ok(h) = self.inner.lock() else {
            return (None, None, None);
        };
        if h.len() == 0 {
            return (None, None, None);
        }
        (
            Some(h.value_at_quantile(0.5)),
            Some(h.value_at_quantile(0.95)),
            Some(h.value_at_quantile(0.99)),
        )
    }

    /// Number of runs recorded since startup.
    pub fn len(&self) -> u64 {
        self.inner.lock().map(|h| h.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}
