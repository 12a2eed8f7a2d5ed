//! Shared run counters for the /health endpoint.
//! Updated by DatasetWriter and the scheduler.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};

/// Shared health metrics. Updated by the writer, read by API.
#[derive(Default)]
pub struct HealthState {
    /// True while the scheduler loop is alive.
    pub scheduler_running: AtomicBool,
    /// Millisecond timestamp of the last successful invocation (0 = none).
    pub last_run_at_ms: AtomicI64,
    pub runs_ok: AtomicU64,
    pub runs_failed: AtomicU64,
    /// Subset of `runs_ok` that found their window already written.
    pub runs_skipped: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_scheduler_running(&self, v: bool) {
        self.scheduler_running.store(v, Ordering::Relaxed);
    }

    pub fn record_success(&self, at: DateTime<Utc>, skipped: bool) {
        self.runs_ok.fetch_add(1, Ordering::Relaxed);
        if skipped {
            self.runs_skipped.fetch_add(1, Ordering::Relaxed);
        }
        self.last_run_at_ms.store(at.timestamp_millis(), Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn scheduler_running(&self) -> bool {
        self.scheduler_running.load(Ordering::Relaxed)
    }

    pub fn last_run_at(&self) -> Option<DateTime<Utc>> {
        match self.last_run_at_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }

    pub fn runs_ok(&self) -> u64 {
        self.runs_ok.load(Ordering::Relaxed)
    }

    pub fn runs_failed(&self) -> u64 {
        self.runs_failed.load(Ordering::Relaxed)
    }

    pub fn runs_skipped(&self) -> u64 {
        self.runs_skipped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn counters_track_outcomes() {
        let health = HealthState::new();
        assert_eq!(health.last_run_at(), None);

        let at = Utc.with_ymd_and_hms(2024, 3, 15, 10, 0, 0).unwrap();
        health.record_success(at, false);
        health.record_success(at, true);
        health.record_failure();

        assert_eq!(health.runs_ok(), 2);
        assert_eq!(health.runs_skipped(), 1);
        assert_eq!(health.runs_failed(), 1);
        assert_eq!(health.last_run_at(), Some(at));
    }
}
