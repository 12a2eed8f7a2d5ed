use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Utc};
use tracing::{error, info, warn};

use crate::api::health::HealthState;
use crate::config::{SCHEDULER_RETRY_ATTEMPTS, SCHEDULER_RETRY_BACKOFF_MS};
use crate::error::Result;
use crate::types::{Granularity, InvocationEvent, RunOutcome};
use crate::window::resolver::start_of_day;
use crate::window::Clock;
use crate::writer::DatasetWriter;

/// Next UTC fire time for one incremental schedule, strictly after `now`.
///
/// - 4h: minute 5 of hours 0, 4, 8, 12, 16, 20
/// - 1d: 02:00
/// - 1w: Monday 02:30
pub fn next_fire(granularity: Granularity, now: DateTime<Utc>) -> DateTime<Utc> {
    let midnight = start_of_day(now);
    match granularity {
        Granularity::FourHourly => (0..=6)
            .map(|slot| midnight + ChronoDuration::hours(slot * 4) + ChronoDuration::minutes(5))
            .find(|t| *t > now)
            .unwrap_or(midnight + ChronoDuration::days(1) + ChronoDuration::minutes(5)),
        Granularity::Daily => {
            let today = midnight + ChronoDuration::hours(2);
            if today > now {
                today
            } else {
                today + ChronoDuration::days(1)
            }
        }
        Granularity::Weekly => {
            let monday = midnight
                - ChronoDuration::days(i64::from(now.weekday().num_days_from_monday()));
            let this_week = monday + ChronoDuration::hours(2) + ChronoDuration::minutes(30);
            if this_week > now {
                this_week
            } else {
                this_week + ChronoDuration::days(7)
            }
        }
    }
}

/// Earliest upcoming fire across all incremental schedules.
pub fn next_fire_after(now: DateTime<Utc>) -> (DateTime<Utc>, Granularity) {
    Granularity::ALL
        .iter()
        .map(|&g| (next_fire(g, now), g))
        .min_by_key(|(at, _)| *at)
        .unwrap_or((now + ChronoDuration::days(1), Granularity::Daily))
}

/// Holds `scheduler_running` up for as long as the loop future is alive,
/// including when the task is aborted or panics.
struct RunningFlag(Arc<HealthState>);

impl RunningFlag {
    fn raise(health: Arc<HealthState>) -> Self {
        health.set_scheduler_running(true);
        Self(health)
    }
}

impl Drop for RunningFlag {
    fn drop(&mut self) {
        self.0.set_scheduler_running(false);
        warn!("Incremental scheduler stopped");
    }
}

/// Drives incremental invocations on the deployment cadence.
pub struct IncrementalScheduler {
    writer: Arc<DatasetWriter>,
    clock: Arc<dyn Clock>,
    health: Arc<HealthState>,
    retry_backoff: Vec<Duration>,
}

impl IncrementalScheduler {
    pub fn new(writer: Arc<DatasetWriter>, clock: Arc<dyn Clock>, health: Arc<HealthState>) -> Self {
        let retry_backoff = SCHEDULER_RETRY_BACKOFF_MS
            .iter()
            .map(|ms| Duration::from_millis(*ms))
            .collect();
        Self { writer, clock, health, retry_backoff }
    }

    pub fn with_retry_backoff(mut self, backoff: Vec<Duration>) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub async fn run(self) {
        let _running = RunningFlag::raise(Arc::clone(&self.health));
        info!("Incremental scheduler started");

        // Fire times already handled; guards against an early wake re-firing a slot.
        let mut cursor = self.clock.now();
        loop {
            let now = self.clock.now().max(cursor);
            let (at, granularity) = next_fire_after(now);
            info!(interval = %granularity, "Next incremental run at {}", at.to_rfc3339());

            let wait = (at - self.clock.now()).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(wait).await;
            cursor = at;

            // Outcome already logged; failures are counted in HealthState.
            let _ = self.fire(granularity).await;
        }
    }

    /// One scheduled invocation with bounded retries. Config errors are not retried.
    pub async fn fire(&self, granularity: Granularity) -> Result<RunOutcome> {
        let event = InvocationEvent::incremental(granularity);
        let mut attempt = 0usize;

        loop {
            match self.writer.run(&event).await {
                Ok(outcome) => {
                    info!(
                        interval = %granularity,
                        records = outcome.total_records(),
                        "Scheduled run finished: {}",
                        outcome.body()["message"]
                    );
                    return Ok(outcome);
                }
                Err(e) if e.is_config() || attempt >= SCHEDULER_RETRY_ATTEMPTS => {
                    error!(interval = %granularity, attempt, "Scheduled run failed: {e}");
                    return Err(e);
                }
                Err(e) => {
                    let backoff = self
                        .retry_backoff
                        .get(attempt)
                        .or_else(|| self.retry_backoff.last())
                        .copied()
                        .unwrap_or(Duration::ZERO);
                    attempt += 1;
                    warn!(
                        interval = %granularity,
                        attempt,
                        "Scheduled run failed, retrying in {}ms: {e}",
                        backoff.as_millis()
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
