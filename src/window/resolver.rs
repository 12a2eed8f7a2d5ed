use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};

use crate::config::SILVER_PREFIX;
use crate::error::{AppError, Result};
use crate::model::HistoryBounds;
use crate::types::{Granularity, Mode};

/// Storage key for one dataset object.
///
/// Incremental keys are derived only from the window end, so the same closed
/// window always maps to the same key. Full keys embed the generation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutputKey(String);

impl OutputKey {
    pub fn incremental(granularity: Granularity, window_end: DateTime<Utc>) -> Self {
        Self::build(granularity, window_end, &granularity.key_stamp(window_end))
    }

    pub fn full(granularity: Granularity, generated_at: DateTime<Utc>) -> Self {
        let stamp = generated_at.format("%Y%m%d_%H%M%S").to_string();
        Self::build(granularity, generated_at, &stamp)
    }

    fn build(granularity: Granularity, date: DateTime<Utc>, stamp: &str) -> Self {
        Self(format!(
            "{SILVER_PREFIX}/interval={granularity}/ingestion_date={}/bitcoin_market_{granularity}_{stamp}.json",
            date.format("%Y/%m/%d"),
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OutputKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A window to generate plus where its dataset goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedWindow {
    pub granularity: Granularity,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub max_points: usize,
    pub key: OutputKey,
    pub description: String,
}

/// Resolve the windows for one invocation.
///
/// Full mode yields one whole-history window per granularity (1w, 4h, 1d).
/// Incremental mode yields the single most recently closed window.
pub fn resolve(
    mode: Mode,
    interval: Option<Granularity>,
    bounds: &HistoryBounds,
    now: DateTime<Utc>,
) -> Result<Vec<ResolvedWindow>> {
    match mode {
        Mode::Full => Ok(resolve_full(bounds, now)),
        Mode::Incremental => {
            let g = interval.ok_or_else(|| {
                AppError::Config("incremental mode requires interval in {'1d','4h','1w'}".to_string())
            })?;
            Ok(vec![resolve_incremental(g, now)])
        }
    }
}

pub fn resolve_full(bounds: &HistoryBounds, generated_at: DateTime<Utc>) -> Vec<ResolvedWindow> {
    let total_days = usize::try_from(bounds.total_days()).unwrap_or(0);

    Granularity::ALL
        .iter()
        .map(|&g| {
            let max_points = full_point_count(g, total_days);
            ResolvedWindow {
                granularity: g,
                start: bounds.start,
                end: bounds.end,
                max_points,
                key: OutputKey::full(g, generated_at),
                description: format!("{} data ({max_points} points)", g.description()),
            }
        })
        .collect()
}

/// Point budget for a whole-history run over `total_days` days.
pub fn full_point_count(granularity: Granularity, total_days: usize) -> usize {
    match granularity {
        Granularity::Weekly => total_days / 7,
        Granularity::FourHourly => total_days * 24 / 4,
        Granularity::Daily => total_days,
    }
}

pub fn resolve_incremental(granularity: Granularity, now: DateTime<Utc>) -> ResolvedWindow {
    let (start, end) = closed_window(granularity, now);
    ResolvedWindow {
        granularity,
        start,
        end,
        max_points: 1,
        key: OutputKey::incremental(granularity, end),
        description: format!("Incremental {granularity}"),
    }
}

/// Most recent window of `granularity` that ended at or before `now`.
pub fn closed_window(granularity: Granularity, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let midnight = start_of_day(now);
    match granularity {
        Granularity::Daily => (midnight - Duration::days(1), midnight),
        Granularity::FourHourly => {
            let boundary = midnight + Duration::hours(i64::from(now.hour() / 4 * 4));
            (boundary - Duration::hours(4), boundary)
        }
        Granularity::Weekly => {
            // Weeks start on Monday.
            let monday = midnight - Duration::days(i64::from(now.weekday().num_days_from_monday()));
            (monday - Duration::days(7), monday)
        }
    }
}

pub(crate) fn start_of_day(ts: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&ts.date_naive().and_time(chrono::NaiveTime::MIN))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
