use chrono::{DateTime, Utc};

use crate::error::{AppError, Result};

/// Default price anchors over history progress.
///
/// The drop from 20 000 at 0.7 to 3 000 at 0.8 is the boom/bust leg of the
/// synthetic shape and must stay as written.
pub const DEFAULT_MILESTONES: &[(f64, f64)] = &[
    (0.0, 0.01),
    (0.1, 1.0),
    (0.2, 10.0),
    (0.3, 100.0),
    (0.4, 1_000.0),
    (0.5, 5_000.0),
    (0.6, 10_000.0),
    (0.7, 20_000.0),
    (0.8, 3_000.0),
    (0.9, 10_000.0),
    (1.0, 65_000.0),
];

/// One era of history: applies while `progress < upper` (the last band is open-ended).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EraBand {
    pub upper: f64,
    /// Half-width of the uniform volatility draw.
    pub volatility: f64,
    pub base_volume: f64,
}

pub const DEFAULT_ERA_BANDS: &[EraBand] = &[
    EraBand { upper: 0.1, volatility: 0.50, base_volume: 1_000_000.0 },
    EraBand { upper: 0.3, volatility: 0.30, base_volume: 10_000_000.0 },
    EraBand { upper: 0.7, volatility: 0.20, base_volume: 100_000_000.0 },
    EraBand { upper: f64::INFINITY, volatility: 0.15, base_volume: 10_000_000_000.0 },
];

/// Supply schedule segments: `(years_from, offset, coins_per_year)`.
const SUPPLY_SEGMENTS: &[(f64, f64, f64)] = &[
    (0.0, 0.0, 525_000.0),
    (4.0, 2_100_000.0, 262_500.0),
    (8.0, 3_150_000.0, 131_250.0),
    (12.0, 4_200_000.0, 65_625.0),
];

const DAYS_PER_YEAR: f64 = 365.25;

/// Span of synthetic history used to normalize instants into progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryBounds {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl HistoryBounds {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start >= end {
            return Err(AppError::Config(format!(
                "history start {start} must precede history end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Whole days between start and end.
    pub fn total_days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// Fraction of history elapsed at `ts`, clamped to [0, 1].
    pub fn progress(&self, ts: DateTime<Utc>) -> f64 {
        let span = (self.end - self.start).num_milliseconds() as f64 / 1000.0;
        let span = if span > 0.0 { span } else { 1.0 };
        let elapsed = (ts - self.start).num_milliseconds() as f64 / 1000.0;
        (elapsed / span).clamp(0.0, 1.0)
    }
}

/// Pure mapping from a point in history to price, volatility and volume regimes.
///
/// Tables are injected so tests can swap in alternate shapes; `Default` carries
/// the production tables.
#[derive(Debug, Clone)]
pub struct PriceModel {
    milestones: Vec<(f64, f64)>,
    bands: Vec<EraBand>,
    history_start: DateTime<Utc>,
}

impl PriceModel {
    pub fn new(
        milestones: Vec<(f64, f64)>,
        bands: Vec<EraBand>,
        history_start: DateTime<Utc>,
    ) -> Result<Self> {
        validate_milestones(&milestones)?;
        if bands.is_empty() {
            return Err(AppError::Config("era band table is empty".to_string()));
        }
        if bands.windows(2).any(|w| w[0].upper >= w[1].upper) {
            return Err(AppError::Config(
                "era band upper bounds must be strictly increasing".to_string(),
            ));
        }
        if bands.iter().any(|b| !(b.volatility >= 0.0 && b.volatility.is_finite())) {
            return Err(AppError::Config(
                "era band volatility must be finite and non-negative".to_string(),
            ));
        }
        if bands.iter().any(|b| !(b.base_volume > 0.0 && b.base_volume.is_finite())) {
            return Err(AppError::Config(
                "era band base volume must be finite and positive".to_string(),
            ));
        }
        Ok(Self { milestones, bands, history_start })
    }

    pub fn history_start(&self) -> DateTime<Utc> {
        self.history_start
    }

    /// Linear interpolation between the milestones bracketing `progress`.
    pub fn interpolate_price(&self, progress: f64) -> f64 {
        let Some(idx) = self.milestones.iter().position(|&(key, _)| progress <= key) else {
            // Past every key: hold the final anchor.
            return self.milestones[self.milestones.len() - 1].1;
        };

        let (next_key, next_price) = self.milestones[idx];
        if idx == 0 {
            return next_price;
        }
        let (prev_key, prev_price) = self.milestones[idx - 1];
        let ratio = (progress - prev_key) / (next_key - prev_key);
        prev_price + (next_price - prev_price) * ratio
    }

    fn band(&self, progress: f64) -> &EraBand {
        self.bands
            .iter()
            .find(|b| progress < b.upper)
            .unwrap_or(&self.bands[self.bands.len() - 1])
    }

    /// Symmetric volatility range for the era, before granularity scaling.
    pub fn volatility_range(&self, progress: f64) -> (f64, f64) {
        let v = self.band(progress).volatility;
        (-v, v)
    }

    /// Era base volume, before the random activity factor.
    pub fn base_volume(&self, progress: f64) -> f64 {
        self.band(progress).base_volume
    }

    /// Approximate circulating supply at `ts`, piecewise linear in years since start.
    pub fn circulating_supply(&self, ts: DateTime<Utc>) -> f64 {
        let years = (ts - self.history_start).num_days() as f64 / DAYS_PER_YEAR;
        let &(from, offset, rate) = SUPPLY_SEGMENTS
            .iter()
            .rev()
            .find(|&&(from, _, _)| years >= from)
            .unwrap_or(&SUPPLY_SEGMENTS[0]);
        offset + (years - from) * rate
    }
}

impl Default for PriceModel {
    fn default() -> Self {
        Self {
            milestones: DEFAULT_MILESTONES.to_vec(),
            bands: DEFAULT_ERA_BANDS.to_vec(),
            history_start: crate::config::history_start(),
        }
    }
}

fn validate_milestones(milestones: &[(f64, f64)]) -> Result<()> {
    let (Some(first), Some(last)) = (milestones.first(), milestones.last()) else {
        return Err(AppError::Config("price milestone table is empty".to_string()));
    };
    if first.0 != 0.0 || last.0 != 1.0 {
        return Err(AppError::Config(
            "price milestones must span progress 0.0 to 1.0".to_string(),
        ));
    }
    if milestones.windows(2).any(|w| w[0].0 >= w[1].0) {
        return Err(AppError::Config(
            "price milestone keys must be strictly increasing".to_string(),
        ));
    }
    if milestones.iter().any(|&(_, price)| price <= 0.0) {
        return Err(AppError::Config("price milestones must be positive".to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn model() -> PriceModel {
        PriceModel::default()
    }

    #[test]
    fn milestone_keys_return_exact_anchor() {
        let m = model();
        assert_eq!(m.interpolate_price(0.5), 5_000.0);
        assert_eq!(m.interpolate_price(0.0), 0.01);
        assert_eq!(m.interpolate_price(1.0), 65_000.0);
        assert_eq!(m.interpolate_price(0.8), 3_000.0);
    }

    #[test]
    fn interpolates_between_anchors() {
        let m = model();
        // Halfway between 0.4 → 1000 and 0.5 → 5000.
        let p = m.interpolate_price(0.45);
        assert!((p - 3_000.0).abs() < 1e-6, "p={p}");
    }

    #[test]
    fn boom_bust_leg_is_preserved() {
        let m = model();
        let peak = m.interpolate_price(0.7);
        let mid = m.interpolate_price(0.75);
        let trough = m.interpolate_price(0.8);
        assert!(peak > mid && mid > trough);
        assert!((mid - 11_500.0).abs() < 1e-6, "mid={mid}");
    }

    #[test]
    fn out_of_range_progress_is_clamped_to_table_ends() {
        let m = model();
        assert_eq!(m.interpolate_price(-0.5), 0.01);
        assert_eq!(m.interpolate_price(1.5), 65_000.0);
    }

    #[test]
    fn volatility_bands() {
        let m = model();
        assert_eq!(m.volatility_range(0.05), (-0.50, 0.50));
        assert_eq!(m.volatility_range(0.1), (-0.30, 0.30));
        assert_eq!(m.volatility_range(0.29), (-0.30, 0.30));
        assert_eq!(m.volatility_range(0.5), (-0.20, 0.20));
        assert_eq!(m.volatility_range(0.7), (-0.15, 0.15));
        assert_eq!(m.volatility_range(1.0), (-0.15, 0.15));
    }

    #[test]
    fn base_volume_bands() {
        let m = model();
        assert_eq!(m.base_volume(0.0), 1_000_000.0);
        assert_eq!(m.base_volume(0.2), 10_000_000.0);
        assert_eq!(m.base_volume(0.69), 100_000_000.0);
        assert_eq!(m.base_volume(0.95), 10_000_000_000.0);
    }

    #[test]
    fn supply_is_zero_at_history_start() {
        let m = model();
        assert_eq!(m.circulating_supply(m.history_start()), 0.0);
    }

    #[test]
    fn supply_halving_boundaries() {
        let m = model();
        let start = m.history_start();
        // 1461 and 2922 days are exactly 4 and 8 years of 365.25 days.
        // The day before each boundary still follows the previous segment's rate.
        let cases = [
            (1461, 2_100_000.0, 1460.0 / DAYS_PER_YEAR * 525_000.0),
            (2922, 3_150_000.0, 2_100_000.0 + (2921.0 / DAYS_PER_YEAR - 4.0) * 262_500.0),
        ];
        for (days, expected, expected_before) in cases {
            let at = m.circulating_supply(start + Duration::days(days));
            let before = m.circulating_supply(start + Duration::days(days - 1));
            assert!((at - expected).abs() < 1e-6, "at {days} days: {at}");
            assert!((before - expected_before).abs() < 1e-6, "before {days} days: {before}");
            assert!(at > before);
        }
        let twelve = m.circulating_supply(start + Duration::days(4383));
        assert!((twelve - 4_200_000.0).abs() < 1e-6, "twelve={twelve}");
    }

    #[test]
    fn supply_matches_rate_in_first_segment() {
        let m = model();
        let ts = m.history_start() + Duration::days(365);
        let expected = 365.0 / DAYS_PER_YEAR * 525_000.0;
        assert!((m.circulating_supply(ts) - expected).abs() < 1e-6);
    }

    #[test]
    fn injected_tables_are_used() {
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let m = PriceModel::new(
            vec![(0.0, 10.0), (1.0, 20.0)],
            vec![EraBand { upper: f64::INFINITY, volatility: 0.01, base_volume: 42.0 }],
            start,
        )
        .unwrap();
        assert!((m.interpolate_price(0.5) - 15.0).abs() < 1e-9);
        assert_eq!(m.volatility_range(0.9), (-0.01, 0.01));
        assert_eq!(m.base_volume(0.1), 42.0);
    }

    #[test]
    fn invalid_tables_are_rejected() {
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let bands = DEFAULT_ERA_BANDS.to_vec();
        assert!(PriceModel::new(vec![], bands.clone(), start).is_err());
        assert!(PriceModel::new(vec![(0.0, 1.0), (0.9, 2.0)], bands.clone(), start).is_err());
        assert!(PriceModel::new(vec![(0.0, 1.0), (0.5, 2.0), (0.5, 3.0), (1.0, 4.0)], bands.clone(), start).is_err());
        assert!(PriceModel::new(vec![(0.0, 0.0), (1.0, 4.0)], bands, start).is_err());
        assert!(PriceModel::new(vec![(0.0, 1.0), (1.0, 4.0)], vec![], start).is_err());

        let band = |volatility: f64, base_volume: f64| {
            vec![EraBand { upper: f64::INFINITY, volatility, base_volume }]
        };
        let anchors = || vec![(0.0, 1.0), (1.0, 4.0)];
        for (volatility, base_volume) in [
            (-0.1, 1.0),
            (f64::NAN, 1.0),
            (f64::INFINITY, 1.0),
            (0.1, 0.0),
            (0.1, -5.0),
            (0.1, f64::NAN),
        ] {
            let err = PriceModel::new(anchors(), band(volatility, base_volume), start).unwrap_err();
            assert!(err.is_config(), "volatility={volatility} base_volume={base_volume}");
        }
        // Zero volatility is a flat but valid band.
        assert!(PriceModel::new(anchors(), band(0.0, 1.0), start).is_ok());
    }

    #[test]
    fn history_bounds_reject_inverted_span() {
        let a = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        assert!(HistoryBounds::new(a, a).is_err());
        assert!(HistoryBounds::new(a + Duration::days(1), a).is_err());
    }

    #[test]
    fn progress_is_clamped_and_linear() {
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let bounds = HistoryBounds::new(start, start + Duration::days(10)).unwrap();
        assert_eq!(bounds.progress(start - Duration::days(1)), 0.0);
        assert_eq!(bounds.progress(start + Duration::days(20)), 1.0);
        assert!((bounds.progress(start + Duration::days(5)) - 0.5).abs() < 1e-12);
        assert_eq!(bounds.total_days(), 10);
    }
}
