use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::debug;

use crate::model::{HistoryBounds, PriceModel};
use crate::types::{Granularity, MarketPoint};

/// Prices never drop below this floor, whatever the volatility draw.
pub const PRICE_FLOOR: f64 = 0.0001;

/// Uniform activity multiplier applied to the era base volume.
pub const VOLUME_FACTOR_RANGE: (f64, f64) = (0.5, 2.0);

pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Walks a time window at a fixed step over the price model.
pub struct PointGenerator<'a> {
    model: &'a PriceModel,
    bounds: HistoryBounds,
}

impl<'a> PointGenerator<'a> {
    pub fn new(model: &'a PriceModel, bounds: HistoryBounds) -> Self {
        Self { model, bounds }
    }

    /// Produce up to `max_points` points starting at `window_start`, one step apart.
    ///
    /// Points falling outside `[window_start, window_end)` are dropped rather than
    /// reported, so a generous `max_points` is always safe.
    pub fn generate<R: Rng>(
        &self,
        granularity: Granularity,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        max_points: usize,
        rng: &mut R,
    ) -> Vec<MarketPoint> {
        let step = granularity.step();
        let scale = granularity.volatility_scale();
        let mut points = Vec::with_capacity(max_points);
        let mut prev_price: Option<f64> = None;
        let mut clamped = 0usize;

        for i in 0..max_points {
            let Some(ts) = i32::try_from(i)
                .ok()
                .and_then(|i| step.checked_mul(i))
                .and_then(|offset| window_start.checked_add_signed(offset))
            else {
                clamped += max_points - i;
                break;
            };
            if ts < window_start || ts >= window_end {
                clamped += 1;
                continue;
            }

            let progress = self.bounds.progress(ts);
            let base_price = self.model.interpolate_price(progress);

            let (lo, hi) = self.model.volatility_range(progress);
            let volatility = rng.gen_range(lo..=hi) * scale;
            let price = (base_price * (1.0 + volatility)).max(PRICE_FLOOR);

            let (vlo, vhi) = VOLUME_FACTOR_RANGE;
            let volume = self.model.base_volume(progress) * rng.gen_range(vlo..=vhi);
            let market_cap = price * self.model.circulating_supply(ts);

            // Change is taken between stored (rounded) prices so the series is self-consistent.
            let stored_price = round2(price);
            let change_percent = match prev_price {
                Some(prev) if prev > 0.0 => (stored_price - prev) / prev * 100.0,
                _ => 0.0,
            };
            prev_price = Some(stored_price);

            points.push(MarketPoint {
                timestamp: ts,
                price: stored_price,
                market_cap: round2(market_cap),
                volume: round2(volume),
                change_percent: round2(change_percent),
                rank: 1,
            });
        }

        debug!(
            interval = %granularity,
            emitted = points.len(),
            clamped,
            "generated {} points for {granularity} window {window_start} .. {window_end}",
            points.len(),
        );
        points
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn bounds() -> HistoryBounds {
        let start = crate::config::history_start();
        HistoryBounds::new(start, Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap()).unwrap()
    }

    #[test]
    fn consecutive_points_are_one_step_apart() {
        let model = PriceModel::default();
        let generator = PointGenerator::new(&model, bounds());
        let mut rng = StdRng::seed_from_u64(7);
        let b = bounds();

        for g in Granularity::ALL {
            let points = generator.generate(g, b.start, b.end, 200, &mut rng);
            assert_eq!(points.len(), 200);
            for pair in points.windows(2) {
                assert_eq!(pair[1].timestamp - pair[0].timestamp, g.step(), "{g}");
            }
        }
    }

    #[test]
    fn points_outside_window_are_dropped() {
        let model = PriceModel::default();
        let generator = PointGenerator::new(&model, bounds());
        let mut rng = StdRng::seed_from_u64(11);
        let start = Utc.with_ymd_and_hms(2020, 5, 1, 0, 0, 0).unwrap();
        let end = start + Duration::days(3);

        let points = generator.generate(Granularity::Daily, start, end, 10, &mut rng);
        assert_eq!(points.len(), 3);
        assert!(points.iter().all(|p| p.timestamp >= start && p.timestamp < end));
    }

    #[test]
    fn empty_window_yields_no_points() {
        let model = PriceModel::default();
        let generator = PointGenerator::new(&model, bounds());
        let mut rng = StdRng::seed_from_u64(1);
        let start = Utc.with_ymd_and_hms(2020, 5, 1, 0, 0, 0).unwrap();

        assert!(generator.generate(Granularity::Weekly, start, start, 5, &mut rng).is_empty());
        assert!(generator.generate(Granularity::Weekly, start, start + Duration::days(7), 0, &mut rng).is_empty());
    }

    #[test]
    fn first_point_has_zero_change() {
        let model = PriceModel::default();
        let generator = PointGenerator::new(&model, bounds());
        let b = bounds();
        let start = Utc.with_ymd_and_hms(2020, 5, 1, 0, 0, 0).unwrap();
        for seed in 0..5 {
            let mut rng = StdRng::seed_from_u64(seed);
            let points = generator.generate(Granularity::FourHourly, start, b.end, 50, &mut rng);
            assert_eq!(points[0].change_percent, 0.0);
            assert!(points[1..].iter().any(|p| p.change_percent != 0.0));
        }
    }

    #[test]
    fn change_follows_stored_prices() {
        let model = PriceModel::default();
        let b = bounds();
        let generator = PointGenerator::new(&model, b);
        let mut rng = StdRng::seed_from_u64(17);

        // Early history sits on the 0.01 floor of the table, where rounding matters most.
        for start in [b.start, Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap()] {
            let points = generator.generate(Granularity::Daily, start, b.end, 50, &mut rng);
            for pair in points.windows(2) {
                let (prev, cur) = (pair[0].price, pair[1].price);
                let expected = if prev > 0.0 { round2((cur - prev) / prev * 100.0) } else { 0.0 };
                assert_eq!(pair[1].change_percent, expected, "prev={prev} cur={cur}");
            }
        }
    }

    #[test]
    fn values_stay_within_era_envelopes() {
        let model = PriceModel::default();
        let b = bounds();
        let generator = PointGenerator::new(&model, b);
        let mut rng = StdRng::seed_from_u64(99);
        let points = generator.generate(Granularity::Daily, b.start, b.end, 5478, &mut rng);

        for p in &points {
            let progress = b.progress(p.timestamp);
            let base = model.interpolate_price(progress);
            let (_, v) = model.volatility_range(progress);
            assert!(p.price >= 0.0);
            assert!(p.price <= round2(base * (1.0 + v)) + 0.01, "price {} above envelope", p.price);
            assert!(p.price >= round2((base * (1.0 - v)).max(PRICE_FLOOR)) - 0.01);

            let vol_base = model.base_volume(progress);
            assert!(p.volume >= vol_base * 0.5 - 0.01 && p.volume <= vol_base * 2.0 + 0.01);
            assert!(p.market_cap >= 0.0);
            assert_eq!(p.rank, 1);
        }
    }

    #[test]
    fn weekly_volatility_is_halved() {
        let model = PriceModel::default();
        let b = bounds();
        let generator = PointGenerator::new(&model, b);
        let mut rng = StdRng::seed_from_u64(5);
        let points = generator.generate(Granularity::Weekly, b.start, b.end, 782, &mut rng);

        for p in points.iter().filter(|p| b.progress(p.timestamp) > 0.75) {
            let base = model.interpolate_price(b.progress(p.timestamp));
            let deviation = (p.price / base - 1.0).abs();
            assert!(deviation <= 0.15 * 0.5 + 1e-3, "weekly deviation {deviation}");
        }
    }

    #[test]
    fn final_point_is_near_last_anchor() {
        let model = PriceModel::default();
        let b = bounds();
        let generator = PointGenerator::new(&model, b);
        let mut rng = StdRng::seed_from_u64(3);
        let points = generator.generate(Granularity::Daily, b.start, b.end, 5478, &mut rng);

        let last = points.last().unwrap();
        let progress = b.progress(last.timestamp);
        assert!(progress > 0.999, "progress={progress}");
        let base = model.interpolate_price(progress);
        assert!((base - 65_000.0).abs() < 200.0, "base={base}");
        assert!(last.price >= 65_000.0 * 0.8 && last.price <= 65_000.0 * 1.2);
    }

    #[test]
    fn round2_rounds_half_away_from_zero() {
        assert_eq!(round2(1.005_f64 + 1e-9), 1.01);
        assert_eq!(round2(2.344), 2.34);
        assert_eq!(round2(-2.346), -2.35);
    }
}
