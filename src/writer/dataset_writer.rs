use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::config::{CONTENT_TYPE_JSON, CURRENCY, DATA_SOURCE, SYMBOL, WIPE_BATCH_SIZE};
use crate::error::{AppError, Result};
use crate::generator::points::round2;
use crate::generator::PointGenerator;
use crate::model::{HistoryBounds, PriceModel};
use crate::storage::ObjectStore;
use crate::types::{Dataset, DatasetSummary, Granularity, InvocationEvent, MarketPoint, Mode, RunOutcome};
use crate::window::{resolve, Clock, ResolvedWindow};

/// Orchestrates one invocation: optional wipe, window resolution, generation,
/// aggregation and the idempotent write.
pub struct DatasetWriter {
    store: Arc<dyn ObjectStore>,
    model: PriceModel,
    clock: Arc<dyn Clock>,
    latency: Arc<LatencyStats>,
    health: Arc<HealthState>,
}

impl DatasetWriter {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        model: PriceModel,
        clock: Arc<dyn Clock>,
        latency: Arc<LatencyStats>,
        health: Arc<HealthState>,
    ) -> Self {
        Self { store, model, clock, latency, health }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub async fn run(&self, event: &InvocationEvent) -> Result<RunOutcome> {
        let mut rng = StdRng::from_entropy();
        self.run_with_rng(event, &mut rng).await
    }

    /// Same as [`run`](Self::run) with a caller-supplied random source.
    pub async fn run_with_rng<R: Rng + Send>(
        &self,
        event: &InvocationEvent,
        rng: &mut R,
    ) -> Result<RunOutcome> {
        let started = Instant::now();
        let result = self.execute(event, rng).await;
        self.latency.record(started.elapsed());

        match &result {
            Ok(outcome) => {
                self.health
                    .record_success(self.clock.now(), matches!(outcome, RunOutcome::Skipped { .. }));
            }
            Err(e) => {
                self.health.record_failure();
                warn!(mode = %event.mode, "Invocation failed: {e}");
            }
        }
        result
    }

    async fn execute<R: Rng + Send>(&self, event: &InvocationEvent, rng: &mut R) -> Result<RunOutcome> {
        let now = self.clock.now();
        let bounds = HistoryBounds::new(self.model.history_start(), now)?;

        // Resolve before touching storage so bad input never causes I/O.
        let windows = resolve(event.mode, event.interval, &bounds, now)?;

        if let Some(prefix) = &event.wipe_prefix {
            self.wipe(prefix).await?;
        }

        match event.mode {
            Mode::Incremental => {
                let Some(window) = windows.into_iter().next() else {
                    return Err(AppError::Config("no incremental window resolved".to_string()));
                };
                self.write_incremental(window, &bounds, now, rng).await
            }
            Mode::Full => self.write_full(windows, &bounds, now, rng).await,
        }
    }

    /// Delete every object under `prefix`, in listing order, at most
    /// `WIPE_BATCH_SIZE` keys per call.
    pub async fn wipe(&self, prefix: &str) -> Result<usize> {
        info!("Wiping {} ...", self.store.uri(prefix));
        let keys: Vec<String> = self
            .store
            .list(prefix)
            .await?
            .into_iter()
            .map(|m| m.key)
            .collect();

        if keys.is_empty() {
            warn!(prefix, "Wipe prefix matched no objects");
            return Ok(0);
        }

        let mut deleted = 0usize;
        for batch in keys.chunks(WIPE_BATCH_SIZE) {
            deleted += self.store.delete_batch(batch).await?;
        }
        info!(prefix, deleted, "Wipe complete for prefix: {prefix}");
        Ok(deleted)
    }

    async fn write_incremental<R: Rng + Send>(
        &self,
        window: ResolvedWindow,
        bounds: &HistoryBounds,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<RunOutcome> {
        let s3_path = self.store.uri(window.key.as_str());

        if self.store.head(window.key.as_str()).await? {
            info!(
                interval = %window.granularity,
                "Incremental window already written, skipping: {s3_path}"
            );
            return Ok(RunOutcome::Skipped { interval: window.granularity, s3_path });
        }

        let points = PointGenerator::new(&self.model, *bounds).generate(
            window.granularity,
            window.start,
            window.end,
            window.max_points,
            rng,
        );
        // A one-point window has nothing inside it to compare against.
        let dataset = build_dataset(window.granularity, points, now, (0.0, 0.0));
        let summary = self.put_dataset(&window, &dataset).await?;

        Ok(RunOutcome::Written { mode: Mode::Incremental, datasets: vec![summary], time_range: None })
    }

    async fn write_full<R: Rng + Send>(
        &self,
        windows: Vec<ResolvedWindow>,
        bounds: &HistoryBounds,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<RunOutcome> {
        let generator = PointGenerator::new(&self.model, *bounds);
        let mut datasets = Vec::with_capacity(windows.len());

        for window in &windows {
            let points = generator.generate(
                window.granularity,
                window.start,
                window.end,
                window.max_points,
                rng,
            );
            let change = recent_change(&points);
            let dataset = build_dataset(window.granularity, points, now, change);
            datasets.push(self.put_dataset(window, &dataset).await?);
        }

        let time_range = format!(
            "{} to {}",
            bounds.start.format("%Y-%m-%d"),
            bounds.end.format("%Y-%m-%d")
        );
        let outcome = RunOutcome::Written { mode: Mode::Full, datasets, time_range: Some(time_range) };
        info!(
            total_records = outcome.total_records(),
            "Full generation complete: {} records across {} datasets",
            outcome.total_records(),
            windows.len()
        );
        Ok(outcome)
    }

    async fn put_dataset(&self, window: &ResolvedWindow, dataset: &Dataset) -> Result<DatasetSummary> {
        let body = serde_json::to_vec(dataset)?;
        let bytes = body.len();
        self.store.put(window.key.as_str(), body, CONTENT_TYPE_JSON).await?;

        let s3_path = self.store.uri(window.key.as_str());
        info!(
            interval = %window.granularity,
            records = dataset.record_count,
            bytes,
            "Wrote {} records to {s3_path}",
            dataset.record_count
        );

        Ok(DatasetSummary {
            interval: window.granularity,
            records_written: dataset.record_count,
            s3_path,
            description: window.description.clone(),
        })
    }
}

/// `(price_change, price_change_percent)` of the latest point against the
/// start of the trailing ~10% of the sequence.
///
/// The reference index is `n - n/10`; when that is the last point (short
/// sequences) there is no change.
pub fn recent_change(points: &[MarketPoint]) -> (f64, f64) {
    let n = points.len();
    if n == 0 {
        return (0.0, 0.0);
    }
    let recent_start = n - n / 10;
    if recent_start >= n - 1 {
        return (0.0, 0.0);
    }
    let reference = points[recent_start].price;
    let current = points[n - 1].price;
    let change = current - reference;
    let pct = if reference > 0.0 { change / reference * 100.0 } else { 0.0 };
    (change, pct)
}

/// Aggregate header for a point sequence. Empty sequences aggregate to zeros.
pub fn build_dataset(
    granularity: Granularity,
    points: Vec<MarketPoint>,
    ingested_at: DateTime<Utc>,
    (price_change, price_change_percent): (f64, f64),
) -> Dataset {
    let n = points.len();
    let (current_price, current_market_cap) = points
        .last()
        .map(|p| (p.price, p.market_cap))
        .unwrap_or((0.0, 0.0));
    let total_volume: f64 = points.iter().map(|p| p.volume).sum();
    let average_price = if n > 0 {
        points.iter().map(|p| p.price).sum::<f64>() / n as f64
    } else {
        0.0
    };
    let highest_price = points.iter().map(|p| p.price).reduce(f64::max).unwrap_or(0.0);
    let lowest_price = points.iter().map(|p| p.price).reduce(f64::min).unwrap_or(0.0);

    Dataset {
        ingestion_timestamp: ingested_at,
        symbol: SYMBOL,
        currency: CURRENCY,
        interval: granularity,
        record_count: n,
        data_source: DATA_SOURCE,
        current_price: round2(current_price),
        current_market_cap: round2(current_market_cap),
        price_change: round2(price_change),
        price_change_percent: round2(price_change_percent),
        total_volume: round2(total_volume),
        average_price: round2(average_price),
        highest_price: round2(highest_price),
        lowest_price: round2(lowest_price),
        market_data: points,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
