use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{AppError, Result};

// ---------------------------------------------------------------------------
// Granularity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Granularity {
    Weekly,
    FourHourly,
    Daily,
}

impl Granularity {
    /// Generation order for full-history runs.
    pub const ALL: [Granularity; 3] = [
        Granularity::Weekly,
        Granularity::FourHourly,
        Granularity::Daily,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Granularity::Weekly => "1w",
            Granularity::FourHourly => "4h",
            Granularity::Daily => "1d",
        }
    }

    pub fn step(self) -> Duration {
        match self {
            Granularity::Weekly => Duration::weeks(1),
            Granularity::FourHourly => Duration::hours(4),
            Granularity::Daily => Duration::days(1),
        }
    }

    /// Multiplier applied to the era volatility band.
    /// Longer bars smooth noise out, shorter bars exaggerate it.
    pub fn volatility_scale(self) -> f64 {
        match self {
            Granularity::Weekly => 0.5,
            Granularity::FourHourly => 1.5,
            Granularity::Daily => 1.0,
        }
    }

    /// Window-end stamp used in incremental keys.
    pub fn key_stamp(self, window_end: DateTime<Utc>) -> String {
        match self {
            Granularity::FourHourly => window_end.format("%Y%m%d_%H%M").to_string(),
            Granularity::Weekly | Granularity::Daily => window_end.format("%Y%m%d").to_string(),
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Granularity::Weekly => "Weekly",
            Granularity::FourHourly => "4-hourly",
            Granularity::Daily => "Daily",
        }
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl std::str::FromStr for Granularity {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1w" => Ok(Granularity::Weekly),
            "4h" => Ok(Granularity::FourHourly),
            "1d" => Ok(Granularity::Daily),
            other => Err(AppError::Config(format!(
                "interval must be one of '1d', '4h', '1w', got '{other}'"
            ))),
        }
    }
}

impl Serialize for Granularity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Mode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Full,
    Incremental,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Full => write!(f, "full"),
            Mode::Incremental => write!(f, "incremental"),
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "full" => Ok(Mode::Full),
            "incremental" => Ok(Mode::Incremental),
            other => Err(AppError::Config(format!(
                "mode must be 'full' or 'incremental', got '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// One synthetic market observation.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketPoint {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub market_cap: f64,
    pub volume: f64,
    /// Percent move against the previous point in the same sequence.
    pub change_percent: f64,
    pub rank: u32,
}

// The wire shape carries the instant twice: epoch millis and ISO-8601.
impl Serialize for MarketPoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut st = serializer.serialize_struct("MarketPoint", 7)?;
        st.serialize_field("timestamp", &self.timestamp.timestamp_millis())?;
        st.serialize_field("timestamp_iso", &self.timestamp.to_rfc3339())?;
        st.serialize_field("price", &self.price)?;
        st.serialize_field("market_cap", &self.market_cap)?;
        st.serialize_field("volume", &self.volume)?;
        st.serialize_field("change_24h", &self.change_percent)?;
        st.serialize_field("rank", &self.rank)?;
        st.end()
    }
}

/// Microsecond precision with a `+00:00` offset.
fn iso_instant<S: Serializer>(ts: &DateTime<Utc>, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Micros, false))
}

/// A serialized dataset object: aggregate header plus the point sequence.
#[derive(Debug, Clone, Serialize)]
pub struct Dataset {
    #[serde(serialize_with = "iso_instant")]
    pub ingestion_timestamp: DateTime<Utc>,
    pub symbol: &'static str,
    pub currency: &'static str,
    pub interval: Granularity,
    pub record_count: usize,
    pub data_source: &'static str,
    pub current_price: f64,
    pub current_market_cap: f64,
    pub price_change: f64,
    pub price_change_percent: f64,
    pub total_volume: f64,
    pub average_price: f64,
    pub highest_price: f64,
    pub lowest_price: f64,
    pub market_data: Vec<MarketPoint>,
}

// ---------------------------------------------------------------------------
// Invocation surface
// ---------------------------------------------------------------------------

/// Parsed scheduler/API event. Parsing is lenient only where the event
/// format has always been lenient: a missing or non-string `mode` means full.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationEvent {
    pub mode: Mode,
    pub interval: Option<Granularity>,
    pub wipe_prefix: Option<String>,
}

impl InvocationEvent {
    pub fn full() -> Self {
        Self { mode: Mode::Full, interval: None, wipe_prefix: None }
    }

    pub fn incremental(interval: Granularity) -> Self {
        Self { mode: Mode::Incremental, interval: Some(interval), wipe_prefix: None }
    }

    pub fn from_value(event: &serde_json::Value) -> Result<Self> {
        let Some(obj) = event.as_object() else {
            return Ok(Self::full());
        };

        let mode = match obj.get("mode").and_then(|m| m.as_str()) {
            Some(m) => m.parse::<Mode>()?,
            None => Mode::Full,
        };

        let raw_interval = obj.get("interval").and_then(|i| i.as_str());
        let interval = match mode {
            Mode::Incremental => {
                let raw = raw_interval.ok_or_else(|| {
                    AppError::Config(
                        "incremental mode requires interval in {'1d','4h','1w'}".to_string(),
                    )
                })?;
                Some(raw.parse::<Granularity>()?)
            }
            // Full runs always cover every granularity; a stray interval is ignored.
            Mode::Full => None,
        };

        let wipe_prefix = obj
            .get("wipe_prefix")
            .and_then(|p| p.as_str())
            .filter(|p| !p.is_empty())
            .map(str::to_string);

        Ok(Self { mode, interval, wipe_prefix })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetSummary {
    pub interval: Granularity,
    pub records_written: usize,
    pub s3_path: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Written {
        mode: Mode,
        datasets: Vec<DatasetSummary>,
        /// "YYYY-MM-DD to YYYY-MM-DD" for full runs.
        time_range: Option<String>,
    },
    Skipped {
        interval: Granularity,
        s3_path: String,
    },
}

impl RunOutcome {
    pub fn total_records(&self) -> usize {
        match self {
            RunOutcome::Written { datasets, .. } => datasets.iter().map(|d| d.records_written).sum(),
            RunOutcome::Skipped { .. } => 0,
        }
    }

    pub fn body(&self) -> serde_json::Value {
        match self {
            RunOutcome::Skipped { interval, s3_path } => serde_json::json!({
                "message": "Incremental window already exists, skipping",
                "mode": Mode::Incremental,
                "interval": interval,
                "s3_path": s3_path,
            }),
            RunOutcome::Written { mode: Mode::Incremental, datasets, .. } => serde_json::json!({
                "message": "Incremental write complete",
                "mode": Mode::Incremental,
                "datasets": datasets,
            }),
            RunOutcome::Written { mode: Mode::Full, datasets, time_range } => serde_json::json!({
                "message": format!(
                    "Generated {} Bitcoin data points across {} datasets",
                    self.total_records(),
                    datasets.len()
                ),
                "mode": Mode::Full,
                "total_records": self.total_records(),
                "datasets": datasets,
                "time_range": time_range,
            }),
        }
    }
}

/// Envelope returned to the invoker: `{statusCode, body}` with `body` a JSON string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: String,
}

impl InvocationResponse {
    pub fn ok(outcome: &RunOutcome) -> Self {
        Self { status_code: 200, body: outcome.body().to_string() }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
