use chrono::{DateTime, TimeZone, Utc};

use crate::error::{AppError, Result};

/// First instant of synthetic history (genesis block date).
pub const HISTORY_START_YMD: (i32, u32, u32) = (2009, 1, 3);

pub const SYMBOL: &str = "BTC";
pub const CURRENCY: &str = "USD";
pub const DATA_SOURCE: &str = "synthetic";

/// Root prefix for every dataset object.
pub const SILVER_PREFIX: &str = "silver";

pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Upper bound on keys per delete call during a prefix wipe.
pub const WIPE_BATCH_SIZE: usize = 1000;

/// Extra attempts the scheduler makes after a failed invocation.
pub const SCHEDULER_RETRY_ATTEMPTS: usize = 2;

/// Backoff between scheduler retry attempts, in milliseconds.
pub const SCHEDULER_RETRY_BACKOFF_MS: &[u64] = &[1_000, 5_000];

/// Default page size for `GET /datasets`.
pub const DATASET_LIST_DEFAULT_LIMIT: usize = 100;

pub fn history_start() -> DateTime<Utc> {
    let (y, m, d) = HISTORY_START_YMD;
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    Memory,
}

impl std::str::FromStr for StoreBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(StoreBackend::Sqlite),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(AppError::Config(format!(
                "STORE_BACKEND must be 'sqlite' or 'memory', got '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreBackend::Sqlite => write!(f, "sqlite"),
            StoreBackend::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Target bucket for every dataset object (DATA_LAKE_BUCKET, required).
    pub bucket: String,
    pub log_level: String,
    pub store_backend: StoreBackend,
    pub db_path: String,
    pub api_port: u16,
    /// Run the incremental schedules in-process (SCHEDULER_ENABLED).
    pub scheduler_enabled: bool,
    /// Generate a full backfill once at startup (RUN_FULL_ON_START).
    pub run_full_on_start: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bucket = lookup("DATA_LAKE_BUCKET")
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty())
            .ok_or_else(|| {
                AppError::Config("DATA_LAKE_BUCKET environment variable not set".to_string())
            })?;

        Ok(Self {
            bucket,
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            store_backend: lookup("STORE_BACKEND")
                .unwrap_or_else(|| "sqlite".to_string())
                .parse()?,
            db_path: lookup("DB_PATH").unwrap_or_else(|| "synth.db".to_string()),
            api_port: lookup("API_PORT")
                .unwrap_or_else(|| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            scheduler_enabled: parse_flag(lookup("SCHEDULER_ENABLED"), true),
            run_full_on_start: parse_flag(lookup("RUN_FULL_ON_START"), false),
        })
    }
}

fn parse_flag(raw: Option<String>, default: bool) -> bool {
    match raw.as_deref().map(str::trim) {
        Some("1") | Some("true") | Some("yes") => true,
        Some("0") | Some("false") | Some("no") => false,
        _ => default,
    }
}
