mod api;
mod config;
mod error;
mod generator;
mod model;
mod scheduler;
mod storage;
mod types;
mod window;
mod writer;

use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::api::routes::{router, ApiState};
use crate::config::{Config, StoreBackend};
use crate::error::Result;
use crate::model::PriceModel;
use crate::scheduler::IncrementalScheduler;
use crate::storage::{MemoryObjectStore, ObjectStore, SqliteObjectStore};
use crate::types::InvocationEvent;
use crate::window::{Clock, SystemClock};
use crate::writer::DatasetWriter;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Object store ---
    let store: Arc<dyn ObjectStore> = match cfg.store_backend {
        StoreBackend::Sqlite => Arc::new(SqliteObjectStore::open(&cfg.db_path, cfg.bucket.clone()).await?),
        StoreBackend::Memory => {
            warn!("STORE_BACKEND=memory: datasets are lost when the process exits");
            Arc::new(MemoryObjectStore::new(cfg.bucket.clone()))
        }
    };
    info!(backend = %cfg.store_backend, "Writing datasets to s3://{}/", cfg.bucket);

    // --- Writer ---
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let latency = Arc::new(LatencyStats::new());
    let health = Arc::new(HealthState::new());
    let writer = Arc::new(DatasetWriter::new(
        store,
        PriceModel::default(),
        Arc::clone(&clock),
        Arc::clone(&latency),
        Arc::clone(&health),
    ));

    // Full backfill (one-shot, in the background so the API comes up immediately)
    if cfg.run_full_on_start {
        let backfill_writer = Arc::clone(&writer);
        tokio::spawn(async move {
            match backfill_writer.run(&InvocationEvent::full()).await {
                Ok(outcome) => info!(
                    total_records = outcome.total_records(),
                    "Startup backfill complete"
                ),
                Err(e) => error!("Startup backfill failed: {e}"),
            }
        });
    }

    // Incremental scheduler (background)
    if cfg.scheduler_enabled {
        let scheduler = IncrementalScheduler::new(Arc::clone(&writer), clock, Arc::clone(&health));
        tokio::spawn(async move { scheduler.run().await });
    } else {
        info!("SCHEDULER_ENABLED=false: incremental runs only via POST /invoke");
    }

    // HTTP API server
    let api_state = ApiState {
        writer,
        latency,
        health,
        backend: cfg.store_backend,
        scheduler_enabled: cfg.scheduler_enabled,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
