//! Maintenance worker binary: runs the garbage collector on startup and
//! on an interval against the configured stores.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vmatch_index::SqliteVectorIndex;
use vmatch_metadata::MetadataStore;
use vmatch_models::DEFAULT_VECTOR_DIM;
use vmatch_storage::{StorageLayout, TemporalStore};
use vmatch_worker::{GarbageCollector, WorkerConfig};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);
    let env_filter = EnvFilter::from_default_env().add_directive("vmatch=info".parse().unwrap());
    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true))
            .with(env_filter)
            .init();
    }

    info!("Starting vmatch-worker");

    let config = WorkerConfig::from_env();
    let layout = StorageLayout::from_env();
    if let Err(e) = layout.ensure_dirs() {
        error!("Failed to create storage directories: {e}");
        std::process::exit(1);
    }

    let dimension = std::env::var("VECTOR_DIM")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_VECTOR_DIM);
    let index_path = std::env::var("VECTOR_DB_PATH")
        .unwrap_or_else(|_| layout.root().join("vectors.db").to_string_lossy().into_owned());
    let metadata_path = std::env::var("DATABASE_PATH")
        .unwrap_or_else(|_| layout.root().join("metadata.db").to_string_lossy().into_owned());

    let index = match SqliteVectorIndex::open(&index_path, dimension) {
        Ok(index) => Arc::new(index),
        Err(e) => {
            error!("Failed to open vector index: {e}");
            std::process::exit(1);
        }
    };
    let metadata = match MetadataStore::open(&metadata_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to open metadata store: {e}");
            std::process::exit(1);
        }
    };
    let temporal = TemporalStore::new(layout.temporal_dir());

    let gc = Arc::new(GarbageCollector::new(index, temporal, metadata));

    // Startup pass repairs anything a crash left behind.
    match gc.run_startup().await {
        Ok(report) if report.is_clean() => info!("Startup GC: stores consistent"),
        Ok(report) => info!(
            "Startup GC repaired {} vector entries, {} temporal files",
            report.removed_vectors.len(),
            report.removed_temporal.len()
        ),
        Err(e) => {
            error!("Startup GC failed: {e}");
            std::process::exit(1);
        }
    }

    let gc_task = tokio::spawn(Arc::clone(&gc).run_periodically(config.gc_interval));

    tokio::signal::ctrl_c().await.ok();
    info!("Received shutdown signal");
    gc_task.abort();
    info!("Worker shutdown complete");
}
