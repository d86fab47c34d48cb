//! Application state.
//!
//! Process-wide singletons (encoder pool, vector index, metadata store,
//! query cache, scheduler) are built eagerly at startup and passed
//! explicitly through this state; nothing is reached through globals.

use std::sync::Arc;
use std::time::Duration;

use vmatch_encoder::{EncoderConfig, EncoderPool, HttpEncoder, OfflineEncoder, VideoEncoder};
use vmatch_index::{SqliteVectorIndex, VectorIndex};
use vmatch_metadata::MetadataStore;
use vmatch_models::{DEFAULT_NUM_FRAMES, DEFAULT_VECTOR_DIM};
use vmatch_search::{AnomalyDetector, SearchConfig, SearchService};
use vmatch_storage::{QueryCache, QueryCacheConfig, StorageLayout, TemporalStore};
use vmatch_worker::{GarbageCollector, IndexingPipeline, JobScheduler, WorkerConfig};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub encoder: Arc<dyn VideoEncoder>,
    pub index: Arc<dyn VectorIndex>,
    pub metadata: Arc<MetadataStore>,
    pub temporal: TemporalStore,
    pub cache: Arc<QueryCache>,
    pub search: Arc<SearchService>,
    pub anomaly: Arc<AnomalyDetector>,
    pub pipeline: Arc<IndexingPipeline>,
    pub scheduler: Arc<JobScheduler>,
    pub gc: Arc<GarbageCollector>,
    pub model_name: String,
    pub device: String,
}

impl AppState {
    /// Build the full component graph from the environment.
    pub async fn new(config: ApiConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let layout = StorageLayout::from_env();
        layout.ensure_dirs()?;

        let dimension = std::env::var("VECTOR_DIM")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_VECTOR_DIM);
        let num_frames = std::env::var("NUM_FRAMES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_NUM_FRAMES);
        let encode_deadline = Duration::from_secs(
            std::env::var("ENCODE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(120),
        );
        let pool_size: usize = std::env::var("ENCODER_POOL_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1);

        let offline = std::env::var("ENCODER_MODE")
            .map(|m| m.to_lowercase() == "offline")
            .unwrap_or(false);
        let (instances, model_name, device): (Vec<Arc<dyn VideoEncoder>>, String, String) =
            if offline {
                let encoder: Arc<dyn VideoEncoder> =
                    Arc::new(OfflineEncoder::new(dimension, num_frames));
                (vec![encoder], "offline-hash".to_string(), "cpu".to_string())
            } else {
                let encoder_config = EncoderConfig::from_env();
                let model_name = encoder_config.model_name.clone();
                let mut instances: Vec<Arc<dyn VideoEncoder>> = Vec::new();
                for _ in 0..pool_size.max(1) {
                    instances.push(Arc::new(HttpEncoder::new(encoder_config.clone())?));
                }
                let device = std::env::var("VMATCH_DEVICE").unwrap_or_else(|_| "auto".to_string());
                (instances, model_name, device)
            };
        let encoder: Arc<dyn VideoEncoder> =
            Arc::new(EncoderPool::new(instances, encode_deadline));

        let index_path = std::env::var("VECTOR_DB_PATH").unwrap_or_else(|_| {
            layout.root().join("vectors.db").to_string_lossy().into_owned()
        });
        let metadata_path = std::env::var("DATABASE_PATH").unwrap_or_else(|_| {
            layout.root().join("metadata.db").to_string_lossy().into_owned()
        });
        let index: Arc<dyn VectorIndex> = Arc::new(SqliteVectorIndex::open(&index_path, dimension)?);
        let metadata = Arc::new(MetadataStore::open(&metadata_path)?);
        let temporal = TemporalStore::new(layout.temporal_dir());

        let cache_config = QueryCacheConfig::new(layout.query_cache_dir())
            .with_disk_budget(
                std::env::var("QUERY_CACHE_SIZE_MB")
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(500)
                    * 1024
                    * 1024,
            )
            .with_memory_budget(
                std::env::var("QUERY_CACHE_MEMORY_MB")
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                    .unwrap_or(256)
                    * 1024
                    * 1024,
            );
        let cache = Arc::new(QueryCache::new(cache_config));

        let worker_config = WorkerConfig::from_env();
        Ok(Self::with_components(
            config,
            encoder,
            index,
            metadata,
            temporal,
            cache,
            layout,
            worker_config,
            SearchConfig::from_env(),
            model_name,
            device,
        ))
    }

    /// Wire the component graph from already-built stores (tests build
    /// this directly with in-memory backends).
    #[allow(clippy::too_many_arguments)]
    pub fn with_components(
        config: ApiConfig,
        encoder: Arc<dyn VideoEncoder>,
        index: Arc<dyn VectorIndex>,
        metadata: Arc<MetadataStore>,
        temporal: TemporalStore,
        cache: Arc<QueryCache>,
        layout: StorageLayout,
        worker_config: WorkerConfig,
        search_config: SearchConfig,
        model_name: String,
        device: String,
    ) -> Self {
        let max_concurrent = worker_config.max_concurrent_jobs;
        let pipeline = Arc::new(IndexingPipeline::new(
            Arc::clone(&encoder),
            Arc::clone(&index),
            temporal.clone(),
            Arc::clone(&metadata),
            layout,
            worker_config,
        ));
        let scheduler = Arc::new(JobScheduler::new(
            Arc::clone(&pipeline),
            Arc::clone(&metadata),
            max_concurrent,
        ));
        let search = Arc::new(SearchService::new(
            Arc::clone(&encoder),
            Arc::clone(&index),
            temporal.clone(),
            Arc::clone(&metadata),
            Arc::clone(&cache),
            search_config,
        ));
        let anomaly = Arc::new(AnomalyDetector::new(Arc::clone(&encoder)));
        let gc = Arc::new(GarbageCollector::new(
            Arc::clone(&index),
            temporal.clone(),
            Arc::clone(&metadata),
        ));

        Self {
            config,
            encoder,
            index,
            metadata,
            temporal,
            cache,
            search,
            anomaly,
            pipeline,
            scheduler,
            gc,
            model_name,
            device,
        }
    }
}
