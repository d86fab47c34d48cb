//! Search pipeline orchestration.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use vmatch_encoder::VideoEncoder;
use vmatch_index::{ScoredHit, VectorIndex};
use vmatch_metadata::{MetadataStore, QueryLogEntry};
use vmatch_models::{
    QueryClick, QueryId, SearchRequest, SearchResponse, SearchResult, VideoId, CANDIDATE_TOP_K,
};
use vmatch_storage::{QueryCache, StorageError, TemporalStore};

use crate::error::{SearchError, SearchResult as Result};
use crate::rerank::{temporal_similarity, TemporalScores};

/// Search pipeline configuration.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Candidate fan-out before re-ranking
    pub candidate_top_k: usize,
    /// Deadline for the vector index search
    pub search_timeout: Duration,
    /// Scratch directory for downloaded remote queries
    pub temp_dir: PathBuf,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            candidate_top_k: CANDIDATE_TOP_K,
            search_timeout: Duration::from_secs(5),
            temp_dir: std::env::temp_dir().join("vmatch"),
        }
    }
}

impl SearchConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            candidate_top_k: std::env::var("SEARCH_TOP_K")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.candidate_top_k),
            search_timeout: Duration::from_secs(
                std::env::var("SEARCH_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
            temp_dir: std::env::var("TEMP_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.temp_dir),
        }
    }
}

/// Query-path orchestrator: fingerprint → encode-or-cache → candidates →
/// optional temporal re-rank → reconciliation → results.
pub struct SearchService {
    encoder: Arc<dyn VideoEncoder>,
    index: Arc<dyn VectorIndex>,
    temporal: TemporalStore,
    metadata: Arc<MetadataStore>,
    cache: Arc<QueryCache>,
    config: SearchConfig,
}

impl SearchService {
    pub fn new(
        encoder: Arc<dyn VideoEncoder>,
        index: Arc<dyn VectorIndex>,
        temporal: TemporalStore,
        metadata: Arc<MetadataStore>,
        cache: Arc<QueryCache>,
        config: SearchConfig,
    ) -> Self {
        Self {
            encoder,
            index,
            temporal,
            metadata,
            cache,
            config,
        }
    }

    /// Run a search end-to-end.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let start = Instant::now();
        let query_id = QueryId::new();

        // Constant-time fast path: no encode, no candidates.
        if request.top_k == 0 {
            return Ok(SearchResponse {
                query_id,
                processing_time_ms: start.elapsed().as_secs_f64() * 1000.0,
                results: Vec::new(),
                total_results: 0,
            });
        }

        info!("Processing search query {query_id}");

        let (query_path, temp_download) = self.resolve_query_path(&request.query_video_url).await?;
        let features = self
            .cache
            .get_or_encode(&query_path, self.encoder.as_ref())
            .await;
        if let Some(temp) = temp_download {
            tokio::fs::remove_file(&temp).await.ok();
        }
        let features = features?;

        let filters = request.filters.clone().unwrap_or_default();
        let candidates = tokio::time::timeout(
            self.config.search_timeout,
            self.index
                .search(&features.global, self.config.candidate_top_k, &filters),
        )
        .await
        .map_err(|_| SearchError::Timeout("vector index search".to_string()))??;

        metrics::counter!("vmatch_searches_total").increment(1);
        metrics::histogram!("vmatch_search_candidates").record(candidates.len() as f64);

        let mut temporal_scores = HashMap::new();
        let mut scored = if request.reranking_enabled() && !candidates.is_empty() {
            let (hits, scores) = self.rerank(&features.temporal, candidates).await;
            temporal_scores = scores;
            hits
        } else {
            candidates
        };

        // Deterministic final order.
        scored.sort_by(|a, b| {
            b.similarity_score
                .partial_cmp(&a.similarity_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.video_id.cmp(&b.video_id))
        });

        // Reconcile against the metadata store: anything the index
        // returned that has no metadata row is dropped before emission.
        let mut results = Vec::new();
        for hit in scored {
            if results.len() >= request.top_k {
                break;
            }
            match self.metadata.get_video(&hit.video_id).await? {
                Some(record) => {
                    let mut result = SearchResult {
                        video_id: hit.video_id,
                        similarity_score: hit.similarity_score,
                        distance: hit.distance,
                        video_path: hit.attrs.video_path,
                        metadata: record.extra.clone(),
                    };
                    if let Some(title) = record.title {
                        result.metadata.insert("title".to_string(), title);
                    }
                    if let Some(duration) = record.duration {
                        result
                            .metadata
                            .insert("duration".to_string(), duration.to_string());
                    }
                    if let Some(scores) = temporal_scores.get(&result.video_id) {
                        result.metadata.insert(
                            "temporal_score".to_string(),
                            scores.temporal_score.to_string(),
                        );
                        result.metadata.insert(
                            "dtw_similarity".to_string(),
                            scores.dtw_similarity.to_string(),
                        );
                    }
                    results.push(result);
                }
                None => {
                    debug!(
                        "Dropping candidate {} with no metadata row",
                        hit.video_id
                    );
                }
            }
        }

        let processing_time_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.record_query_log(&query_id, request, results.len(), processing_time_ms)
            .await;

        metrics::histogram!("vmatch_search_latency_ms").record(processing_time_ms);

        Ok(SearchResponse {
            query_id,
            processing_time_ms,
            total_results: results.len(),
            results,
        })
    }

    /// Record click feedback for a previous query.
    pub async fn log_click(&self, click: &QueryClick) -> Result<()> {
        self.metadata.log_click(click).await?;
        Ok(())
    }

    /// Re-rank candidates with temporal similarity fusion. A candidate
    /// with no temporal matrix keeps its global-only score.
    async fn rerank(
        &self,
        query_temporal: &ndarray::Array2<f32>,
        candidates: Vec<ScoredHit>,
    ) -> (Vec<ScoredHit>, HashMap<VideoId, TemporalScores>) {
        debug!("Re-ranking {} candidates", candidates.len());
        let mut reranked = Vec::with_capacity(candidates.len());
        let mut temporal_scores = HashMap::new();

        for mut hit in candidates {
            match self.temporal.get(&hit.video_id).await {
                Ok(candidate_temporal) => {
                    let scores = temporal_similarity(query_temporal, &candidate_temporal);
                    hit.similarity_score = scores.fuse_with_global(hit.similarity_score);
                    temporal_scores.insert(hit.video_id.clone(), scores);
                }
                Err(StorageError::NotFound(_)) => {
                    warn!("No temporal features for {}", hit.video_id);
                }
                Err(e) => {
                    warn!("Failed to load temporal features for {}: {e}", hit.video_id);
                }
            }
            reranked.push(hit);
        }
        (reranked, temporal_scores)
    }

    /// Local queries pass through; remote ones are downloaded to scratch
    /// space and cleaned up by the caller.
    async fn resolve_query_path(&self, uri: &str) -> Result<(PathBuf, Option<PathBuf>)> {
        if !vmatch_media::is_remote_url(uri) {
            let path = PathBuf::from(uri);
            if !path.exists() {
                return Err(SearchError::Storage(StorageError::NotFound(format!(
                    "query video {uri}"
                ))));
            }
            return Ok((path, None));
        }

        let temp = self
            .config
            .temp_dir
            .join(format!("query_{}.mp4", uuid::Uuid::new_v4()));
        vmatch_media::download_video(uri, &temp).await?;
        Ok((temp.clone(), Some(temp)))
    }

    async fn record_query_log(
        &self,
        query_id: &QueryId,
        request: &SearchRequest,
        num_results: usize,
        processing_time_ms: f64,
    ) {
        let entry = QueryLogEntry {
            query_id: query_id.clone(),
            user_id: None,
            query_video_url: request.query_video_url.clone(),
            filters_json: request
                .filters
                .as_ref()
                .filter(|f| !f.is_empty())
                .and_then(|f| serde_json::to_string(f).ok()),
            num_results,
            processing_time_ms,
        };
        if let Err(e) = self.metadata.log_query(&entry).await {
            warn!("Failed to log search query {query_id}: {e}");
        }
    }
}
