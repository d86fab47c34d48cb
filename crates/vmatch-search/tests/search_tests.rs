//! End-to-end search pipeline tests against real (offline-encoded) stores.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use vmatch_encoder::{EncoderHealth, EncoderResult, OfflineEncoder, VideoEncoder};
use vmatch_index::{MemoryVectorIndex, VectorIndex};
use vmatch_metadata::MetadataStore;
use vmatch_models::{
    IndexingOptions, SearchFilters, SearchRequest, VideoEncoding, VideoId, VideoSubmission,
};
use vmatch_search::rerank::temporal_similarity;
use vmatch_search::{SearchConfig, SearchService};
use vmatch_storage::{QueryCache, QueryCacheConfig, StorageLayout, TemporalStore};
use vmatch_worker::{IndexingPipeline, WorkerConfig};

const DIM: usize = 32;
const STEPS: usize = 8;

struct Harness {
    _dir: tempfile::TempDir,
    root: std::path::PathBuf,
    index: Arc<dyn VectorIndex>,
    metadata: Arc<MetadataStore>,
    temporal: TemporalStore,
    pipeline: Arc<IndexingPipeline>,
    encoder: Arc<dyn VideoEncoder>,
}

impl Harness {
    fn new_with_encoder(encoder: Arc<dyn VideoEncoder>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let layout = StorageLayout::new(&root);
        layout.ensure_dirs().unwrap();

        let index: Arc<dyn VectorIndex> = Arc::new(MemoryVectorIndex::new(DIM));
        let metadata = Arc::new(MetadataStore::open_in_memory().unwrap());
        let temporal = TemporalStore::new(layout.temporal_dir());

        let pipeline = Arc::new(IndexingPipeline::new(
            Arc::clone(&encoder),
            Arc::clone(&index),
            temporal.clone(),
            Arc::clone(&metadata),
            layout,
            WorkerConfig {
                retry_base_delay: Duration::from_millis(5),
                ..Default::default()
            },
        ));

        Self {
            _dir: dir,
            root,
            index,
            metadata,
            temporal,
            pipeline,
            encoder,
        }
    }

    fn new() -> Self {
        Self::new_with_encoder(Arc::new(OfflineEncoder::new(DIM, STEPS)))
    }

    fn search_service(&self) -> SearchService {
        SearchService::new(
            Arc::clone(&self.encoder),
            Arc::clone(&self.index),
            self.temporal.clone(),
            Arc::clone(&self.metadata),
            Arc::new(QueryCache::new(QueryCacheConfig::new(
                self.root.join("query_cache"),
            ))),
            SearchConfig::default(),
        )
    }

    fn write_video(&self, name: &str, content: &[u8]) -> String {
        let path = self.root.join(name);
        std::fs::write(&path, content).unwrap();
        path.to_string_lossy().into_owned()
    }

    async fn index(&self, id: &str, content: &[u8]) -> String {
        let path = self.write_video(&format!("{id}.bin"), content);
        let submission = VideoSubmission::new(id, path.clone());
        self.pipeline
            .index_video(&submission, &IndexingOptions::default())
            .await
            .unwrap();
        path
    }
}

#[tokio::test]
async fn index_then_search_finds_exact_match_at_rank_one() {
    let harness = Harness::new();
    let path_a = harness.index("video-a", b"the query video itself").await;
    harness.index("video-b", b"something unrelated").await;
    harness.index("video-c", b"another different video").await;

    let service = harness.search_service();
    let response = service
        .search(&SearchRequest::new(&path_a).with_top_k(3))
        .await
        .unwrap();

    assert_eq!(response.total_results, 3);
    assert_eq!(response.results.len(), 3);
    assert_eq!(response.results[0].video_id.as_str(), "video-a");
    assert!(
        response.results[0].similarity_score >= 0.999,
        "exact hit scored {}",
        response.results[0].similarity_score
    );
    assert!(response.processing_time_ms >= 0.0);

    // Query was logged.
    assert_eq!(harness.metadata.count_queries().await.unwrap(), 1);
}

#[tokio::test]
async fn top_k_zero_returns_empty_without_encoding() {
    struct PanicEncoder;

    #[async_trait]
    impl VideoEncoder for PanicEncoder {
        async fn encode(&self, _path: &Path) -> EncoderResult<VideoEncoding> {
            panic!("encode must not be called for top_k = 0");
        }
        fn dimension(&self) -> usize {
            DIM
        }
        async fn health(&self) -> EncoderResult<EncoderHealth> {
            unreachable!()
        }
    }

    let harness = Harness::new_with_encoder(Arc::new(PanicEncoder));
    let service = harness.search_service();
    let response = service
        .search(&SearchRequest::new("/whatever.mp4").with_top_k(0))
        .await
        .unwrap();
    assert!(response.results.is_empty());
    assert_eq!(response.total_results, 0);
}

#[tokio::test]
async fn filters_that_exclude_everything_return_empty_list() {
    let harness = Harness::new();
    let path_a = harness.index("video-a", b"some video").await;

    let service = harness.search_service();
    let mut request = SearchRequest::new(&path_a).with_top_k(5);
    request.filters = Some(SearchFilters {
        duration_min: Some(10_000.0),
        ..Default::default()
    });

    let response = service.search(&request).await.unwrap();
    assert!(response.results.is_empty());
    assert_eq!(response.total_results, 0);
}

#[tokio::test]
async fn rerank_scores_match_fusion_formula() {
    let harness = Harness::new();
    let path_a = harness.index("video-a", b"query content").await;
    harness.index("video-b", b"candidate b").await;
    harness.index("video-c", b"candidate c").await;

    let service = harness.search_service();

    // Baseline list without re-ranking: global-only scores.
    let plain = service
        .search(&SearchRequest::new(&path_a).with_top_k(3))
        .await
        .unwrap();

    // Re-ranked list over the same candidates.
    let reranked = service
        .search(&SearchRequest::new(&path_a).with_top_k(3).with_reranking(true))
        .await
        .unwrap();
    assert_eq!(reranked.results.len(), 3);

    // Recompute the expected fusion for every candidate.
    let query_encoding = harness
        .encoder
        .encode(Path::new(&path_a))
        .await
        .unwrap();
    for result in &reranked.results {
        let global_score = plain
            .results
            .iter()
            .find(|r| r.video_id == result.video_id)
            .expect("candidate present in both lists")
            .similarity_score;
        let candidate_temporal = harness.temporal.get(&result.video_id).await.unwrap();
        let scores = temporal_similarity(&query_encoding.temporal, &candidate_temporal);
        let expected = scores.fuse_with_global(global_score);
        assert!(
            (result.similarity_score - expected).abs() < 1e-6,
            "{}: got {}, expected {}",
            result.video_id,
            result.similarity_score,
            expected
        );
    }
}

#[tokio::test]
async fn rerank_degrades_gracefully_without_temporal_features() {
    let harness = Harness::new();
    let path_a = harness.index("video-a", b"query content").await;
    harness.index("video-b", b"candidate b").await;

    // Remove candidate b's temporal matrix.
    harness.temporal.delete(&VideoId::from("video-b")).await.unwrap();

    let service = harness.search_service();
    let plain = service
        .search(&SearchRequest::new(&path_a).with_top_k(2))
        .await
        .unwrap();
    let reranked = service
        .search(&SearchRequest::new(&path_a).with_top_k(2).with_reranking(true))
        .await
        .unwrap();

    let plain_b = plain
        .results
        .iter()
        .find(|r| r.video_id.as_str() == "video-b")
        .unwrap();
    let reranked_b = reranked
        .results
        .iter()
        .find(|r| r.video_id.as_str() == "video-b")
        .unwrap();
    // No temporal features: the candidate keeps its global-only score.
    assert!((plain_b.similarity_score - reranked_b.similarity_score).abs() < 1e-6);
}

#[tokio::test]
async fn results_without_metadata_rows_are_dropped() {
    let harness = Harness::new();
    let path_a = harness.index("video-a", b"query content").await;
    harness.index("video-b", b"candidate b").await;

    // Simulate the window between vector insert and metadata commit.
    harness
        .metadata
        .delete_video(&VideoId::from("video-b"))
        .await
        .unwrap();

    let service = harness.search_service();
    let response = service
        .search(&SearchRequest::new(&path_a).with_top_k(5))
        .await
        .unwrap();

    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].video_id.as_str(), "video-a");
}

/// Counting encoder for the concurrent-search dedup scenario.
struct CountingEncoder {
    inner: OfflineEncoder,
    calls: AtomicUsize,
}

#[async_trait]
impl VideoEncoder for CountingEncoder {
    async fn encode(&self, path: &Path) -> EncoderResult<VideoEncoding> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(40)).await;
        self.inner.encode(path).await
    }
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
    async fn health(&self) -> EncoderResult<EncoderHealth> {
        self.inner.health().await
    }
}

#[tokio::test]
async fn concurrent_identical_searches_share_one_encode() {
    let harness = Harness::new();
    harness.index("video-a", b"indexed content").await;

    let counting = Arc::new(CountingEncoder {
        inner: OfflineEncoder::new(DIM, STEPS),
        calls: AtomicUsize::new(0),
    });
    let query_path = harness.write_video("query.bin", b"the popular query");

    let service = Arc::new(SearchService::new(
        Arc::clone(&counting) as Arc<dyn VideoEncoder>,
        Arc::clone(&harness.index),
        harness.temporal.clone(),
        Arc::clone(&harness.metadata),
        Arc::new(QueryCache::new(QueryCacheConfig::new(
            harness.root.join("query_cache"),
        ))),
        SearchConfig::default(),
    ));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let service = Arc::clone(&service);
        let query_path = query_path.clone();
        handles.push(tokio::spawn(async move {
            service
                .search(&SearchRequest::new(&query_path).with_top_k(3))
                .await
                .unwrap()
        }));
    }

    let mut responses = Vec::new();
    for handle in handles {
        responses.push(handle.await.unwrap());
    }

    assert_eq!(counting.calls.load(Ordering::SeqCst), 1);

    let first_ids: Vec<&str> = responses[0]
        .results
        .iter()
        .map(|r| r.video_id.as_str())
        .collect();
    for response in &responses[1..] {
        let ids: Vec<&str> = response.results.iter().map(|r| r.video_id.as_str()).collect();
        assert_eq!(ids, first_ids);
    }
}
