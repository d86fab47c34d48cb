//! Concurrency guarantees of the query cache.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use vmatch_encoder::{EncoderHealth, EncoderResult, OfflineEncoder, VideoEncoder};
use vmatch_models::VideoEncoding;
use vmatch_storage::{QueryCache, QueryCacheConfig};

/// Encoder wrapper that counts invocations and simulates a slow model.
struct CountingEncoder {
    inner: OfflineEncoder,
    calls: AtomicUsize,
    delay: Duration,
}

impl CountingEncoder {
    fn new(delay: Duration) -> Self {
        Self {
            inner: OfflineEncoder::new(32, 8),
            calls: AtomicUsize::new(0),
            delay,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VideoEncoder for CountingEncoder {
    async fn encode(&self, path: &Path) -> EncoderResult<VideoEncoding> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
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
async fn concurrent_identical_queries_encode_once() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(QueryCache::new(QueryCacheConfig::new(
        dir.path().join("query_cache"),
    )));
    let encoder = Arc::new(CountingEncoder::new(Duration::from_millis(50)));

    let video = dir.path().join("q.mp4");
    std::fs::write(&video, b"the one query everyone sends").unwrap();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let cache = Arc::clone(&cache);
        let encoder = Arc::clone(&encoder);
        let video = video.clone();
        handles.push(tokio::spawn(async move {
            cache.get_or_encode(&video, encoder.as_ref()).await.unwrap()
        }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    // Exactly one encoder invocation, identical results for everyone.
    assert_eq!(encoder.calls(), 1);
    let first = &results[0];
    for result in &results[1..] {
        assert_eq!(result.global, first.global);
        assert_eq!(result.temporal, first.temporal);
        assert_eq!(result.video_id, first.video_id);
    }
}

#[tokio::test]
async fn distinct_fingerprints_encode_in_parallel() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(QueryCache::new(QueryCacheConfig::new(
        dir.path().join("query_cache"),
    )));
    let encoder = Arc::new(CountingEncoder::new(Duration::from_millis(100)));

    let mut paths = Vec::new();
    for i in 0..4 {
        let path = dir.path().join(format!("q{i}.mp4"));
        std::fs::write(&path, format!("distinct query {i}")).unwrap();
        paths.push(path);
    }

    let started = std::time::Instant::now();
    let mut handles = Vec::new();
    for path in paths {
        let cache = Arc::clone(&cache);
        let encoder = Arc::clone(&encoder);
        handles.push(tokio::spawn(async move {
            cache.get_or_encode(&path, encoder.as_ref()).await.unwrap()
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(encoder.calls(), 4);
    // Serialized execution would need ~400ms of encode time.
    assert!(
        started.elapsed() < Duration::from_millis(350),
        "distinct fingerprints were serialized: {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn encode_failure_releases_the_critical_section() {
    let dir = tempfile::tempdir().unwrap();
    let cache = QueryCache::new(QueryCacheConfig::new(dir.path().join("query_cache")));
    let encoder = OfflineEncoder::new(32, 8);

    let missing = dir.path().join("q.mp4");
    std::fs::write(&missing, b"bytes").unwrap();
    let fingerprinted = missing.clone();
    std::fs::remove_file(&missing).ok();

    // First call fails at fingerprinting (file gone): surfaced as IO error.
    assert!(cache
        .get_or_encode(&fingerprinted, &encoder)
        .await
        .is_err());

    // Re-create the file: the cache must be fully usable afterwards.
    std::fs::write(&missing, b"bytes").unwrap();
    let encoding = cache.get_or_encode(&missing, &encoder).await.unwrap();
    assert_eq!(encoding.dimension(), 32);
}
