//! Indexing pipeline, scheduler and GC integration tests.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use vmatch_encoder::{EncoderError, EncoderHealth, EncoderResult, OfflineEncoder, VideoEncoder};
use vmatch_index::{MemoryVectorIndex, VectorAttrs, VectorIndex};
use vmatch_metadata::MetadataStore;
use vmatch_models::{
    IndexingOptions, JobStatus, VideoEncoding, VideoId, VideoStatus, VideoSubmission,
};
use vmatch_storage::{StorageLayout, TemporalStore};
use vmatch_worker::{GarbageCollector, IndexingPipeline, JobScheduler, WorkerConfig};

const DIM: usize = 32;
const STEPS: usize = 8;

struct Harness {
    _dir: tempfile::TempDir,
    root: std::path::PathBuf,
    index: Arc<dyn VectorIndex>,
    metadata: Arc<MetadataStore>,
    temporal: TemporalStore,
    pipeline: Arc<IndexingPipeline>,
}

fn harness_with_encoder(encoder: Arc<dyn VideoEncoder>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let layout = StorageLayout::new(&root);
    layout.ensure_dirs().unwrap();

    let index: Arc<dyn VectorIndex> = Arc::new(MemoryVectorIndex::new(DIM));
    let metadata = Arc::new(MetadataStore::open_in_memory().unwrap());
    let temporal = TemporalStore::new(layout.temporal_dir());
    let config = WorkerConfig {
        max_retries: 2,
        retry_base_delay: Duration::from_millis(10),
        ..Default::default()
    };

    let pipeline = Arc::new(IndexingPipeline::new(
        encoder,
        Arc::clone(&index),
        temporal.clone(),
        Arc::clone(&metadata),
        layout,
        config,
    ));

    Harness {
        _dir: dir,
        root,
        index,
        metadata,
        temporal,
        pipeline,
    }
}

fn harness() -> Harness {
    harness_with_encoder(Arc::new(OfflineEncoder::new(DIM, STEPS)))
}

fn write_video(harness: &Harness, name: &str, content: &[u8]) -> String {
    let path = harness.root.join(name);
    std::fs::write(&path, content).unwrap();
    path.to_string_lossy().into_owned()
}

fn submission(harness: &Harness, id: &str, content: &[u8]) -> VideoSubmission {
    let path = write_video(harness, &format!("{id}.bin"), content);
    VideoSubmission::new(id, path)
}

#[tokio::test]
async fn index_commits_all_three_stores() {
    let harness = harness();
    let submission = submission(&harness, "vid-a", b"video a content");

    harness
        .pipeline
        .index_video(&submission, &IndexingOptions::default())
        .await
        .unwrap();

    // Tri-store consistency for a completed video.
    let record = harness
        .metadata
        .get_video(&submission.video_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, VideoStatus::Completed);
    assert!(record.indexed_at.is_some());
    assert!(record.processing_time_ms.is_some());

    assert!(harness.index.contains(&submission.video_id).await.unwrap());
    assert!(harness.temporal.exists(&submission.video_id).await);

    let recorded_path = record.temporal_features_path.unwrap();
    assert_eq!(
        recorded_path,
        harness
            .temporal
            .path_for(&submission.video_id)
            .to_string_lossy()
    );
    assert!(Path::new(&recorded_path).exists());
}

#[tokio::test]
async fn decode_error_is_terminal_and_leaves_no_orphans() {
    let harness = harness();
    let submission = VideoSubmission::new("vid-missing", "/nonexistent/video.mp4");

    let err = harness
        .pipeline
        .index_video(&submission, &IndexingOptions::default())
        .await
        .unwrap_err();
    assert!(!err.is_transient());

    let record = harness
        .metadata
        .get_video(&submission.video_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, VideoStatus::Failed);
    assert!(record.error_message.is_some());

    // No vector, no temporal file for a failed video.
    assert!(!harness.index.contains(&submission.video_id).await.unwrap());
    assert!(!harness.temporal.exists(&submission.video_id).await);
}

#[tokio::test]
async fn reindex_is_idempotent() {
    let harness = harness();
    let submission = submission(&harness, "vid-a", b"stable content");

    harness
        .pipeline
        .index_video(&submission, &IndexingOptions::default())
        .await
        .unwrap();
    let first = harness
        .metadata
        .get_video(&submission.video_id)
        .await
        .unwrap()
        .unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    harness
        .pipeline
        .index_video(&submission, &IndexingOptions::default())
        .await
        .unwrap();

    assert_eq!(harness.index.count().await.unwrap(), 1);
    assert_eq!(harness.temporal.list_ids().await.unwrap().len(), 1);
    assert_eq!(harness.metadata.count_videos().await.unwrap(), 1);

    let second = harness
        .metadata
        .get_video(&submission.video_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.status, VideoStatus::Completed);
    assert!(second.indexed_at.unwrap() > first.indexed_at.unwrap());
}

/// Encoder that fails transiently before succeeding.
struct FlakyEncoder {
    inner: OfflineEncoder,
    failures_left: AtomicUsize,
    calls: AtomicUsize,
}

#[async_trait]
impl VideoEncoder for FlakyEncoder {
    async fn encode(&self, path: &Path) -> EncoderResult<VideoEncoding> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(EncoderError::Resource("transient oom".to_string()));
        }
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
async fn transient_failures_are_retried_with_backoff() {
    let encoder = Arc::new(FlakyEncoder {
        inner: OfflineEncoder::new(DIM, STEPS),
        failures_left: AtomicUsize::new(1),
        calls: AtomicUsize::new(0),
    });
    let harness = harness_with_encoder(Arc::clone(&encoder) as Arc<dyn VideoEncoder>);
    let submission = submission(&harness, "vid-a", b"content");

    harness
        .pipeline
        .index_video(&submission, &IndexingOptions::default())
        .await
        .unwrap();

    assert_eq!(encoder.calls.load(Ordering::SeqCst), 2);
    let record = harness
        .metadata
        .get_video(&submission.video_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, VideoStatus::Completed);
}

#[tokio::test]
async fn batch_job_accounting_matches_terminal_videos() {
    let harness = harness();
    let scheduler = Arc::new(JobScheduler::new(
        Arc::clone(&harness.pipeline),
        Arc::clone(&harness.metadata),
        2,
    ));

    let submissions = vec![
        submission(&harness, "good-1", b"one"),
        submission(&harness, "good-2", b"two"),
        VideoSubmission::new("bad-1", "/nonexistent/video.mp4"),
    ];
    let job_id = scheduler
        .submit(submissions, IndexingOptions::default())
        .await
        .unwrap();

    let job = tokio::time::timeout(Duration::from_secs(10), scheduler.wait_for_job(&job_id))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(job.status, JobStatus::CompletedWithErrors);
    assert_eq!(job.completed, 2);
    assert_eq!(job.failed, 1);
    assert_eq!(job.done(), job.total_videos);
    assert!(job.started_at.is_some());
    assert!(job.completed_at.is_some());

    // Job accounting equals the number of terminal videos.
    let completed = harness
        .metadata
        .list_videos_by_status(VideoStatus::Completed)
        .await
        .unwrap();
    let failed = harness
        .metadata
        .list_videos_by_status(VideoStatus::Failed)
        .await
        .unwrap();
    assert_eq!(completed.len() as u32, job.completed);
    assert_eq!(failed.len() as u32, job.failed);
}

#[tokio::test]
async fn empty_job_completes_immediately() {
    let harness = harness();
    let scheduler = Arc::new(JobScheduler::new(
        Arc::clone(&harness.pipeline),
        Arc::clone(&harness.metadata),
        2,
    ));

    let job_id = scheduler
        .submit(Vec::new(), IndexingOptions::default())
        .await
        .unwrap();
    let job = harness.metadata.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.total_videos, 0);
}

/// Encoder slow enough for cancellation to land while units are queued.
struct SlowEncoder {
    inner: OfflineEncoder,
}

#[async_trait]
impl VideoEncoder for SlowEncoder {
    async fn encode(&self, path: &Path) -> EncoderResult<VideoEncoding> {
        tokio::time::sleep(Duration::from_millis(150)).await;
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
async fn cancellation_fails_queued_units() {
    let harness = harness_with_encoder(Arc::new(SlowEncoder {
        inner: OfflineEncoder::new(DIM, STEPS),
    }));
    let scheduler = Arc::new(JobScheduler::new(
        Arc::clone(&harness.pipeline),
        Arc::clone(&harness.metadata),
        1,
    ));

    let submissions = (0..4)
        .map(|i| submission(&harness, &format!("vid-{i}"), format!("video {i}").as_bytes()))
        .collect();
    let job_id = scheduler
        .submit(submissions, IndexingOptions::default())
        .await
        .unwrap();

    // Let at most one unit enter the pipeline, then cancel.
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(scheduler.cancel(&job_id));

    let job = tokio::time::timeout(Duration::from_secs(10), scheduler.wait_for_job(&job_id))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(job.done(), 4);
    assert_eq!(job.status, JobStatus::CompletedWithErrors);
    assert!(job.failed >= 3, "expected queued units to fail: {job:?}");

    let failed = harness
        .metadata
        .list_videos_by_status(VideoStatus::Failed)
        .await
        .unwrap();
    let mut saw_cancelled = false;
    for id in failed {
        let record = harness.metadata.get_video(&id).await.unwrap().unwrap();
        if record.error_message.as_deref() == Some("cancelled") {
            saw_cancelled = true;
        }
    }
    assert!(saw_cancelled);
}

#[tokio::test]
async fn skip_if_exists_short_circuits() {
    let harness = harness();
    let scheduler = Arc::new(JobScheduler::new(
        Arc::clone(&harness.pipeline),
        Arc::clone(&harness.metadata),
        2,
    ));
    let path = write_video(&harness, "walk_01.bin", b"walking video");

    let first = scheduler.index_single(&path, true).await.unwrap();
    let vmatch_worker::SingleIndexOutcome::Indexed(id) = first else {
        panic!("expected first ingest to index");
    };
    assert_eq!(id.as_str(), "walk_01");

    let second = scheduler.index_single(&path, true).await.unwrap();
    assert_eq!(second, vmatch_worker::SingleIndexOutcome::Skipped(id));
    assert_eq!(harness.index.count().await.unwrap(), 1);

    // Without the flag it re-indexes.
    let third = scheduler.index_single(&path, false).await.unwrap();
    assert!(matches!(third, vmatch_worker::SingleIndexOutcome::Indexed(_)));
    assert_eq!(harness.index.count().await.unwrap(), 1);
}

#[tokio::test]
async fn gc_repairs_crash_between_vector_and_metadata_commit() {
    let harness = harness();
    let gc = GarbageCollector::new(
        Arc::clone(&harness.index),
        harness.temporal.clone(),
        Arc::clone(&harness.metadata),
    );

    // Simulate a crash after step 7: temporal file + vector entry exist,
    // no metadata row.
    let orphan = VideoId::from("orphan-1");
    let matrix = ndarray::Array2::<f32>::ones((STEPS, DIM));
    harness.temporal.put(&orphan, &matrix).await.unwrap();
    let mut unit = vec![0.0f32; DIM];
    unit[0] = 1.0;
    harness
        .index
        .insert(&orphan, &unit, VectorAttrs::new("/v/orphan.mp4"))
        .await
        .unwrap();

    let report = gc.run().await.unwrap();
    assert_eq!(report.removed_vectors, vec![orphan.clone()]);
    assert!(!harness.index.contains(&orphan).await.unwrap());
    assert!(!harness.temporal.exists(&orphan).await);

    // Second attempt completes normally and satisfies tri-store
    // consistency.
    let submission = submission(&harness, "orphan-1", b"recovered video");
    harness
        .pipeline
        .index_video(&submission, &IndexingOptions::default())
        .await
        .unwrap();
    let report = gc.run().await.unwrap();
    assert!(report.is_clean());
    assert!(harness.index.contains(&submission.video_id).await.unwrap());
}

#[tokio::test]
async fn startup_gc_abandons_interrupted_videos_and_collects_artifacts() {
    let harness = harness();
    let gc = GarbageCollector::new(
        Arc::clone(&harness.index),
        harness.temporal.clone(),
        Arc::clone(&harness.metadata),
    );

    // Crash between steps 7 and 8: both artifact stores committed, the
    // metadata row still says processing.
    let id = VideoId::from("mid-commit");
    harness
        .metadata
        .set_video_status(&id, VideoStatus::Processing, None)
        .await
        .unwrap();
    harness
        .temporal
        .put(&id, &ndarray::Array2::<f32>::ones((STEPS, DIM)))
        .await
        .unwrap();
    let mut unit = vec![0.0f32; DIM];
    unit[0] = 1.0;
    harness
        .index
        .insert(&id, &unit, VectorAttrs::new("/v/mid.mp4"))
        .await
        .unwrap();

    // Interval pass leaves worker-owned videos alone.
    let report = gc.run().await.unwrap();
    assert!(report.is_clean());
    assert!(harness.temporal.exists(&id).await);

    // Restart pass abandons the video and removes its artifacts.
    let report = gc.run_startup().await.unwrap();
    assert_eq!(report.abandoned_videos, vec![id.clone()]);
    assert!(!harness.index.contains(&id).await.unwrap());
    assert!(!harness.temporal.exists(&id).await);

    let record = harness.metadata.get_video(&id).await.unwrap().unwrap();
    assert_eq!(record.status, VideoStatus::Failed);

    // Second attempt completes normally.
    let submission = submission(&harness, "mid-commit", b"recovered");
    harness
        .pipeline
        .index_video(&submission, &IndexingOptions::default())
        .await
        .unwrap();
    assert!(gc.run().await.unwrap().is_clean());
    assert!(harness.index.contains(&id).await.unwrap());
    assert!(harness.temporal.exists(&id).await);
}

#[tokio::test]
async fn gc_removes_temporal_orphan_from_failed_step() {
    let harness = harness();
    let gc = GarbageCollector::new(
        Arc::clone(&harness.index),
        harness.temporal.clone(),
        Arc::clone(&harness.metadata),
    );

    // Crash after step 6: temporal file only, video marked failed.
    let id = VideoId::from("half-written");
    harness
        .temporal
        .put(&id, &ndarray::Array2::<f32>::zeros((STEPS, DIM)))
        .await
        .unwrap();
    harness
        .metadata
        .set_video_status(&id, VideoStatus::Failed, Some("encoder crashed"))
        .await
        .unwrap();

    let report = gc.run().await.unwrap();
    assert!(report.removed_temporal.contains(&id));
    assert!(!harness.temporal.exists(&id).await);

    // Completed videos are untouched.
    let good = submission(&harness, "good", b"fine");
    harness
        .pipeline
        .index_video(&good, &IndexingOptions::default())
        .await
        .unwrap();
    let report = gc.run().await.unwrap();
    assert!(report.is_clean());
    assert!(harness.temporal.exists(&good.video_id).await);
}
