//! Batch job scheduler.
//!
//! A job is a batch of video submissions. Each submission is dispatched
//! as an independent unit of work onto a semaphore-bounded pool; job
//! counters are updated as units reach a terminal state. Cancellation
//! lets in-flight units run to completion and fails queued ones.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tracing::warn;

use vmatch_metadata::MetadataStore;
use vmatch_models::{
    IndexingJob, IndexingOptions, JobId, JobStatus, VideoId, VideoRecord, VideoStatus,
    VideoSubmission,
};

use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::pipeline::IndexingPipeline;

/// Result of the single-video ingest path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SingleIndexOutcome {
    /// The video was encoded and committed
    Indexed(VideoId),
    /// A completed record already existed and `skip_if_exists` was set
    Skipped(VideoId),
}

struct JobTracker {
    completed: AtomicU32,
    failed: AtomicU32,
    started: AtomicBool,
    cancelled: AtomicBool,
    total: u32,
}

type TrackerMap = Arc<Mutex<HashMap<JobId, Arc<JobTracker>>>>;

/// Dispatches batches onto the indexing pipeline.
pub struct JobScheduler {
    pipeline: Arc<IndexingPipeline>,
    metadata: Arc<MetadataStore>,
    semaphore: Arc<Semaphore>,
    trackers: TrackerMap,
}

impl JobScheduler {
    pub fn new(
        pipeline: Arc<IndexingPipeline>,
        metadata: Arc<MetadataStore>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            pipeline,
            metadata,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            trackers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Create the job row and dispatch every submission. Returns once the
    /// batch is accepted; units run in the background.
    pub async fn submit(
        &self,
        submissions: Vec<VideoSubmission>,
        options: IndexingOptions,
    ) -> WorkerResult<JobId> {
        let job = IndexingJob::new(JobId::new(), submissions.len() as u32);
        let job_id = job.job_id.clone();
        self.metadata.create_job(&job).await?;

        let logger = JobLogger::new(&job_id, "batch_index");
        logger.log_start(&format!("{} videos", submissions.len()));

        // Empty batch: queued -> completed immediately.
        if submissions.is_empty() {
            self.metadata
                .update_job(&job_id, 0, 0, Some(JobStatus::Completed), None)
                .await?;
            logger.log_completion("empty job");
            return Ok(job_id);
        }

        // Pending rows exist before any unit starts.
        for submission in &submissions {
            let mut record =
                VideoRecord::new(submission.video_id.clone(), submission.video_url.clone());
            record.title = submission.metadata.get("title").cloned();
            record.extra = submission.metadata.clone();
            self.metadata.upsert_video(&record).await?;
        }

        let tracker = Arc::new(JobTracker {
            completed: AtomicU32::new(0),
            failed: AtomicU32::new(0),
            started: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            total: submissions.len() as u32,
        });
        self.trackers
            .lock()
            .expect("tracker lock")
            .insert(job_id.clone(), Arc::clone(&tracker));

        for submission in submissions {
            let pipeline = Arc::clone(&self.pipeline);
            let metadata = Arc::clone(&self.metadata);
            let semaphore = Arc::clone(&self.semaphore);
            let trackers = Arc::clone(&self.trackers);
            let tracker = Arc::clone(&tracker);
            let job_id = job_id.clone();
            let options = options.clone();
            tokio::spawn(async move {
                Self::run_unit(
                    pipeline, metadata, semaphore, trackers, job_id, tracker, submission, options,
                )
                .await;
            });
        }

        Ok(job_id)
    }

    /// Request cancellation. In-flight units run to completion; queued
    /// units are marked failed with reason "cancelled".
    pub fn cancel(&self, job_id: &JobId) -> bool {
        let trackers = self.trackers.lock().expect("tracker lock");
        match trackers.get(job_id) {
            Some(tracker) => {
                tracker.cancelled.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Single-video ingest with `skip_if_exists` semantics: a completed
    /// metadata row short-circuits without re-encoding.
    pub async fn index_single(
        &self,
        video_path: &str,
        skip_if_exists: bool,
    ) -> WorkerResult<SingleIndexOutcome> {
        let video_id = video_id_for_path(video_path);

        if skip_if_exists {
            if let Some(record) = self.metadata.get_video(&video_id).await? {
                if record.status == VideoStatus::Completed {
                    return Ok(SingleIndexOutcome::Skipped(video_id));
                }
            }
        }

        let submission = VideoSubmission::new(video_id.clone(), video_path);
        let record = VideoRecord::new(video_id.clone(), video_path);
        self.metadata.upsert_video(&record).await?;

        self.pipeline
            .index_video(&submission, &IndexingOptions::default())
            .await?;
        Ok(SingleIndexOutcome::Indexed(video_id))
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_unit(
        pipeline: Arc<IndexingPipeline>,
        metadata: Arc<MetadataStore>,
        semaphore: Arc<Semaphore>,
        trackers: TrackerMap,
        job_id: JobId,
        tracker: Arc<JobTracker>,
        submission: VideoSubmission,
        options: IndexingOptions,
    ) {
        let Ok(_permit) = semaphore.acquire_owned().await else {
            return;
        };
        let logger = JobLogger::new(&job_id, "index_video");

        // Cancelled while queued: fail the unit without encoding.
        if tracker.cancelled.load(Ordering::SeqCst) {
            if let Err(e) = metadata
                .set_video_status(&submission.video_id, VideoStatus::Failed, Some("cancelled"))
                .await
            {
                warn!("Failed to cancel {}: {e}", submission.video_id);
            }
            Self::finish_unit(&metadata, &trackers, &job_id, &tracker, false).await;
            return;
        }

        // First started unit flips the job to processing.
        if !tracker.started.swap(true, Ordering::SeqCst) {
            if let Err(e) = metadata
                .update_job(
                    &job_id,
                    tracker.completed.load(Ordering::SeqCst),
                    tracker.failed.load(Ordering::SeqCst),
                    Some(JobStatus::Processing),
                    None,
                )
                .await
            {
                warn!("Failed to mark job {job_id} processing: {e}");
            }
        }

        logger.log_progress(&format!("indexing {}", submission.video_id));
        let succeeded = match pipeline.index_video(&submission, &options).await {
            Ok(()) => true,
            Err(e) => {
                logger.log_error(&format!("{} failed: {e}", submission.video_id));
                false
            }
        };
        Self::finish_unit(&metadata, &trackers, &job_id, &tracker, succeeded).await;
    }

    async fn finish_unit(
        metadata: &MetadataStore,
        trackers: &Mutex<HashMap<JobId, Arc<JobTracker>>>,
        job_id: &JobId,
        tracker: &JobTracker,
        succeeded: bool,
    ) {
        if succeeded {
            tracker.completed.fetch_add(1, Ordering::SeqCst);
        } else {
            tracker.failed.fetch_add(1, Ordering::SeqCst);
        }
        let completed = tracker.completed.load(Ordering::SeqCst);
        let failed = tracker.failed.load(Ordering::SeqCst);
        let done = completed + failed;

        let status = if done >= tracker.total {
            if failed == 0 {
                Some(JobStatus::Completed)
            } else {
                Some(JobStatus::CompletedWithErrors)
            }
        } else {
            None
        };

        if let Err(e) = metadata
            .update_job(job_id, completed, failed, status, None)
            .await
        {
            warn!("Failed to update job {job_id} counters: {e}");
        }

        if done >= tracker.total {
            trackers.lock().expect("tracker lock").remove(job_id);
            JobLogger::new(job_id, "batch_index")
                .log_completion(&format!("{completed} completed, {failed} failed"));
        }
    }

    /// Wait until a submitted job reaches a terminal status (test helper
    /// and admin tooling).
    pub async fn wait_for_job(&self, job_id: &JobId) -> WorkerResult<IndexingJob> {
        loop {
            let job = self
                .metadata
                .get_job(job_id)
                .await?
                .ok_or_else(|| WorkerError::job_failed(format!("unknown job {job_id}")))?;
            if job.status.is_terminal() {
                return Ok(job);
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
    }
}

/// Stable video id for the single-ingest path: the file stem.
fn video_id_for_path(video_path: &str) -> VideoId {
    let stem = std::path::Path::new(video_path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("video");
    VideoId::from(stem)
}
