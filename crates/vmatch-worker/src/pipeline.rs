//! Per-video indexing pipeline.
//!
//! The commit sequence is strictly ordered and never reordered:
//!
//! 1. metadata → processing
//! 2. download remote source to temp, validate
//! 3. best-effort shot segmentation / ROI detection
//! 4. encode
//! 5. probe duration/resolution
//! 6. temporal matrix → temporal store (atomic)
//! 7. global vector → vector index (idempotent)
//! 8. metadata upsert, status completed
//! 9. delete temp download
//!
//! The temporal store goes first because its orphans are the cheapest to
//! garbage-collect; the metadata row is last so a completed status always
//! implies both artifact stores committed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use vmatch_encoder::VideoEncoder;
use vmatch_index::{VectorAttrs, VectorIndex};
use vmatch_media::{self, ShotConfig};
use vmatch_metadata::MetadataStore;
use vmatch_models::{IndexingOptions, VideoRecord, VideoStatus, VideoSubmission};
use vmatch_storage::{StorageLayout, TemporalStore};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};

/// Orchestrates the per-video commit sequence across the three stores.
pub struct IndexingPipeline {
    encoder: Arc<dyn VideoEncoder>,
    index: Arc<dyn VectorIndex>,
    temporal: TemporalStore,
    metadata: Arc<MetadataStore>,
    layout: StorageLayout,
    config: WorkerConfig,
}

impl IndexingPipeline {
    pub fn new(
        encoder: Arc<dyn VideoEncoder>,
        index: Arc<dyn VectorIndex>,
        temporal: TemporalStore,
        metadata: Arc<MetadataStore>,
        layout: StorageLayout,
        config: WorkerConfig,
    ) -> Self {
        Self {
            encoder,
            index,
            temporal,
            metadata,
            layout,
            config,
        }
    }

    pub fn metadata(&self) -> &Arc<MetadataStore> {
        &self.metadata
    }

    /// Index one video with bounded retries for transient failures.
    ///
    /// On terminal failure the video is marked failed with the error
    /// message; partial outputs from a failed attempt are overwritten by
    /// the idempotent stores on re-entry.
    pub async fn index_video(
        &self,
        submission: &VideoSubmission,
        options: &IndexingOptions,
    ) -> WorkerResult<()> {
        let mut attempt = 0u32;
        loop {
            match self.run_commit_sequence(submission, options).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = self.config.retry_delay(attempt);
                    warn!(
                        "Indexing {} failed (attempt {attempt}/{}), retrying in {:?}: {e}",
                        submission.video_id, self.config.max_retries, delay
                    );
                    metrics::counter!("vmatch_index_retries_total").increment(1);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    let message = e.to_string();
                    if let Err(update_err) = self
                        .metadata
                        .set_video_status(&submission.video_id, VideoStatus::Failed, Some(&message))
                        .await
                    {
                        warn!(
                            "Failed to mark {} failed: {update_err}",
                            submission.video_id
                        );
                    }
                    metrics::counter!("vmatch_index_failures_total").increment(1);
                    return Err(e);
                }
            }
        }
    }

    /// One attempt of the nine-step sequence.
    async fn run_commit_sequence(
        &self,
        submission: &VideoSubmission,
        options: &IndexingOptions,
    ) -> WorkerResult<()> {
        let video_id = &submission.video_id;
        let started = Instant::now();

        // Step 1: own the video.
        self.metadata
            .set_video_status(video_id, VideoStatus::Processing, None)
            .await?;

        // Step 2: materialize the source locally.
        let (local_path, temp_download) = self.resolve_source(submission).await?;
        let result = self
            .ingest_local(submission, options, &local_path, started)
            .await;

        // Step 9: temp cleanup runs on success and failure alike.
        if let Some(temp) = temp_download {
            if let Err(e) = tokio::fs::remove_file(&temp).await {
                warn!("Failed to remove temp download {}: {e}", temp.display());
            }
        }
        result
    }

    async fn ingest_local(
        &self,
        submission: &VideoSubmission,
        options: &IndexingOptions,
        local_path: &Path,
        started: Instant,
    ) -> WorkerResult<()> {
        let video_id = &submission.video_id;
        let mut extra = submission.metadata.clone();

        // Step 3: best-effort preprocessors; failures never abort ingest.
        if options.segment_shots || self.config.enable_shot_segmentation {
            let shot_config = ShotConfig {
                threshold: self.config.shot_threshold,
                ..Default::default()
            };
            match vmatch_media::detect_shots(local_path, &shot_config).await {
                Ok(shots) => {
                    info!("Detected {} shots in {video_id}", shots.len());
                    extra.insert("shot_count".to_string(), shots.len().to_string());
                }
                Err(e) => warn!("Shot segmentation failed for {video_id}: {e}"),
            }
        }
        if options.detect_roi || self.config.enable_roi_detection {
            match vmatch_media::detect_roi(local_path, self.config.roi_sample_frames).await {
                Ok(Some(roi)) => {
                    info!("Detected ROI {} in {video_id}", roi.as_crop_string());
                    extra.insert("roi".to_string(), roi.as_crop_string());
                }
                Ok(None) => {}
                Err(e) => warn!("ROI detection failed for {video_id}: {e}"),
            }
        }

        // Step 4: encode.
        let encoding = self.encoder.encode(local_path).await?;

        // Step 5: probe; a probe failure degrades to unknown duration.
        let probe = match vmatch_media::probe_video(local_path).await {
            Ok(info) => Some(info),
            Err(e) => {
                warn!("Probe failed for {video_id}: {e}");
                None
            }
        };
        let file_size = tokio::fs::metadata(local_path).await.map(|m| m.len()).ok();

        // Step 6: temporal matrix first (cheapest orphan to collect).
        let temporal_path = self.temporal.put(video_id, &encoding.temporal).await?;

        // Step 7: global vector, idempotent by id.
        let attrs = VectorAttrs {
            video_path: submission.video_url.clone(),
            duration: probe.as_ref().map(|p| p.duration),
            created_at: encoding.created_at,
            tags: parse_tags(&extra),
        };
        self.index.insert(video_id, &encoding.global, attrs).await?;

        // Step 8: metadata row last; completed implies 6 and 7 committed.
        let mut record = VideoRecord::new(video_id.clone(), submission.video_url.clone());
        record.title = extra.get("title").cloned();
        record.duration = probe.as_ref().map(|p| p.duration);
        record.resolution = probe.as_ref().map(|p| p.resolution());
        record.fps = probe.as_ref().map(|p| p.fps);
        record.file_size = file_size;
        record.temporal_features_path = Some(temporal_path.to_string_lossy().into_owned());
        record.processing_time_ms = Some(f64::from(encoding.processing_ms));
        record.extra = extra;
        self.metadata.upsert_video(&record.complete()).await?;

        metrics::counter!("vmatch_videos_indexed_total").increment(1);
        info!(
            "Indexed {video_id} in {:.0} ms",
            started.elapsed().as_secs_f64() * 1000.0
        );
        Ok(())
    }

    /// Download remote sources to scratch space; validate local ones.
    async fn resolve_source(
        &self,
        submission: &VideoSubmission,
    ) -> WorkerResult<(PathBuf, Option<PathBuf>)> {
        if vmatch_media::is_remote_url(&submission.video_url) {
            let dest = self.layout.download_path(&submission.video_id, "mp4");
            vmatch_media::download_video(&submission.video_url, &dest).await?;
            return Ok((dest.clone(), Some(dest)));
        }

        let path = PathBuf::from(&submission.video_url);
        let size = tokio::fs::metadata(&path)
            .await
            .map(|m| m.len())
            .map_err(|_| {
                WorkerError::Media(vmatch_media::MediaError::FileNotFound(path.clone()))
            })?;
        if size == 0 {
            return Err(WorkerError::Media(vmatch_media::MediaError::InvalidVideo(
                format!("empty source file: {}", path.display()),
            )));
        }
        Ok((path, None))
    }

    /// Remove a video from all three stores (admin delete).
    pub async fn delete_video(&self, video_id: &vmatch_models::VideoId) -> WorkerResult<bool> {
        let in_index = self.index.delete(video_id).await?;
        let in_temporal = self.temporal.delete(video_id).await?;
        let in_metadata = self.metadata.delete_video(video_id).await?;
        Ok(in_index || in_temporal || in_metadata)
    }
}

fn parse_tags(extra: &std::collections::HashMap<String, String>) -> Vec<String> {
    extra
        .get("tags")
        .map(|t| {
            t.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}
