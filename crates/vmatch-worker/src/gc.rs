//! Garbage collector for tri-store consistency.
//!
//! Repairs the partial-failure shapes the commit order can leave behind:
//!
//! - a vector entry with no metadata row at all removes both the vector
//!   and the temporal file;
//! - a temporal file with no vector entry and no completed metadata row
//!   pointing at it is deleted;
//! - a failed video must own no artifacts in either store.
//!
//! Videos in `pending`/`processing` are owned by a worker and left
//! untouched by interval passes. The startup pass additionally abandons
//! videos stuck in `processing` (their worker died with them), marking
//! them failed so their artifacts are collectable.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use vmatch_index::VectorIndex;
use vmatch_metadata::MetadataStore;
use vmatch_models::{VideoId, VideoStatus};
use vmatch_storage::TemporalStore;

use crate::error::WorkerResult;

/// What a collection pass removed.
#[derive(Debug, Default, Clone)]
pub struct GcReport {
    pub removed_vectors: Vec<VideoId>,
    pub removed_temporal: Vec<VideoId>,
    pub abandoned_videos: Vec<VideoId>,
}

impl GcReport {
    pub fn is_clean(&self) -> bool {
        self.removed_vectors.is_empty()
            && self.removed_temporal.is_empty()
            && self.abandoned_videos.is_empty()
    }
}

/// Detects and repairs orphaned artifacts.
pub struct GarbageCollector {
    index: Arc<dyn VectorIndex>,
    temporal: TemporalStore,
    metadata: Arc<MetadataStore>,
}

impl GarbageCollector {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        temporal: TemporalStore,
        metadata: Arc<MetadataStore>,
    ) -> Self {
        Self {
            index,
            temporal,
            metadata,
        }
    }

    /// Startup pass: abandon videos a dead worker left in `processing`,
    /// then collect.
    pub async fn run_startup(&self) -> WorkerResult<GcReport> {
        let stuck = self
            .metadata
            .list_videos_by_status(VideoStatus::Processing)
            .await?;
        for id in &stuck {
            warn!("GC: abandoning interrupted video {id}");
            self.metadata
                .set_video_status(id, VideoStatus::Failed, Some("interrupted by restart"))
                .await?;
        }

        let mut report = self.run().await?;
        report.abandoned_videos = stuck;
        Ok(report)
    }

    /// One collection pass; safe to run alongside active workers.
    pub async fn run(&self) -> WorkerResult<GcReport> {
        let mut report = GcReport::default();

        // Vector entries with no metadata row at all lose both artifacts.
        let vector_ids = self.index.list_ids().await?;
        for id in vector_ids {
            if self.metadata.get_video(&id).await?.is_none() {
                warn!("GC: vector entry {id} has no metadata row, removing");
                self.index.delete(&id).await?;
                self.temporal.delete(&id).await?;
                report.removed_vectors.push(id);
            }
        }

        // Temporal files need a vector entry, a worker that owns them, or
        // a completed metadata row whose recorded path resolves to them.
        let temporal_ids = self.temporal.list_ids().await?;
        for id in temporal_ids {
            if self.index.contains(&id).await? {
                continue;
            }
            let referenced = match self.metadata.get_video(&id).await? {
                Some(record) => match record.status {
                    // A worker owns the video until it is terminal.
                    VideoStatus::Pending | VideoStatus::Processing => true,
                    VideoStatus::Failed => false,
                    VideoStatus::Completed => record
                        .temporal_features_path
                        .as_deref()
                        .is_some_and(|p| p == self.temporal.path_for(&id).to_string_lossy()),
                },
                None => false,
            };
            if !referenced {
                warn!("GC: temporal file {id} is orphaned, removing");
                self.temporal.delete(&id).await?;
                report.removed_temporal.push(id);
            }
        }

        // Failed videos own no artifacts.
        let failed = self.metadata.list_videos_by_status(VideoStatus::Failed).await?;
        let already_removed: HashSet<VideoId> = report
            .removed_vectors
            .iter()
            .chain(report.removed_temporal.iter())
            .cloned()
            .collect();
        for id in failed {
            if already_removed.contains(&id) {
                continue;
            }
            if self.index.delete(&id).await? {
                warn!("GC: removing vector of failed video {id}");
                report.removed_vectors.push(id.clone());
            }
            if self.temporal.delete(&id).await? {
                warn!("GC: removing temporal file of failed video {id}");
                report.removed_temporal.push(id);
            }
        }

        if report.is_clean() {
            info!("GC pass clean");
        } else {
            info!(
                "GC removed {} vector entries, {} temporal files",
                report.removed_vectors.len(),
                report.removed_temporal.len()
            );
            metrics::counter!("vmatch_gc_repairs_total").increment(
                (report.removed_vectors.len() + report.removed_temporal.len()) as u64,
            );
        }
        Ok(report)
    }

    /// Run on an interval until the task is aborted.
    pub async fn run_periodically(self: Arc<Self>, interval: std::time::Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = self.run().await {
                warn!("GC pass failed: {e}");
            }
        }
    }
}
