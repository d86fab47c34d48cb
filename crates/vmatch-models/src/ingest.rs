//! Batch ingest request/response models.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{JobId, JobStatus, VideoId};

/// A single video submission within a batch.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VideoSubmission {
    pub video_id: VideoId,
    pub video_url: String,
    /// Free-form metadata copied into the record's envelope
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl VideoSubmission {
    pub fn new(video_id: impl Into<VideoId>, video_url: impl Into<String>) -> Self {
        Self {
            video_id: video_id.into(),
            video_url: video_url.into(),
            metadata: HashMap::new(),
        }
    }
}

/// Per-batch indexing options.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct IndexingOptions {
    /// Run shot segmentation before encoding (best effort)
    #[serde(default)]
    pub segment_shots: bool,
    /// Run region-of-interest detection before encoding (best effort)
    #[serde(default)]
    pub detect_roi: bool,
}

/// Batch index request.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IndexRequest {
    pub videos: Vec<VideoSubmission>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<IndexingOptions>,
}

/// Job status snapshot returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IndexStatus {
    pub job_id: JobId,
    pub status: JobStatus,
    pub total_videos: u32,
    pub completed: u32,
    pub failed: u32,
    pub progress_percentage: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<f64>,
}
