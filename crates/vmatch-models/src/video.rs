//! Video metadata models.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an indexed video.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct VideoId(pub String);

impl VideoId {
    /// Generate a new random video ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for VideoId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for VideoId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VideoId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Video indexing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    /// Submitted but not yet picked up by a worker
    #[default]
    Pending,
    /// A worker owns the video and is running the commit sequence
    Processing,
    /// All three stores committed
    Completed,
    /// Terminal failure (after retries where applicable)
    Failed,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Pending => "pending",
            VideoStatus::Processing => "processing",
            VideoStatus::Completed => "completed",
            VideoStatus::Failed => "failed",
        }
    }

    /// Parse from the stored string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(VideoStatus::Pending),
            "processing" => Some(VideoStatus::Processing),
            "completed" => Some(VideoStatus::Completed),
            "failed" => Some(VideoStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, VideoStatus::Completed | VideoStatus::Failed)
    }
}

impl fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Video metadata row stored in the relational store.
///
/// Created by the indexing pipeline and mutated only through status
/// transitions. Arbitrary caller-supplied fields live in `extra` as a
/// string→string envelope.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VideoRecord {
    /// Unique video ID
    pub video_id: VideoId,

    /// Original source URI (URL or local path)
    pub video_url: String,

    /// Video title
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Duration in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,

    /// Resolution string, e.g. "1920x1080"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,

    /// Frames per second
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,

    /// Source file size in bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// When indexing last completed or failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexed_at: Option<DateTime<Utc>>,

    /// Indexing status
    #[serde(default)]
    pub status: VideoStatus,

    /// Error message (if failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Path of the persisted temporal matrix file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temporal_features_path: Option<String>,

    /// Thumbnail location, if one was generated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,

    /// End-to-end encode time in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<f64>,

    /// Free-form caller metadata (forward-compatible envelope)
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

impl VideoRecord {
    /// Create a new pending record.
    pub fn new(video_id: VideoId, video_url: impl Into<String>) -> Self {
        Self {
            video_id,
            video_url: video_url.into(),
            title: None,
            duration: None,
            resolution: None,
            fps: None,
            file_size: None,
            created_at: Utc::now(),
            indexed_at: None,
            status: VideoStatus::Pending,
            error_message: None,
            temporal_features_path: None,
            thumbnail_url: None,
            processing_time_ms: None,
            extra: HashMap::new(),
        }
    }

    /// Mark as completed.
    pub fn complete(mut self) -> Self {
        self.status = VideoStatus::Completed;
        self.indexed_at = Some(Utc::now());
        self.error_message = None;
        self
    }

    /// Mark as failed.
    pub fn fail(mut self, error: impl Into<String>) -> Self {
        self.status = VideoStatus::Failed;
        self.indexed_at = Some(Utc::now());
        self.error_message = Some(error.into());
        self
    }

    /// Tags attached through the metadata envelope (comma-separated).
    pub fn tags(&self) -> Vec<String> {
        self.extra
            .get("tags")
            .map(|t| {
                t.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}
