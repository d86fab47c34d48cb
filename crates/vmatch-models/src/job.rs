//! Indexing job models.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an indexing job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Batch indexing job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, no unit started yet
    #[default]
    Queued,
    /// At least one unit started
    Processing,
    /// Every unit completed successfully
    Completed,
    /// All units terminal, at least one failed
    CompletedWithErrors,
    /// The scheduler itself could not dispatch the batch
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::CompletedWithErrors => "completed_with_errors",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "completed_with_errors" => Some(JobStatus::CompletedWithErrors),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::CompletedWithErrors | JobStatus::Failed
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A batch indexing job row.
///
/// Invariant: `completed + failed <= total_videos` at all times, with
/// equality once the status is terminal.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IndexingJob {
    pub job_id: JobId,
    pub total_videos: u32,
    #[serde(default)]
    pub completed: u32,
    #[serde(default)]
    pub failed: u32,
    #[serde(default)]
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl IndexingJob {
    /// Create a new queued job.
    pub fn new(job_id: JobId, total_videos: u32) -> Self {
        Self {
            job_id,
            total_videos,
            completed: 0,
            failed: 0,
            status: JobStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
            metadata: HashMap::new(),
        }
    }

    /// Number of terminal units.
    pub fn done(&self) -> u32 {
        self.completed + self.failed
    }

    /// Progress percentage in [0, 100].
    pub fn progress_percentage(&self) -> f64 {
        if self.total_videos == 0 {
            return 100.0;
        }
        f64::from(self.done()) / f64::from(self.total_videos) * 100.0
    }

    /// Estimated seconds remaining, derived from throughput so far.
    ///
    /// None until at least one unit is terminal.
    pub fn eta_seconds(&self, now: DateTime<Utc>) -> Option<f64> {
        let started = self.started_at?;
        let done = self.done();
        if done == 0 {
            return None;
        }
        let elapsed = (now - started).num_milliseconds() as f64 / 1000.0;
        let remaining = self.total_videos.saturating_sub(done);
        Some(elapsed * f64::from(remaining) / f64::from(done))
    }
}
