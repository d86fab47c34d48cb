//! Worker configuration.

use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent indexing units
    pub max_concurrent_jobs: usize,
    /// Bounded retries per video for transient failures
    pub max_retries: u32,
    /// Base delay of the retry backoff (doubles each attempt)
    pub retry_base_delay: Duration,
    /// How often the garbage collector runs
    pub gc_interval: Duration,
    /// Run shot segmentation before encoding
    pub enable_shot_segmentation: bool,
    /// Run ROI detection before encoding
    pub enable_roi_detection: bool,
    /// Scene-change threshold for shot segmentation
    pub shot_threshold: f64,
    /// Frames sampled for ROI detection
    pub roi_sample_frames: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            max_retries: 3,
            retry_base_delay: Duration::from_secs(60),
            gc_interval: Duration::from_secs(300),
            enable_shot_segmentation: false,
            enable_roi_detection: false,
            shot_threshold: 0.3,
            roi_sample_frames: 120,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_jobs: std::env::var("WORKER_MAX_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_concurrent_jobs),
            max_retries: std::env::var("WORKER_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
            retry_base_delay: Duration::from_secs(
                std::env::var("WORKER_RETRY_BASE_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
            gc_interval: Duration::from_secs(
                std::env::var("GC_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
            enable_shot_segmentation: env_flag("ENABLE_SHOT_SEGMENTATION", false),
            enable_roi_detection: env_flag("ENABLE_ROI_DETECTION", false),
            shot_threshold: std::env::var("SHOT_DETECTION_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.shot_threshold),
            roi_sample_frames: std::env::var("ROI_SAMPLE_FRAMES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.roi_sample_frames),
        }
    }

    /// Backoff delay before the given retry attempt (1-based).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        self.retry_base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}
