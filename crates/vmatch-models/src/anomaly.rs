//! Anomaly baseline statistics and detection reports.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Baseline statistics over a corpus of "normal" videos.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineStats {
    /// Per-dimension mean of temporal variance (length D)
    pub mean_temporal_variance: Vec<f32>,
    /// Per-dimension std of temporal variance (length D)
    pub std_temporal_variance: Vec<f32>,
    /// Mean scalar motion magnitude across the corpus
    pub mean_motion_magnitude: f32,
    /// Std of scalar motion magnitude across the corpus
    pub std_motion_magnitude: f32,
    /// Number of videos the baseline was computed from
    pub num_videos: usize,
}

/// Whole-video anomaly verdict.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AnomalyReport {
    pub video_path: String,
    pub is_anomaly: bool,
    pub anomaly_score: f32,
    pub motion_z_score: f32,
    pub variance_z_score: f32,
    pub motion_magnitude: f32,
    pub threshold: f32,
    /// Score relative to the threshold, capped at 100
    pub confidence: f32,
}

/// An anomalous interval found by windowed detection.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AnomalyWindow {
    pub frame_start: usize,
    pub frame_end: usize,
    /// Window start as a fraction of the video's temporal extent
    pub timestamp_start: f32,
    /// Window end as a fraction of the video's temporal extent
    pub timestamp_end: f32,
    pub motion_z_score: f32,
    pub motion_magnitude: f32,
}
