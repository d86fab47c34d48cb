//! Anomaly detection over temporal embeddings.
//!
//! A baseline corpus of "normal" videos pins per-dimension temporal
//! variance statistics and the distribution of scalar motion magnitude.
//! Candidates are scored by standardized deviation from that baseline;
//! windowed detection slides over the temporal matrix to localize
//! anomalous intervals.

use std::path::Path;
use std::sync::{Arc, RwLock};

use ndarray::{Array1, Array2, Axis};
use tracing::{info, warn};

use vmatch_encoder::VideoEncoder;
use vmatch_models::{AnomalyReport, AnomalyWindow, BaselineStats};

use crate::error::{SearchError, SearchResult as Result};

const EPSILON: f32 = 1e-8;

/// Default anomaly threshold in combined z-score units.
pub const DEFAULT_THRESHOLD: f32 = 2.0;

/// Default window length for interval detection.
pub const DEFAULT_WINDOW: usize = 16;

/// Per-dimension temporal variance of a matrix (population variance).
pub fn temporal_variance(matrix: &Array2<f32>) -> Array1<f32> {
    matrix.var_axis(Axis(0), 0.0)
}

/// Scalar motion magnitude: mean L2 norm of first differences between
/// consecutive temporal rows.
pub fn motion_magnitude(matrix: &Array2<f32>) -> f32 {
    let rows = matrix.nrows();
    if rows < 2 {
        return 0.0;
    }
    let mut total = 0.0f32;
    for t in 1..rows {
        let diff_sq: f32 = matrix
            .row(t)
            .iter()
            .zip(matrix.row(t - 1).iter())
            .map(|(a, b)| {
                let d = a - b;
                d * d
            })
            .sum();
        total += diff_sq.sqrt();
    }
    total / (rows - 1) as f32
}

/// Aggregate baseline statistics over a set of temporal matrices.
pub fn compute_baseline(matrices: &[Array2<f32>]) -> Option<BaselineStats> {
    if matrices.is_empty() {
        return None;
    }
    let dims = matrices[0].ncols();
    let count = matrices.len() as f32;

    let variances: Vec<Array1<f32>> = matrices.iter().map(temporal_variance).collect();
    let motions: Vec<f32> = matrices.iter().map(motion_magnitude).collect();

    let mut mean_var = Array1::<f32>::zeros(dims);
    for v in &variances {
        mean_var += v;
    }
    mean_var /= count;

    let mut std_var = Array1::<f32>::zeros(dims);
    for v in &variances {
        let diff = v - &mean_var;
        std_var += &(&diff * &diff);
    }
    std_var = (std_var / count).mapv(f32::sqrt);

    let mean_motion = motions.iter().sum::<f32>() / count;
    let std_motion = (motions
        .iter()
        .map(|m| {
            let d = m - mean_motion;
            d * d
        })
        .sum::<f32>()
        / count)
        .sqrt();

    Some(BaselineStats {
        mean_temporal_variance: mean_var.to_vec(),
        std_temporal_variance: std_var.to_vec(),
        mean_motion_magnitude: mean_motion,
        std_motion_magnitude: std_motion,
        num_videos: matrices.len(),
    })
}

/// Score a single temporal matrix against a baseline.
pub fn score_against_baseline(
    baseline: &BaselineStats,
    matrix: &Array2<f32>,
    threshold: f32,
    video_path: &str,
) -> AnomalyReport {
    let motion = motion_magnitude(matrix);
    let motion_z_score =
        (motion - baseline.mean_motion_magnitude) / (baseline.std_motion_magnitude + EPSILON);

    let variance = temporal_variance(matrix);
    let mut z_sum = 0.0f32;
    for ((v, mean), std) in variance
        .iter()
        .zip(&baseline.mean_temporal_variance)
        .zip(&baseline.std_temporal_variance)
    {
        z_sum += (v - mean).abs() / (std + EPSILON);
    }
    let variance_z_score = if variance.is_empty() {
        0.0
    } else {
        z_sum / variance.len() as f32
    };

    let anomaly_score = (motion_z_score.abs() + variance_z_score) / 2.0;
    AnomalyReport {
        video_path: video_path.to_string(),
        is_anomaly: anomaly_score > threshold,
        anomaly_score,
        motion_z_score,
        variance_z_score,
        motion_magnitude: motion,
        threshold,
        confidence: (anomaly_score / threshold * 100.0).min(100.0),
    }
}

/// Find anomalous intervals by sliding a window over the matrix and
/// flagging windows whose motion z-score leaves the ±2 band.
pub fn window_scores(
    baseline: &BaselineStats,
    matrix: &Array2<f32>,
    window_size: usize,
) -> Vec<AnomalyWindow> {
    let total = matrix.nrows();
    if window_size == 0 || total < window_size {
        return Vec::new();
    }

    let mut windows = Vec::new();
    for start in 0..=(total - window_size) {
        let window = matrix.slice(ndarray::s![start..start + window_size, ..]);
        let motion = motion_magnitude(&window.to_owned());
        let z = (motion - baseline.mean_motion_magnitude)
            / (baseline.std_motion_magnitude + EPSILON);
        if z.abs() > 2.0 {
            windows.push(AnomalyWindow {
                frame_start: start,
                frame_end: start + window_size,
                timestamp_start: start as f32 / total as f32,
                timestamp_end: (start + window_size) as f32 / total as f32,
                motion_z_score: z,
                motion_magnitude: motion,
            });
        }
    }
    windows
}

/// Encoder-backed anomaly detector holding the current baseline.
pub struct AnomalyDetector {
    encoder: Arc<dyn VideoEncoder>,
    baseline: RwLock<Option<BaselineStats>>,
}

impl AnomalyDetector {
    pub fn new(encoder: Arc<dyn VideoEncoder>) -> Self {
        Self {
            encoder,
            baseline: RwLock::new(None),
        }
    }

    /// Encode a corpus of normal videos and establish the baseline.
    /// Videos that fail to encode are skipped; at least one must succeed.
    pub async fn establish_baseline(&self, video_paths: &[String]) -> Result<BaselineStats> {
        info!("Establishing baseline from {} videos", video_paths.len());

        let mut matrices = Vec::new();
        for path in video_paths {
            match self.encoder.encode(Path::new(path)).await {
                Ok(encoding) => matrices.push(encoding.temporal),
                Err(e) => warn!("Skipping baseline video {path}: {e}"),
            }
        }

        let stats = compute_baseline(&matrices).ok_or(SearchError::NoValidVideos)?;
        info!(
            "Baseline established: mean motion {:.6}, std motion {:.6}, {} videos",
            stats.mean_motion_magnitude, stats.std_motion_magnitude, stats.num_videos
        );

        *self.baseline.write().expect("baseline lock") = Some(stats.clone());
        Ok(stats)
    }

    /// Current baseline, if one was established.
    pub fn baseline(&self) -> Option<BaselineStats> {
        self.baseline.read().expect("baseline lock").clone()
    }

    /// Score one video against the established baseline.
    pub async fn detect(&self, video_path: &str, threshold: f32) -> Result<AnomalyReport> {
        let baseline = self
            .baseline()
            .ok_or(SearchError::BaselineNotEstablished)?;
        let encoding = self.encoder.encode(Path::new(video_path)).await?;
        Ok(score_against_baseline(
            &baseline,
            &encoding.temporal,
            threshold,
            video_path,
        ))
    }

    /// Localize anomalous intervals within one video.
    pub async fn detect_windows(
        &self,
        video_path: &str,
        window_size: usize,
    ) -> Result<Vec<AnomalyWindow>> {
        let baseline = self
            .baseline()
            .ok_or(SearchError::BaselineNotEstablished)?;
        let encoding = self.encoder.encode(Path::new(video_path)).await?;
        Ok(window_scores(&baseline, &encoding.temporal, window_size))
    }
}
