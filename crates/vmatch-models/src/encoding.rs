//! Encoder output and shared vector math.

use chrono::{DateTime, Utc};
use ndarray::Array2;

use crate::VideoId;

/// Default global vector dimensionality.
pub const DEFAULT_VECTOR_DIM: usize = 1024;

/// Default number of temporal steps per video.
pub const DEFAULT_NUM_FRAMES: usize = 64;

/// Output of one encoder invocation.
///
/// `global` is L2-normalized; `temporal` rows are not.
#[derive(Debug, Clone)]
pub struct VideoEncoding {
    pub video_id: VideoId,
    pub global: Vec<f32>,
    pub temporal: Array2<f32>,
    pub processing_ms: f32,
    pub created_at: DateTime<Utc>,
}

impl VideoEncoding {
    /// Approximate in-memory size, used for cache budget accounting.
    pub fn byte_size(&self) -> usize {
        (self.global.len() + self.temporal.len()) * std::mem::size_of::<f32>()
    }

    /// Number of temporal steps.
    pub fn num_steps(&self) -> usize {
        self.temporal.nrows()
    }

    /// Vector dimensionality.
    pub fn dimension(&self) -> usize {
        self.global.len()
    }
}

/// Euclidean norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity between two equal-length vectors.
///
/// Returns 0.0 when either vector is (near-)zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let denom = l2_norm(a) * l2_norm(b);
    if denom <= f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}
