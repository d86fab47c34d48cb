//! Encoder contract.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use vmatch_models::{l2_norm, VideoEncoding};

use crate::error::{EncoderError, EncoderResult};

/// Encoder service health.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderHealth {
    pub model_loaded: bool,
    pub model_name: String,
    pub device: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_memory_mb: Option<f64>,
}

/// Contract to the embedding function.
///
/// `encode` is deterministic for a given (content, model revision): the
/// global vector is L2-normalized, temporal rows are not. All errors are
/// terminal for the calling pipeline step; the caller owns retry policy.
#[async_trait]
pub trait VideoEncoder: Send + Sync {
    /// Encode a local video file.
    async fn encode(&self, path: &Path) -> EncoderResult<VideoEncoding>;

    /// Global vector dimensionality.
    fn dimension(&self) -> usize;

    /// Service health and device information.
    async fn health(&self) -> EncoderResult<EncoderHealth>;
}

/// Enforce the output contract on a fresh encoding.
///
/// The global vector is renormalized in f64 so downstream inner products
/// are exact cosines; a zero vector or shape mismatch is rejected.
pub fn validate_encoding(mut encoding: VideoEncoding, dimension: usize) -> EncoderResult<VideoEncoding> {
    if encoding.global.len() != dimension {
        return Err(EncoderError::InvalidOutput(format!(
            "global vector has dimension {}, expected {}",
            encoding.global.len(),
            dimension
        )));
    }
    if encoding.temporal.ncols() != dimension {
        return Err(EncoderError::InvalidOutput(format!(
            "temporal matrix has {} columns, expected {}",
            encoding.temporal.ncols(),
            dimension
        )));
    }
    if encoding.temporal.nrows() == 0 {
        return Err(EncoderError::InvalidOutput(
            "temporal matrix has no rows".to_string(),
        ));
    }

    let norm = encoding
        .global
        .iter()
        .map(|&x| f64::from(x) * f64::from(x))
        .sum::<f64>()
        .sqrt();
    if norm <= f64::EPSILON {
        return Err(EncoderError::InvalidOutput(
            "global vector is zero".to_string(),
        ));
    }
    if (norm - 1.0).abs() > 1e-3 {
        return Err(EncoderError::InvalidOutput(format!(
            "global vector norm is {norm}, expected 1.0"
        )));
    }
    for x in &mut encoding.global {
        *x = (f64::from(*x) / norm) as f32;
    }

    debug_assert!((l2_norm(&encoding.global) - 1.0).abs() < 1e-4);
    Ok(encoding)
}
