//! Deterministic offline encoder.
//!
//! Derives embeddings from a SHA-256 seed of the file contents, so
//! identical bytes always produce identical vectors. Used when no encoder
//! service is available (`ENCODER_MODE=offline`) and throughout the test
//! suite; it honours the same output contract as the real encoder.

use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use ndarray::Array2;
use sha2::{Digest, Sha256};
use tokio::fs;

use vmatch_models::{VideoEncoding, VideoId, DEFAULT_NUM_FRAMES, DEFAULT_VECTOR_DIM};

use crate::error::{EncoderError, EncoderResult};
use crate::gateway::{validate_encoding, EncoderHealth, VideoEncoder};

/// Deterministic content-seeded encoder.
#[derive(Debug, Clone)]
pub struct OfflineEncoder {
    dimension: usize,
    num_steps: usize,
}

impl OfflineEncoder {
    pub fn new(dimension: usize, num_steps: usize) -> Self {
        Self {
            dimension,
            num_steps,
        }
    }

    /// Encode a raw byte buffer (the file-reading step factored out).
    pub fn encode_bytes(&self, bytes: &[u8]) -> VideoEncoding {
        let digest = Sha256::digest(bytes);
        let mut seed = u64::from_le_bytes(digest[..8].try_into().expect("8-byte slice"));

        let mut temporal = Array2::zeros((self.num_steps, self.dimension));
        for t in 0..self.num_steps {
            for d in 0..self.dimension {
                temporal[[t, d]] = unit_float(&mut seed);
            }
        }

        // Global vector: normalized temporal mean, accumulated in f64.
        let mut sums = vec![0f64; self.dimension];
        for row in temporal.rows() {
            for (acc, &x) in sums.iter_mut().zip(row.iter()) {
                *acc += f64::from(x);
            }
        }
        let norm = sums.iter().map(|x| x * x).sum::<f64>().sqrt().max(1e-12);
        let global: Vec<f32> = sums.iter().map(|x| (x / norm) as f32).collect();

        VideoEncoding {
            video_id: VideoId::new(),
            global,
            temporal,
            processing_ms: 0.0,
            created_at: chrono::Utc::now(),
        }
    }
}

impl Default for OfflineEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_VECTOR_DIM, DEFAULT_NUM_FRAMES)
    }
}

/// splitmix64 step.
fn next_u64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Uniform float in [-1, 1).
fn unit_float(state: &mut u64) -> f32 {
    let bits = next_u64(state) >> 40; // 24 significant bits
    (bits as f32 / (1u64 << 23) as f32) - 1.0
}

#[async_trait]
impl VideoEncoder for OfflineEncoder {
    async fn encode(&self, path: &Path) -> EncoderResult<VideoEncoding> {
        if !path.exists() {
            return Err(EncoderError::Decode(format!(
                "video file not found: {}",
                path.display()
            )));
        }

        let start = Instant::now();
        let bytes = fs::read(path).await?;
        if bytes.is_empty() {
            return Err(EncoderError::Decode(format!(
                "empty video file: {}",
                path.display()
            )));
        }

        let mut encoding = self.encode_bytes(&bytes);
        encoding.processing_ms = start.elapsed().as_secs_f32() * 1000.0;
        validate_encoding(encoding, self.dimension)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn health(&self) -> EncoderResult<EncoderHealth> {
        Ok(EncoderHealth {
            model_loaded: true,
            model_name: "offline-hash".to_string(),
            device: "cpu".to_string(),
            gpu_memory_mb: None,
        })
    }
}
