//! HTTP client for the external encoder service.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use ndarray::Array2;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use vmatch_models::{VideoEncoding, VideoId, DEFAULT_VECTOR_DIM};

use crate::error::{EncoderError, EncoderResult};
use crate::gateway::{validate_encoding, EncoderHealth, VideoEncoder};

/// Configuration for the encoder client.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// Base URL of the encoder service
    pub base_url: String,
    /// Encoder model identifier, reported through /stats
    pub model_name: String,
    /// Global vector dimensionality
    pub dimension: usize,
    /// Per-request timeout
    pub timeout: Duration,
    /// Max internal retries for transient failures
    pub max_retries: u32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8001".to_string(),
            model_name: "vjepa2-vitl-fpc64-256".to_string(),
            dimension: DEFAULT_VECTOR_DIM,
            timeout: Duration::from_secs(120),
            max_retries: 2,
        }
    }
}

impl EncoderConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("ENCODER_URL").unwrap_or(defaults.base_url),
            model_name: std::env::var("ENCODER_MODEL").unwrap_or(defaults.model_name),
            dimension: std::env::var("VECTOR_DIM")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.dimension),
            timeout: Duration::from_secs(
                std::env::var("ENCODE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(120),
            ),
            max_retries: std::env::var("ENCODER_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
        }
    }
}

#[derive(Debug, Serialize)]
struct EncodeRequest<'a> {
    video_path: &'a str,
}

#[derive(Debug, Deserialize)]
struct EncodeResponse {
    global: Vec<f32>,
    /// Row-major [T, D]
    temporal: Vec<Vec<f32>>,
    processing_ms: f32,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    #[serde(default)]
    model_loaded: bool,
    #[serde(default)]
    model_name: Option<String>,
    #[serde(default)]
    device: Option<String>,
    #[serde(default)]
    gpu_memory_mb: Option<f64>,
}

/// Client for the encoder service.
pub struct HttpEncoder {
    http: Client,
    config: EncoderConfig,
}

impl HttpEncoder {
    /// Create a new encoder client.
    pub fn new(config: EncoderConfig) -> EncoderResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(EncoderError::Network)?;
        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> EncoderResult<Self> {
        Self::new(EncoderConfig::from_env())
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    async fn post_encode(&self, path: &str) -> EncoderResult<EncodeResponse> {
        let url = format!("{}/encode", self.config.base_url);
        let response = self
            .http
            .post(&url)
            .json(&EncodeRequest { video_path: path })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EncoderError::Timeout(self.config.timeout.as_secs())
                } else {
                    EncoderError::Network(e)
                }
            })?;

        match response.status() {
            status if status.is_success() => Ok(response.json().await?),
            StatusCode::UNPROCESSABLE_ENTITY | StatusCode::BAD_REQUEST => {
                Err(EncoderError::Decode(body_text(response).await))
            }
            StatusCode::SERVICE_UNAVAILABLE | StatusCode::INSUFFICIENT_STORAGE => {
                Err(EncoderError::Resource(body_text(response).await))
            }
            status => Err(EncoderError::Model(format!(
                "encoder returned {status}: {}",
                body_text(response).await
            ))),
        }
    }

    /// Execute with bounded retry on transient failures.
    async fn with_retry<F, Fut, T>(&self, operation: F) -> EncoderResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = EncoderResult<T>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = Duration::from_millis(500 * 2u64.pow(attempt));
                    warn!(
                        "Encode request failed (attempt {}), retrying in {:?}: {}",
                        attempt + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| EncoderError::Model("unknown error".to_string())))
    }
}

async fn body_text(response: reqwest::Response) -> String {
    response.text().await.unwrap_or_default()
}

#[async_trait]
impl VideoEncoder for HttpEncoder {
    async fn encode(&self, path: &Path) -> EncoderResult<VideoEncoding> {
        if !path.exists() {
            return Err(EncoderError::Decode(format!(
                "video file not found: {}",
                path.display()
            )));
        }

        let path_str = path.to_string_lossy();
        debug!("Encoding {} via {}", path_str, self.config.base_url);

        let response = self.with_retry(|| self.post_encode(&path_str)).await?;

        let rows = response.temporal.len();
        let cols = response.temporal.first().map_or(0, Vec::len);
        let flat: Vec<f32> = response.temporal.into_iter().flatten().collect();
        let temporal = Array2::from_shape_vec((rows, cols), flat)
            .map_err(|e| EncoderError::InvalidOutput(format!("ragged temporal matrix: {e}")))?;

        let encoding = VideoEncoding {
            video_id: VideoId::new(),
            global: response.global,
            temporal,
            processing_ms: response.processing_ms,
            created_at: chrono::Utc::now(),
        };

        validate_encoding(encoding, self.config.dimension)
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    async fn health(&self) -> EncoderResult<EncoderHealth> {
        let url = format!("{}/health", self.config.base_url);
        let response: HealthResponse = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(EncoderHealth {
            model_loaded: response.model_loaded || response.status == "healthy",
            model_name: response
                .model_name
                .unwrap_or_else(|| self.config.model_name.clone()),
            device: response.device.unwrap_or_else(|| "unknown".to_string()),
            gpu_memory_mb: response.gpu_memory_mb,
        })
    }
}
