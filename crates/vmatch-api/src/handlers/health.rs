//! Health and stats handlers.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::error::ApiResult;
use crate::state::AppState;

/// Health response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub model_loaded: bool,
    pub device: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_memory_mb: Option<f64>,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    match state.encoder.health().await {
        Ok(health) => Json(HealthResponse {
            status: if health.model_loaded {
                "healthy".to_string()
            } else {
                "degraded".to_string()
            },
            model_loaded: health.model_loaded,
            device: health.device,
            gpu_memory_mb: health.gpu_memory_mb,
        }),
        Err(e) => {
            tracing::warn!("Encoder health check failed: {e}");
            Json(HealthResponse {
                status: "degraded".to_string(),
                model_loaded: false,
                device: state.device.clone(),
                gpu_memory_mb: None,
            })
        }
    }
}

/// Stats response.
#[derive(Serialize)]
pub struct StatsResponse {
    pub total_videos: usize,
    pub model_name: String,
    pub device: String,
    pub vector_dim: usize,
}

/// GET /stats
pub async fn stats(State(state): State<AppState>) -> ApiResult<Json<StatsResponse>> {
    let total_videos = state.index.count().await?;
    Ok(Json(StatsResponse {
        total_videos,
        model_name: state.model_name.clone(),
        device: state.device.clone(),
        vector_dim: state.encoder.dimension(),
    }))
}
