//! Anomaly detection handlers.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use vmatch_models::{AnomalyReport, AnomalyWindow};
use vmatch_search::anomaly::{DEFAULT_THRESHOLD, DEFAULT_WINDOW};

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Serialize)]
pub struct BaselineSummary {
    pub mean_motion_magnitude: f32,
    pub std_motion_magnitude: f32,
    pub num_videos: usize,
}

#[derive(Serialize)]
pub struct BaselineResponse {
    pub baseline: BaselineSummary,
}

/// POST /anomaly/baseline — body is a list of normal-video paths.
pub async fn establish_baseline(
    State(state): State<AppState>,
    Json(video_paths): Json<Vec<String>>,
) -> ApiResult<Json<BaselineResponse>> {
    let stats = state.anomaly.establish_baseline(&video_paths).await?;
    Ok(Json(BaselineResponse {
        baseline: BaselineSummary {
            mean_motion_magnitude: stats.mean_motion_magnitude,
            std_motion_magnitude: stats.std_motion_magnitude,
            num_videos: stats.num_videos,
        },
    }))
}

#[derive(Deserialize)]
pub struct DetectParams {
    pub video_path: String,
    pub threshold: Option<f32>,
}

/// POST /anomaly/detect?video_path=…&threshold=…
pub async fn detect(
    State(state): State<AppState>,
    Query(params): Query<DetectParams>,
) -> ApiResult<Json<AnomalyReport>> {
    let threshold = params.threshold.unwrap_or(DEFAULT_THRESHOLD);
    let report = state.anomaly.detect(&params.video_path, threshold).await?;
    Ok(Json(report))
}

#[derive(Deserialize)]
pub struct WindowParams {
    pub video_path: String,
    pub window_size: Option<usize>,
}

#[derive(Serialize)]
pub struct WindowResponse {
    pub video_path: String,
    pub windows: Vec<AnomalyWindow>,
    pub total_windows: usize,
}

/// POST /anomaly/windows?video_path=…&window_size=…
pub async fn detect_windows(
    State(state): State<AppState>,
    Query(params): Query<WindowParams>,
) -> ApiResult<Json<WindowResponse>> {
    let window_size = params.window_size.unwrap_or(DEFAULT_WINDOW);
    let windows = state
        .anomaly
        .detect_windows(&params.video_path, window_size)
        .await?;
    Ok(Json(WindowResponse {
        video_path: params.video_path,
        total_windows: windows.len(),
        windows,
    }))
}
