//! Video record handlers.

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use vmatch_models::{VideoId, VideoRecord};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// GET /videos/{video_id}
pub async fn get_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
) -> ApiResult<Json<VideoRecord>> {
    let id = VideoId::from(video_id.clone());
    state
        .metadata
        .get_video(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("video {video_id}")))
}

#[derive(Serialize)]
pub struct DeleteResponse {
    pub video_id: String,
    pub deleted: bool,
}

/// DELETE /videos/{video_id} — removes the vector entry, temporal file
/// and metadata row.
pub async fn delete_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
) -> ApiResult<Json<DeleteResponse>> {
    let id = VideoId::from(video_id.clone());
    let deleted = state.pipeline.delete_video(&id).await?;
    if !deleted {
        return Err(ApiError::not_found(format!("video {video_id}")));
    }
    Ok(Json(DeleteResponse {
        video_id,
        deleted,
    }))
}

#[derive(Serialize)]
pub struct ClearResponse {
    pub removed_vectors: usize,
    pub removed_temporal: usize,
    pub removed_metadata: usize,
}

/// DELETE /v1/videos — clears all three stores.
pub async fn clear_videos(State(state): State<AppState>) -> ApiResult<Json<ClearResponse>> {
    let removed_vectors = state.index.count().await?;
    state.index.clear().await?;
    let removed_temporal = state.temporal.clear().await?;
    let removed_metadata = state.metadata.clear_videos().await?;

    Ok(Json(ClearResponse {
        removed_vectors,
        removed_temporal,
        removed_metadata,
    }))
}
