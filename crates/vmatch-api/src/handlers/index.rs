//! Indexing handlers.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use vmatch_models::{IndexRequest, IndexStatus, JobId};
use vmatch_worker::SingleIndexOutcome;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Response for a batch submission.
#[derive(Serialize)]
pub struct IndexResponse {
    pub job_id: JobId,
    pub status: &'static str,
    pub total_videos: usize,
}

/// POST /index
pub async fn index_batch(
    State(state): State<AppState>,
    Json(request): Json<IndexRequest>,
) -> ApiResult<Json<IndexResponse>> {
    for submission in &request.videos {
        if submission.video_url.trim().is_empty() {
            return Err(ApiError::bad_request(format!(
                "video {} has an empty URL",
                submission.video_id
            )));
        }
    }

    let total_videos = request.videos.len();
    let job_id = state
        .scheduler
        .submit(request.videos, request.options.unwrap_or_default())
        .await?;

    Ok(Json(IndexResponse {
        job_id,
        status: "queued",
        total_videos,
    }))
}

#[derive(Deserialize)]
pub struct SingleIndexParams {
    pub video_path: String,
    #[serde(default)]
    pub skip_if_exists: bool,
}

#[derive(Serialize)]
pub struct SingleIndexResponse {
    pub status: &'static str,
    pub video_id: String,
}

/// POST /index/single?video_path=…&skip_if_exists=…
pub async fn index_single(
    State(state): State<AppState>,
    Query(params): Query<SingleIndexParams>,
) -> ApiResult<Json<SingleIndexResponse>> {
    let outcome = state
        .scheduler
        .index_single(&params.video_path, params.skip_if_exists)
        .await?;

    let (status, video_id) = match outcome {
        SingleIndexOutcome::Indexed(id) => ("success", id),
        SingleIndexOutcome::Skipped(id) => ("skipped", id),
    };
    Ok(Json(SingleIndexResponse {
        status,
        video_id: video_id.to_string(),
    }))
}

/// GET /index/status/{job_id}
pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<IndexStatus>> {
    let job_id = JobId::from_string(job_id);
    state
        .metadata
        .job_status(&job_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("job {job_id}")))
}

#[derive(Serialize)]
pub struct CancelResponse {
    pub job_id: String,
    pub cancelled: bool,
}

/// POST /index/{job_id}/cancel — queued units fail, in-flight units run
/// to completion.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<CancelResponse>> {
    let id = JobId::from_string(job_id.clone());
    let cancelled = state.scheduler.cancel(&id);
    if !cancelled && state.metadata.get_job(&id).await?.is_none() {
        return Err(ApiError::not_found(format!("job {job_id}")));
    }
    Ok(Json(CancelResponse { job_id, cancelled }))
}
