//! Search handlers.

use axum::extract::{Multipart, Path, State};
use axum::Json;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

use vmatch_models::{
    QueryClick, QueryId, SearchOptions, SearchRequest, SearchResponse, VideoId,
};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// POST /search
pub async fn search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> ApiResult<Json<SearchResponse>> {
    if request.query_video_url.trim().is_empty() {
        return Err(ApiError::bad_request("query_video_url must not be empty"));
    }
    let response = state.search.search(&request).await?;
    Ok(Json(response))
}

/// POST /search/upload — multipart `file` plus form fields `top_k` and
/// `enable_reranking`. The uploaded bytes are staged to scratch space
/// for fingerprinting and (on cache miss) encoding, then removed.
pub async fn search_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<SearchResponse>> {
    let mut file_path: Option<std::path::PathBuf> = None;
    let mut top_k: usize = vmatch_models::RESULT_TOP_K;
    let mut enable_reranking = false;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("invalid multipart body: {e}")))?
    {
        let name = field.name().map(String::from);
        match name.as_deref() {
            Some("file") => {
                let dir = std::env::temp_dir().join("vmatch").join("uploads");
                tokio::fs::create_dir_all(&dir)
                    .await
                    .map_err(|e| ApiError::internal(e.to_string()))?;
                let path = dir.join(format!("upload_{}.mp4", uuid::Uuid::new_v4()));

                let mut file = tokio::fs::File::create(&path)
                    .await
                    .map_err(|e| ApiError::internal(e.to_string()))?;
                let mut written = 0u64;
                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("upload aborted: {e}")))?
                {
                    written += chunk.len() as u64;
                    file.write_all(&chunk)
                        .await
                        .map_err(|e| ApiError::internal(e.to_string()))?;
                }
                file.flush()
                    .await
                    .map_err(|e| ApiError::internal(e.to_string()))?;
                if written == 0 {
                    tokio::fs::remove_file(&path).await.ok();
                    return Err(ApiError::bad_request("uploaded file is empty"));
                }
                file_path = Some(path);
            }
            Some("top_k") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()))?;
                top_k = text
                    .trim()
                    .parse()
                    .map_err(|_| ApiError::bad_request("top_k must be an integer"))?;
            }
            Some("enable_reranking") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()))?;
                enable_reranking = matches!(text.trim(), "true" | "1" | "yes");
            }
            _ => {}
        }
    }

    let path = file_path.ok_or_else(|| ApiError::bad_request("missing `file` field"))?;
    let request = SearchRequest {
        query_video_url: path.to_string_lossy().into_owned(),
        top_k,
        filters: None,
        options: Some(SearchOptions { enable_reranking }),
    };

    let result = state.search.search(&request).await;
    tokio::fs::remove_file(&path).await.ok();
    Ok(Json(result?))
}

#[derive(Deserialize)]
pub struct ClickRequest {
    pub video_id: VideoId,
    pub rank: u32,
    pub similarity_score: f32,
}

/// POST /search/{query_id}/click — append-only click feedback.
pub async fn log_click(
    State(state): State<AppState>,
    Path(query_id): Path<String>,
    Json(request): Json<ClickRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let click = QueryClick {
        query_id: QueryId::from_string(query_id),
        video_id: request.video_id,
        rank: request.rank,
        similarity_score: request.similarity_score,
        clicked_at: chrono::Utc::now(),
    };
    state.search.log_click(&click).await?;
    Ok(Json(serde_json::json!({ "status": "logged" })))
}
