//! Admin handlers.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Serialize)]
pub struct GcResponse {
    pub removed_vectors: Vec<String>,
    pub removed_temporal: Vec<String>,
}

/// POST /admin/gc — run a garbage collection pass on demand.
pub async fn run_gc(State(state): State<AppState>) -> ApiResult<Json<GcResponse>> {
    let report = state.gc.run().await?;
    Ok(Json(GcResponse {
        removed_vectors: report
            .removed_vectors
            .iter()
            .map(ToString::to_string)
            .collect(),
        removed_temporal: report
            .removed_temporal
            .iter()
            .map(ToString::to_string)
            .collect(),
    }))
}
