//! API routes.

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::handlers::admin::run_gc;
use crate::handlers::anomaly::{detect, detect_windows, establish_baseline};
use crate::handlers::health::{health, stats};
use crate::handlers::index::{cancel_job, index_batch, index_single, job_status};
use crate::handlers::search::{log_click, search, search_upload};
use crate::handlers::videos::{clear_videos, delete_video, get_video};
use crate::middleware::{cors_layer, request_id, request_logging};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let index_routes = Router::new()
        .route("/index", post(index_batch))
        .route("/index/single", post(index_single))
        .route("/index/status/:job_id", get(job_status))
        .route("/index/:job_id/cancel", post(cancel_job));

    let search_routes = Router::new()
        .route("/search", post(search))
        .route("/search/upload", post(search_upload))
        .route("/search/:query_id/click", post(log_click));

    let video_routes = Router::new()
        .route("/videos/:video_id", get(get_video))
        .route("/videos/:video_id", delete(delete_video))
        .route("/v1/videos", delete(clear_videos));

    let anomaly_routes = Router::new()
        .route("/anomaly/baseline", post(establish_baseline))
        .route("/anomaly/detect", post(detect))
        .route("/anomaly/windows", post(detect_windows));

    let admin_routes = Router::new().route("/admin/gc", post(run_gc));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats));

    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    let max_body_size = state.config.max_body_size;
    let cors_origins = state.config.cors_origins.clone();

    Router::new()
        .merge(index_routes)
        .merge(search_routes)
        .merge(video_routes)
        .merge(anomaly_routes)
        .merge(admin_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&cors_origins))
        .with_state(state)
}
