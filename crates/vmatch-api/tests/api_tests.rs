//! Router integration tests over in-memory stores.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use vmatch_api::{create_router, ApiConfig, AppState};
use vmatch_encoder::{OfflineEncoder, VideoEncoder};
use vmatch_index::{MemoryVectorIndex, VectorIndex};
use vmatch_metadata::MetadataStore;
use vmatch_search::SearchConfig;
use vmatch_storage::{QueryCache, QueryCacheConfig, StorageLayout, TemporalStore};
use vmatch_worker::WorkerConfig;

const DIM: usize = 32;
const STEPS: usize = 8;

struct TestApp {
    _dir: tempfile::TempDir,
    root: std::path::PathBuf,
    app: Router,
}

fn test_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let layout = StorageLayout::new(&root);
    layout.ensure_dirs().unwrap();

    let encoder: Arc<dyn VideoEncoder> = Arc::new(OfflineEncoder::new(DIM, STEPS));
    let index: Arc<dyn VectorIndex> = Arc::new(MemoryVectorIndex::new(DIM));
    let metadata = Arc::new(MetadataStore::open_in_memory().unwrap());
    let temporal = TemporalStore::new(layout.temporal_dir());
    let cache = Arc::new(QueryCache::new(QueryCacheConfig::new(
        layout.query_cache_dir(),
    )));

    let state = AppState::with_components(
        ApiConfig::default(),
        encoder,
        index,
        metadata,
        temporal,
        cache,
        layout,
        WorkerConfig {
            retry_base_delay: Duration::from_millis(5),
            ..Default::default()
        },
        SearchConfig::default(),
        "offline-hash".to_string(),
        "cpu".to_string(),
    );

    TestApp {
        _dir: dir,
        root,
        app: create_router(state, None),
    }
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_reports_model_loaded() {
    let test = test_app();
    let response = test
        .app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["model_loaded"], true);
    assert_eq!(json["device"], "cpu");
}

#[tokio::test]
async fn stats_reports_vector_dim() {
    let test = test_app();
    let response = test
        .app
        .oneshot(Request::builder().uri("/stats").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["total_videos"], 0);
    assert_eq!(json["vector_dim"], DIM as i64);
}

#[tokio::test]
async fn unknown_job_status_is_404() {
    let test = test_app();
    let response = test
        .app
        .oneshot(
            Request::builder()
                .uri("/index/status/no-such-job")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["code"], "not_found");
}

#[tokio::test]
async fn batch_index_then_status_then_search() {
    let test = test_app();

    let video_a = test.root.join("a.bin");
    std::fs::write(&video_a, b"video a bytes").unwrap();
    let video_b = test.root.join("b.bin");
    std::fs::write(&video_b, b"video b bytes").unwrap();

    // Submit the batch.
    let body = serde_json::json!({
        "videos": [
            {"video_id": "a", "video_url": video_a.to_string_lossy()},
            {"video_id": "b", "video_url": video_b.to_string_lossy()},
        ]
    });
    let response = test
        .app
        .clone()
        .oneshot(json_request("POST", "/index", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "queued");
    assert_eq!(json["total_videos"], 2);
    let job_id = json["job_id"].as_str().unwrap().to_string();

    // Poll until terminal.
    let mut status_json = serde_json::Value::Null;
    for _ in 0..200 {
        let response = test
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/index/status/{job_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        status_json = body_json(response).await;
        if status_json["status"] == "completed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(status_json["status"], "completed", "{status_json}");
    assert_eq!(status_json["completed"], 2);
    assert_eq!(status_json["failed"], 0);
    assert_eq!(status_json["progress_percentage"], 100.0);

    // Search with A as the query: exact hit at rank 1.
    let body = serde_json::json!({
        "query_video_url": video_a.to_string_lossy(),
        "top_k": 2,
    });
    let response = test
        .app
        .clone()
        .oneshot(json_request("POST", "/search", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["total_results"], 2);
    assert_eq!(json["results"][0]["video_id"], "a");
    assert!(json["results"][0]["similarity_score"].as_f64().unwrap() >= 0.999);

    // Video record is exposed.
    let response = test
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/videos/a")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "completed");

    // Clear everything.
    let response = test
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/v1/videos")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["removed_vectors"], 2);
    assert_eq!(json["removed_metadata"], 2);

    let response = test
        .app
        .oneshot(Request::builder().uri("/stats").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["total_videos"], 0);
}

#[tokio::test]
async fn single_index_skip_if_exists() {
    let test = test_app();
    let video = test.root.join("walk.bin");
    std::fs::write(&video, b"walking").unwrap();
    let path = video.to_string_lossy();

    let uri = format!("/index/single?video_path={path}&skip_if_exists=true");
    let response = test
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(&uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "success");
    assert_eq!(json["video_id"], "walk");

    let response = test
        .app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(&uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["status"], "skipped");
}

#[tokio::test]
async fn search_rejects_empty_query_url() {
    let test = test_app();
    let response = test
        .app
        .oneshot(json_request(
            "POST",
            "/search",
            serde_json::json!({"query_video_url": "  "}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn anomaly_endpoints_roundtrip() {
    let test = test_app();

    // Ten "normal" videos with identical content would collapse to one
    // fingerprint; vary them slightly.
    let mut paths = Vec::new();
    for i in 0..10 {
        let path = test.root.join(format!("normal_{i}.bin"));
        std::fs::write(&path, format!("normal video {i}")).unwrap();
        paths.push(path.to_string_lossy().into_owned());
    }

    let response = test
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            "/anomaly/baseline",
            serde_json::json!(paths),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["baseline"]["num_videos"], 10);

    // A content-hashed "normal-like" video scores like the corpus.
    let probe = test.root.join("probe.bin");
    std::fs::write(&probe, b"normal video probe").unwrap();
    let uri = format!(
        "/anomaly/detect?video_path={}&threshold=2.0",
        probe.to_string_lossy()
    );
    let response = test
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(&uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert!(json["anomaly_score"].is_number());
    assert_eq!(json["threshold"], 2.0);

    // Windowed detection responds with a list.
    let uri = format!("/anomaly/windows?video_path={}", probe.to_string_lossy());
    let response = test
        .app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(&uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert!(json["windows"].is_array());
}

#[tokio::test]
async fn detect_without_baseline_is_rejected() {
    let test = test_app();
    let probe = test.root.join("probe.bin");
    std::fs::write(&probe, b"bytes").unwrap();
    let uri = format!("/anomaly/detect?video_path={}", probe.to_string_lossy());
    let response = test
        .app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(&uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
