use tango_uploads::config::Config;
use tango_uploads::handlers::{abort_upload, health_check, upload_chunk, upload_status};
use tango_uploads::models::{ChunkUploadResponse, RawChunkRequest};
use tango_uploads::server::api_routes;
use tango_uploads::state::AppState;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, Request, StatusCode};
use axum::Json;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;

fn state_for(dir: &std::path::Path) -> Arc<AppState> {
    Arc::new(AppState::new(dir.to_path_buf(), Duration::from_millis(1), 64))
}

fn chunk_request(upload_id: &str, index: i64, total: i64, data: &[u8]) -> RawChunkRequest {
    RawChunkRequest {
        upload_id: Some(upload_id.to_string()),
        chunk_index: Some(index),
        total_chunks: Some(total),
        filename: Some("flyer.png".to_string()),
        chunk: Some(STANDARD.encode(data)),
    }
}

#[tokio::test]
async fn test_health_check() {
    let temp_dir = tempfile::tempdir().unwrap();
    let response = health_check(State(state_for(temp_dir.path()))).await;
    assert_eq!(response.0["status"], "healthy");
    assert_eq!(response.0["activeUploads"], 0);
}

#[tokio::test]
async fn test_upload_chunks_then_complete() {
    let temp_dir = tempfile::tempdir().unwrap();
    let state = state_for(temp_dir.path());

    let response = upload_chunk(State(state.clone()), None, Ok(Json(chunk_request("up", 1, 2, b"world"))))
        .await
        .unwrap();
    match response.0 {
        ChunkUploadResponse::Progress(progress) => {
            assert!(progress.success);
            assert_eq!(progress.chunk_index, 1);
            assert_eq!(progress.received, 1);
            assert_eq!(progress.total, 2);
        }
        other => panic!("expected progress, got {:?}", other),
    }

    let response = upload_chunk(State(state.clone()), None, Ok(Json(chunk_request("up", 0, 2, b"hello"))))
        .await
        .unwrap();
    let done = match response.0 {
        ChunkUploadResponse::Complete(done) => done,
        other => panic!("expected completion, got {:?}", other),
    };
    assert!(done.success);
    assert_eq!(done.size, 10);
    assert!(done.filename.starts_with("flyer-"));
    assert!(done.filename.ends_with(".png"));
    assert_eq!(done.path, format!("/uploads/chunked/{}", done.filename));

    // Check final file
    let content = std::fs::read_to_string(temp_dir.path().join(&done.filename)).unwrap();
    assert_eq!(content, "helloworld");
    assert!(state.registry.is_empty());
}

#[tokio::test]
async fn test_missing_field_is_rejected_without_side_effects() {
    let temp_dir = tempfile::tempdir().unwrap();
    let state = state_for(temp_dir.path());

    let mut request = chunk_request("up", 0, 1, b"data");
    request.total_chunks = None;

    let (status, body) = upload_chunk(State(state.clone()), None, Ok(Json(request)))
        .await
        .unwrap_err();
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body.0.error, "missing_field");
    assert!(body.0.message.contains("totalChunks"));

    let mut request = chunk_request("up", 0, 1, b"data");
    request.filename = None;
    let (status, _) = upload_chunk(State(state.clone()), None, Ok(Json(request)))
        .await
        .unwrap_err();
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(state.registry.is_empty());
    assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_oversized_total_chunks_rejected() {
    let temp_dir = tempfile::tempdir().unwrap();
    let state = state_for(temp_dir.path());
    let app = api_routes(state.clone(), &Config::from_env());

    let body = serde_json::json!({
        "uploadId": "huge",
        "chunkIndex": 0,
        "totalChunks": i64::MAX,
        "filename": "a.bin",
        "chunk": STANDARD.encode(b"x"),
    });
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/upload/chunked")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"], "invalid_field");

    // one past the configured limit
    let (status, _) = upload_chunk(State(state.clone()), None, Ok(Json(chunk_request("big", 0, 65, b"x"))))
        .await
        .unwrap_err();
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(state.registry.is_empty());
}

#[tokio::test]
async fn test_divergent_total_chunks_rejected() {
    let temp_dir = tempfile::tempdir().unwrap();
    let state = state_for(temp_dir.path());

    upload_chunk(State(state.clone()), None, Ok(Json(chunk_request("up", 0, 3, b"a"))))
        .await
        .unwrap();
    let (status, body) = upload_chunk(State(state.clone()), None, Ok(Json(chunk_request("up", 1, 2, b"b"))))
        .await
        .unwrap_err();

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body.0.error, "total_chunks_mismatch");
    assert_eq!(state.registry.progress("up").unwrap().received, 1);
}

#[tokio::test]
async fn test_upload_status() {
    let temp_dir = tempfile::tempdir().unwrap();
    let state = state_for(temp_dir.path());

    upload_chunk(State(state.clone()), None, Ok(Json(chunk_request("up", 2, 4, b"c"))))
        .await
        .unwrap();

    let progress = upload_status(State(state.clone()), Path("up".to_string())).await.unwrap();
    assert_eq!(progress.0.received, 1);
    assert_eq!(progress.0.total_chunks, 4);
    assert_eq!(progress.0.missing, vec![0, 1, 3]);

    let (status, body) = upload_status(State(state.clone()), Path("nope".to_string()))
        .await
        .unwrap_err();
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body.0.error, "unknown_upload");
}

#[tokio::test]
async fn test_abort_upload() {
    let temp_dir = tempfile::tempdir().unwrap();
    let state = state_for(temp_dir.path());

    upload_chunk(State(state.clone()), None, Ok(Json(chunk_request("up", 0, 3, b"a"))))
        .await
        .unwrap();
    upload_chunk(State(state.clone()), None, Ok(Json(chunk_request("up", 1, 3, b"b"))))
        .await
        .unwrap();

    let response = abort_upload(State(state.clone()), Path("up".to_string())).await.unwrap();
    assert!(response.0.success);
    assert_eq!(response.0.discarded_chunks, 2);
    assert!(state.registry.is_empty());

    // abort non-existent
    let result = abort_upload(State(state.clone()), Path("up".to_string())).await;
    assert_eq!(result.err().unwrap().0, StatusCode::NOT_FOUND);

    // the same id starts over
    let response = upload_chunk(State(state.clone()), None, Ok(Json(chunk_request("up", 2, 3, b"c"))))
        .await
        .unwrap();
    assert!(matches!(response.0, ChunkUploadResponse::Progress(ref p) if p.received == 1));
}

#[tokio::test]
async fn test_failed_write_drops_session() {
    let temp_dir = tempfile::tempdir().unwrap();
    // a regular file where the upload directory should be
    let blocker = temp_dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"x").unwrap();
    let state = state_for(&blocker.join("uploads"));

    let (status, body) = upload_chunk(State(state.clone()), None, Ok(Json(chunk_request("up", 0, 1, b"a"))))
        .await
        .unwrap_err();
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body.0.error, "io_error");
    assert!(!state.registry.contains("up"));
}

#[tokio::test]
async fn test_multipart_chunk_route() {
    let temp_dir = tempfile::tempdir().unwrap();
    let state = state_for(temp_dir.path());
    let mut config = Config::from_env();
    config.upload_dir = temp_dir.path().to_path_buf();
    let app = api_routes(state.clone(), &config);

    let boundary = "tangoboundary";
    let mut body = Vec::new();
    for (name, value) in [("uploadId", "form-up"), ("chunkIndex", "0"), ("totalChunks", "1"), ("filename", "notes.txt")] {
        body.extend_from_slice(
            format!("--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n", boundary, name, value).as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"chunk\"; filename=\"blob\"\r\nContent-Type: application/octet-stream\r\n\r\n",
            boundary
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"raw bytes");
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/upload/chunked/form")
                .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={}", boundary))
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let parsed: ChunkUploadResponse = serde_json::from_slice(&bytes).unwrap();
    let done = match parsed {
        ChunkUploadResponse::Complete(done) => done,
        other => panic!("expected completion, got {:?}", other),
    };
    assert_eq!(std::fs::read(temp_dir.path().join(&done.filename)).unwrap(), b"raw bytes");
}

#[tokio::test]
async fn test_malformed_json_body() {
    let temp_dir = tempfile::tempdir().unwrap();
    let state = state_for(temp_dir.path());
    let app = api_routes(state, &Config::from_env());

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/upload/chunked")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"], "malformed_body");
}
