//! End-to-end flows through the HTTP router: prepare, chunk upload, EOF,
//! reconciliation, listing, and download.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use driftsync::api::AppState;
use driftsync::blobstore::{BlobStore, LocalFsBlobStore};
use driftsync::broker::{NotifyProducer, SseConsumer, StreamSyncBroker, SubscriberRegistry};
use driftsync::files::{CHUNK_SIZE, ChunkService, DownloadService, MetadataService};
use driftsync::queue::{Queue, RECONCILE_PARTITION, SqliteQueue};
use driftsync::supervisor::{NotificationPublisher, ReconcileExecutor};
use driftsync::tokens::{Token, TokenStore};
use driftsync::workers::Processor;
use driftsync::{SyncStore, create_router};

struct TestApp {
    router: Router,
    store: SyncStore,
    queue: Arc<dyn Queue>,
    access_token: String,
    _dirs: (tempfile::TempDir, tempfile::TempDir),
}

async fn test_app() -> TestApp {
    let db_dir = tempfile::tempdir().unwrap();
    let blob_dir = tempfile::tempdir().unwrap();

    let store = SyncStore::with_path(db_dir.path().join("meta.db")).unwrap();
    let queue: Arc<dyn Queue> = Arc::new(
        SqliteQueue::new(store.clone()).with_poll_interval(Duration::from_millis(5)),
    );
    let blobs: Arc<dyn BlobStore> = Arc::new(LocalFsBlobStore::new(blob_dir.path()));

    let cancel = CancellationToken::new();
    let mut registry = SubscriberRegistry::new("test_file_events");
    registry.start(cancel.clone());
    let registry = Arc::new(registry);

    let mut syncer = StreamSyncBroker::new(
        "test_update_syncer",
        NotifyProducer::new(queue.clone()),
        SseConsumer::new(registry.clone()),
    );
    syncer.start(cancel.clone());

    let token = Token::for_user("user-1");
    store.create(&token).await.unwrap();

    let state = AppState {
        metadata: MetadataService::new(store.clone(), queue.clone()),
        chunks: ChunkService::new(store.clone(), blobs.clone()),
        downloads: DownloadService::new(store.clone(), blobs),
        token_store: Arc::new(store.clone()),
        registry,
        syncer: Arc::new(syncer),
    };

    TestApp {
        router: create_router(state),
        store,
        queue,
        access_token: token.access_token,
        _dirs: (db_dir, blob_dir),
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, json)
}

fn digest_of(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn prepare_body(digest: &str, file_size: i64, chunks: i32) -> Body {
    Body::from(
        serde_json::json!({
            "fileName": "a.pdf",
            "fileType": "application/pdf",
            "fileSize": file_size,
            "digest": digest,
            "chunks": chunks,
        })
        .to_string(),
    )
}

async fn prepare_file(app: &TestApp, digest: &str) -> (String, String) {
    let request = Request::post("/my/files")
        .header("X-Access-Token", format!("Bearer {}", app.access_token))
        .header(header::CONTENT_TYPE, "application/json")
        .body(prepare_body(digest, CHUNK_SIZE + 1, 2))
        .unwrap();
    let (status, json) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["success"], true);

    (
        json["data"]["fileID"].as_str().unwrap().to_string(),
        json["data"]["streamToken"].as_str().unwrap().to_string(),
    )
}

const BOUNDARY: &str = "test-boundary-7f93a2";

fn multipart_chunk_body(chunk_id: i64, next_chunk_id: i64, digest: &str, data: &[u8]) -> Body {
    let mut body = Vec::new();
    for (name, value) in [
        ("id", chunk_id.to_string()),
        ("nextChunkID", next_chunk_id.to_string()),
        ("chunkDigest", digest.to_string()),
        ("chunkSize", data.len().to_string()),
    ] {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"data\"; filename=\"blob\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    Body::from(body)
}

async fn upload_chunk(
    app: &TestApp,
    file_id: &str,
    stream_token: &str,
    chunk_id: i64,
    next_chunk_id: i64,
    data: &[u8],
) -> (StatusCode, serde_json::Value) {
    let request = Request::patch(format!("/my/files/{file_id}/chunks"))
        .header("X-Access-Token", format!("Bearer {}", app.access_token))
        .header("X-Stream-Token", format!("Bearer {stream_token}"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(multipart_chunk_body(
            chunk_id,
            next_chunk_id,
            &digest_of(data),
            data,
        ))
        .unwrap();
    send(&app.router, request).await
}

async fn mark_eof(app: &TestApp, file_id: &str, stream_token: &str) {
    let request = Request::put(format!("/my/files/{file_id}/eof"))
        .header("X-Access-Token", format!("Bearer {}", app.access_token))
        .header("X-Stream-Token", format!("Bearer {stream_token}"))
        .body(Body::empty())
        .unwrap();
    let (status, json) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["eof"], true);
}

/// Drain the reconciliation partition through the executor, standing in for
/// the background supervisor.
async fn run_reconciliation(app: &TestApp) {
    let executor = ReconcileExecutor::new(
        app.store.clone(),
        NotificationPublisher::new(app.queue.clone()),
    );
    while let Some(payload) = app
        .queue
        .dequeue(RECONCILE_PARTITION, Duration::from_millis(50))
        .await
        .unwrap()
    {
        executor.process(vec![payload]).await.unwrap();
    }
}

#[tokio::test]
async fn missing_access_token_is_unauthorized() {
    let app = test_app().await;

    let request = Request::post("/my/files")
        .header(header::CONTENT_TYPE, "application/json")
        .body(prepare_body("digest", CHUNK_SIZE, 1))
        .unwrap();
    let (status, json) = send(&app.router, request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["success"], false);
    assert_eq!(json["error"]["message"], "unauthorized");
}

#[tokio::test]
async fn prepare_rejects_declared_chunk_mismatch() {
    let app = test_app().await;

    let request = Request::post("/my/files")
        .header("X-Access-Token", format!("Bearer {}", app.access_token))
        .header(header::CONTENT_TYPE, "application/json")
        .body(prepare_body("digest", CHUNK_SIZE + 1, 5))
        .unwrap();
    let (status, json) = send(&app.router, request).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["error"]["message"], "chunks_size_invalid");
    assert_eq!(json["error"]["httpStatus"], 422);
}

#[tokio::test]
async fn fresh_upload_completes_and_lists_as_current() {
    let app = test_app().await;

    let chunk0 = vec![0xA5u8; 64];
    let chunk1 = vec![0x5Au8; 32];
    let (file_id, stream_token) = prepare_file(&app, "digest-s1").await;

    let (status, json) = upload_chunk(&app, &file_id, &stream_token, 0, 1, &chunk0).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["data"]["chunkID"], 0);
    assert_eq!(json["data"]["nextChunkID"], 1);

    let (status, _) = upload_chunk(&app, &file_id, &stream_token, 1, -1, &chunk1).await;
    assert_eq!(status, StatusCode::CREATED);

    mark_eof(&app, &file_id, &stream_token).await;
    run_reconciliation(&app).await;

    let row = app.store.find_version(&file_id, "user-1").unwrap().unwrap();
    assert!(row.current_flag);
    assert_eq!(row.upload_status, "completed");

    let request = Request::get("/my/files")
        .header("X-Access-Token", format!("Bearer {}", app.access_token))
        .body(Body::empty())
        .unwrap();
    let (status, json) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::OK);
    let files = json["data"]["files"].as_array().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["fileID"], file_id.as_str());
    assert_eq!(files[0]["uploadStatus"], "completed");
    assert!(files[0]["chunks"]["0"].is_object());
    assert!(files[0]["chunks"]["1"].is_object());
    assert_eq!(json["data"]["hasMore"], false);
}

#[tokio::test]
async fn duplicate_prepare_is_rejected() {
    let app = test_app().await;

    let (file_id, stream_token) = prepare_file(&app, "digest-s3").await;
    let (status, _) = upload_chunk(&app, &file_id, &stream_token, 0, 1, b"one").await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = upload_chunk(&app, &file_id, &stream_token, 1, -1, b"two").await;
    assert_eq!(status, StatusCode::CREATED);
    mark_eof(&app, &file_id, &stream_token).await;
    run_reconciliation(&app).await;

    let request = Request::post("/my/files")
        .header("X-Access-Token", format!("Bearer {}", app.access_token))
        .header(header::CONTENT_TYPE, "application/json")
        .body(prepare_body("digest-s3", CHUNK_SIZE + 1, 2))
        .unwrap();
    let (status, json) = send(&app.router, request).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["error"]["message"], "duplicate");
}

#[tokio::test]
async fn chunk_digest_mismatch_is_rejected_without_a_row() {
    let app = test_app().await;

    let (file_id, stream_token) = prepare_file(&app, "digest-s4").await;

    let request = Request::patch(format!("/my/files/{file_id}/chunks"))
        .header("X-Access-Token", format!("Bearer {}", app.access_token))
        .header("X-Stream-Token", format!("Bearer {stream_token}"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(multipart_chunk_body(0, 1, &digest_of(b"declared"), b"actual"))
        .unwrap();
    let (status, json) = send(&app.router, request).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["error"]["message"], "corrupted_file");
    assert!(app.store.chunks_for_file(&file_id).unwrap().is_empty());
}

#[tokio::test]
async fn versioned_update_reuses_unchanged_chunk_and_downloads() {
    let app = test_app().await;

    let chunk0 = b"first version chunk zero".to_vec();
    let chunk1 = b"shared tail chunk".to_vec();

    let (file_v1, stream_v1) = prepare_file(&app, "digest-v1").await;
    upload_chunk(&app, &file_v1, &stream_v1, 0, 1, &chunk0).await;
    upload_chunk(&app, &file_v1, &stream_v1, 1, -1, &chunk1).await;
    mark_eof(&app, &file_v1, &stream_v1).await;
    run_reconciliation(&app).await;

    // Re-upload: only chunk 0 changes.
    let request = Request::patch(format!("/my/files/{file_v1}"))
        .header("X-Access-Token", format!("Bearer {}", app.access_token))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            serde_json::json!({
                "digest": "digest-v2",
                "fileSize": CHUNK_SIZE + 1,
                "chunks": 2,
            })
            .to_string(),
        ))
        .unwrap();
    let (status, json) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["prevID"], file_v1.as_str());
    let file_v2 = json["data"]["fileID"].as_str().unwrap().to_string();
    let stream_v2 = json["data"]["streamToken"].as_str().unwrap().to_string();

    let new_chunk0 = b"second version chunk zero".to_vec();
    upload_chunk(&app, &file_v2, &stream_v2, 0, 1, &new_chunk0).await;
    mark_eof(&app, &file_v2, &stream_v2).await;
    run_reconciliation(&app).await;

    let new = app.store.find_version(&file_v2, "user-1").unwrap().unwrap();
    let old = app.store.find_version(&file_v1, "user-1").unwrap().unwrap();
    assert!(new.current_flag);
    assert!(!old.current_flag);
    assert!(old.end_date.is_some());

    // The composed download of v2 is new chunk 0 plus the inherited chunk 1.
    let request = Request::get(format!(
        "/my/files/{file_v2}/download?X-Sig-Token={stream_v2}:{}",
        app.access_token
    ))
    .body(Body::empty())
    .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let disposition = response
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.starts_with("attachment"));
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let mut expected = new_chunk0.clone();
    expected.extend_from_slice(&chunk1);
    assert_eq!(bytes.as_ref(), expected.as_slice());
}
