//! Upload and raw serving over HTTP against local storage and the in-memory repository.
//!
//! Run with: `cargo test -p skycloud-api --test upload_test`

use axum_test::TestServer;
use bytes::Bytes;
use serde_json::Value;
use std::collections::HashSet;
use std::future::IntoFuture;
use skycloud_api::setup::routes::setup_routes;
use skycloud_api::AppState;
use skycloud_core::{ChunkConfig, Config, SkycloudConfig};
use skycloud_db::InMemoryFileRepository;
use skycloud_processing::ChunkReassembler;
use skycloud_storage::{LocalStorage, Storage};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct TestApp {
    server: TestServer,
    storage: Arc<dyn Storage>,
    _dir: TempDir,
}

async fn setup_test_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let config: Config = SkycloudConfig {
        chunks: ChunkConfig {
            temp_directory: dir.path().join("partials"),
            session_timeout_secs: 3600,
        },
        ..Default::default()
    }
    .into();

    let storage: Arc<dyn Storage> =
        Arc::new(LocalStorage::new(dir.path().join("uploads"), None).await.unwrap());
    let repository = Arc::new(InMemoryFileRepository::new());
    let reassembler = Arc::new(ChunkReassembler::new(
        Arc::clone(&storage),
        config.chunks().temp_directory.clone(),
        Duration::from_secs(config.chunks().session_timeout_secs),
        config.max_file_size_bytes(),
    ));

    let state = Arc::new(AppState::new(
        config.clone(),
        Arc::clone(&storage),
        repository,
        reassembler,
    ));
    let server = TestServer::new(setup_routes(&config, state)).expect("Failed to create test server");

    TestApp {
        server,
        storage,
        _dir: dir,
    }
}

fn uploaded_name(body: &Value) -> String {
    body["files"][0]["name"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_upload_and_range_read() {
    let app = setup_test_app().await;
    let content = Bytes::from_static(b"0123456789abcdef");

    let response = app
        .server
        .post("/api/upload")
        .add_header("content-type", "text/plain")
        .add_header("content-disposition", "attachment; filename=\"digits.txt\"")
        .add_header("x-skycloud-format", "uuid")
        .bytes(content.clone())
        .await;
    assert_eq!(response.status_code(), 200);

    let body: Value = response.json();
    let name = uploaded_name(&body);
    assert!(name.ends_with(".txt"));
    assert_eq!(body["files"][0]["type"], "text/plain");
    assert_eq!(
        body["files"][0]["url"],
        format!("http://localhost:3000/raw/{}", name)
    );
    assert!(body.get("deletesAt").is_none());

    let full = app.server.get(&format!("/raw/{}", name)).await;
    assert_eq!(full.status_code(), 200);
    assert_eq!(full.as_bytes().as_ref(), content.as_ref());

    let partial = app
        .server
        .get(&format!("/raw/{}", name))
        .add_header("range", "bytes=2-5")
        .await;
    assert_eq!(partial.status_code(), 206);
    assert_eq!(partial.as_bytes().as_ref(), b"2345");
    assert_eq!(partial.header("content-range"), "bytes 2-5/16");

    let unsatisfiable = app
        .server
        .get(&format!("/raw/{}", name))
        .add_header("range", "bytes=100-")
        .await;
    assert_eq!(unsatisfiable.status_code(), 416);
}

#[tokio::test]
async fn test_chunked_upload_out_of_order() {
    let app = setup_test_app().await;
    let content = b"hello chunked world!";

    let send_chunk = |start: usize, end: usize, last: bool| {
        app.server
            .post("/api/upload")
            .add_header("content-range", format!("bytes {}-{}/{}", start, end, content.len()))
            .add_header("x-skycloud-p-filename", "greeting.txt")
            .add_header("x-skycloud-p-content-type", "text/plain")
            .add_header("x-skycloud-p-identifier", "chunk-test")
            .add_header("x-skycloud-p-lastchunk", if last { "true" } else { "false" })
            .add_header("x-skycloud-p-content-length", (end - start + 1).to_string())
            .bytes(Bytes::copy_from_slice(&content[start..=end]))
    };

    let first = send_chunk(10, 19, true).await;
    assert_eq!(first.status_code(), 200);
    let first: Value = first.json();
    assert_eq!(first["partialSuccess"], true);
    assert_eq!(first["received"], 10);
    assert_eq!(first["total"], 20);

    let done = send_chunk(0, 9, false).await;
    assert_eq!(done.status_code(), 200);
    let done: Value = done.json();
    let name = uploaded_name(&done);
    assert_eq!(done["files"][0]["type"], "text/plain");

    let stored = app.storage.read_all(&name).await.unwrap().unwrap();
    assert_eq!(stored.as_ref(), content);

    let again = send_chunk(0, 9, true).await;
    assert_eq!(again.status_code(), 409);
}

#[tokio::test]
async fn test_invalid_header_is_rejected() {
    let app = setup_test_app().await;

    let response = app
        .server
        .post("/api/upload")
        .add_header("x-skycloud-image-compression-percent", "101")
        .bytes(Bytes::from_static(b"data"))
        .await;

    assert_eq!(response.status_code(), 400);
    let body: Value = response.json();
    assert_eq!(body["header"], "x-skycloud-image-compression-percent");
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_password_protected_file() {
    let app = setup_test_app().await;

    let response = app
        .server
        .post("/api/upload")
        .add_header("x-skycloud-password", "s3cret")
        .bytes(Bytes::from_static(b"private"))
        .await;
    let name = uploaded_name(&response.json());

    let denied = app.server.get(&format!("/raw/{}", name)).await;
    assert_eq!(denied.status_code(), 401);

    let wrong = app
        .server
        .get(&format!("/raw/{}", name))
        .add_query_param("pw", "nope")
        .await;
    assert_eq!(wrong.status_code(), 401);

    let allowed = app
        .server
        .get(&format!("/raw/{}", name))
        .add_query_param("pw", "s3cret")
        .await;
    assert_eq!(allowed.status_code(), 200);
    assert_eq!(allowed.as_bytes().as_ref(), b"private");
}

#[tokio::test]
async fn test_max_views_hides_file() {
    let app = setup_test_app().await;

    let response = app
        .server
        .post("/api/upload")
        .add_header("x-skycloud-max-views", "1")
        .bytes(Bytes::from_static(b"once"))
        .await;
    let name = uploaded_name(&response.json());

    assert_eq!(app.server.get(&format!("/raw/{}", name)).await.status_code(), 200);
    assert_eq!(app.server.get(&format!("/raw/{}", name)).await.status_code(), 404);
}

#[tokio::test]
async fn test_no_json_returns_url() {
    let app = setup_test_app().await;

    let response = app
        .server
        .post("/api/upload")
        .add_header("x-skycloud-no-json", "true")
        .add_header("x-skycloud-domain", "files.example.com")
        .add_header("x-skycloud-filename", "report")
        .bytes(Bytes::from_static(b"plain"))
        .await;

    assert_eq!(response.status_code(), 200);
    assert_eq!(response.text(), "https://files.example.com/raw/report");
}

#[tokio::test]
async fn test_same_filename_uploads_keep_their_own_content() {
    let app = setup_test_app().await;

    let requests = (0..8).map(|i| {
        app.server
            .post("/api/upload")
            .add_header("x-skycloud-filename", "shared")
            .bytes(Bytes::from(format!("payload-{i}")))
            .into_future()
    });
    let responses = futures::future::join_all(requests).await;

    let mut names = HashSet::new();
    for (i, response) in responses.into_iter().enumerate() {
        assert_eq!(response.status_code(), 200);
        let name = uploaded_name(&response.json());

        let stored = app.server.get(&format!("/raw/{}", name)).await;
        assert_eq!(stored.status_code(), 200);
        assert_eq!(stored.text(), format!("payload-{i}"));
        names.insert(name);
    }
    assert_eq!(names.len(), 8);
    assert!(names.contains("shared"));
}

#[tokio::test]
async fn test_missing_file_is_404() {
    let app = setup_test_app().await;
    let response = app.server.get("/raw/does-not-exist.png").await;
    assert_eq!(response.status_code(), 404);
}

#[tokio::test]
async fn test_health() {
    let app = setup_test_app().await;
    let response = app.server.get("/health").await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["backend"], "local");
}
