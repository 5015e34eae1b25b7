//! End-to-end tests against a live HTTP server.
//!
//! Each test binds the router to an ephemeral port and talks to it with
//! `reqwest`, the way a browser front end would.

use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;

use gifforge_session::{create_router, AppState, Config, OptimizerConfig, SessionCoordinator};
use image::{ImageFormat, Rgba, RgbaImage};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

/// Encodes a solid-color PNG.
fn png(color: [u8; 4]) -> Vec<u8> {
    let img = RgbaImage::from_pixel(8, 8, Rgba(color));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)
        .expect("Failed to encode fixture");
    out.into_inner()
}

struct TestServer {
    base: String,
    client: Client,
    _dir: tempfile::TempDir,
    _handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    async fn new_session(&self) -> String {
        let body: Value = self
            .client
            .post(self.url("/api/sessions"))
            .send()
            .await
            .expect("request failed")
            .json()
            .await
            .expect("invalid json");
        body["sessionId"]
            .as_str()
            .expect("sessionId missing")
            .to_string()
    }

    async fn upload(&self, session: &str, files: Vec<(&str, Vec<u8>)>) -> reqwest::Response {
        let mut form = Form::new();
        for (name, bytes) in files {
            form = form.part("files", Part::bytes(bytes).file_name(name.to_string()));
        }
        self.client
            .post(self.url("/api/upload"))
            .header("X-Session-ID", session)
            .multipart(form)
            .send()
            .await
            .expect("request failed")
    }

    async fn images(&self, session: &str) -> (StatusCode, Value) {
        let response = self
            .client
            .get(self.url("/api/images"))
            .header("X-Session-ID", session)
            .send()
            .await
            .expect("request failed");
        let status = response.status();
        (status, response.json().await.unwrap_or(Value::Null))
    }

    async fn post_json(&self, path: &str, session: &str, body: &Value) -> (StatusCode, Value) {
        let response = self
            .client
            .post(self.url(path))
            .header("X-Session-ID", session)
            .json(body)
            .send()
            .await
            .expect("request failed");
        let status = response.status();
        (status, response.json().await.unwrap_or(Value::Null))
    }
}

/// Spawns the server on an ephemeral port with a fresh storage root.
async fn spawn_test_server() -> TestServer {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = Config {
        storage_root: dir.path().display().to_string(),
        optimizer: OptimizerConfig {
            enabled: false,
            ..OptimizerConfig::default()
        },
        ..Config::default()
    };
    let coordinator = SessionCoordinator::from_config(&config)
        .await
        .expect("Failed to build coordinator");
    let router = create_router(AppState::new(Arc::new(coordinator)));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr: SocketAddr = listener.local_addr().expect("Failed to get local addr");

    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    TestServer {
        base: format!("http://{addr}"),
        client: Client::new(),
        _dir: dir,
        _handle: handle,
    }
}

// ============================================================================
// Full Workflow
// ============================================================================

/// Upload, reorder, remove, generate, then download the published GIF.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_full_workflow_over_http() {
    let server = spawn_test_server().await;
    let session = server.new_session().await;

    let response = server
        .upload(
            &session,
            vec![
                ("red.png", png([255, 0, 0, 255])),
                ("green.png", png([0, 255, 0, 255])),
                ("blue.png", png([0, 0, 255, 255])),
            ],
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.expect("invalid json");
    assert_eq!(body["success"], true);
    let keys: Vec<String> =
        serde_json::from_value(body["filenames"].clone()).expect("filenames missing");
    assert_eq!(keys.len(), 3);

    let (status, body) = server.images(&session).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["images"], json!(keys));

    let reordered = vec![keys[2].clone(), keys[0].clone(), keys[1].clone()];
    let (status, _) = server
        .post_json("/api/reorder_images", &session, &json!({ "imageOrder": reordered }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = server
        .post_json("/api/remove_image", &session, &json!({ "imageName": keys[0] }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = server
        .post_json(
            "/api/generate_gif",
            &session,
            &json!({ "duration": 150, "loop": 0, "resize": "16x16" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["frameCount"], 2);
    assert_eq!(body["frames"], json!([keys[2], keys[1]]));
    assert_eq!(body["width"], 16);

    let gif_url = body["gifUrl"].as_str().expect("gifUrl missing");
    let response = server
        .client
        .get(server.url(gif_url))
        .send()
        .await
        .expect("request failed");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("image/gif")
    );
    let bytes = response.bytes().await.expect("body missing");
    assert!(bytes.starts_with(b"GIF89a"));

    let status: Value = server
        .client
        .get(server.url("/api/status"))
        .header("X-Session-ID", &session)
        .send()
        .await
        .expect("request failed")
        .json()
        .await
        .expect("invalid json");
    assert_eq!(status["imageCount"], 2);
    assert_eq!(status["hasArtifact"], true);
    assert_eq!(status["generation"], "idle");
}

/// Reset hands out a new id; the old one is gone for good.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reset_over_http() {
    let server = spawn_test_server().await;
    let session = server.new_session().await;

    let response = server
        .upload(&session, vec![("a.png", png([10, 20, 30, 255]))])
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let (status, body) = server
        .post_json("/api/new_session", &session, &json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    let fresh = body["sessionId"].as_str().expect("sessionId missing");
    assert_ne!(fresh, session);

    let (status, body) = server.images(&session).await;
    assert_eq!(status, StatusCode::GONE);
    assert!(body["error"].is_string());

    let (status, body) = server.images(fresh).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["images"], json!([]));
}

// ============================================================================
// Error Mapping
// ============================================================================

/// Client mistakes come back as JSON errors with the matching status.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_error_statuses_over_http() {
    let server = spawn_test_server().await;
    let session = server.new_session().await;

    let response = server
        .client
        .get(server.url("/api/images"))
        .send()
        .await
        .expect("request failed");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = server
        .upload(&session, vec![("script.exe", b"MZ".to_vec())])
        .await;
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let (status, _) = server
        .post_json("/api/remove_image", &session, &json!({ "imageName": "IMG_1_deadbeef_x.png" }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = server
        .post_json("/api/generate_gif", &session, &json!({}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]
        .as_str()
        .expect("error missing")
        .contains("No valid frames"));

    let (status, _) = server
        .post_json("/api/generate_gif", &session, &json!({ "resize": "0x10" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
