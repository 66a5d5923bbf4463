use std::sync::Arc;

use axum_test::TestServer;
use camsentry_capture::fleet::Fleet;
use camsentry_core::config::{Config, ConfigDocument};
use camsentry_core::logring::LogRing;
use camsentry_server::routes::build_router;
use camsentry_server::state::AppState;
use serde_json::Value;

/// Build a validated single-source config rooted at a fresh temp directory.
fn test_config(base: &std::path::Path) -> Config {
    let toml = format!(
        r#"
recordings_base_directory = "{base}"
segment_duration_seconds = 60
output_codec = "copy"

[sources.cam1]
name = "Front Door"
device = "/dev/video0"
resolution = "1920x1080"
framerate = 30
input_codec = "h264"
enabled = true

[storage]
cleanup_enabled = false

[transcoder]
enabled = false

[http]
host = "127.0.0.1"
port = 0
"#,
        base = base.display()
    );
    let doc: ConfigDocument = toml::from_str(&toml).unwrap();
    Config::from_document(doc).unwrap()
}

async fn test_app() -> TestServer {
    let base = std::env::temp_dir().join(format!("camsentry_test_{}", std::process::id()));
    std::fs::create_dir_all(&base).unwrap();
    let config = Arc::new(test_config(&base));

    let fleet = Arc::new(Fleet::new(config.clone(), "ffmpeg".into()));
    let reencoder = camsentry_reencoder::spawn(config.clone(), "ffmpeg".into(), "ffprobe".into()).await;
    let log_ring = Arc::new(LogRing::new(100));

    let state = AppState {
        config,
        fleet,
        reencoder,
        log_ring,
        encoder_exe: "ffmpeg".into(),
        sys: Arc::new(tokio::sync::Mutex::new(sysinfo::System::new())),
    };

    let app = build_router(state);
    TestServer::new(app).unwrap()
}

#[tokio::test]
async fn cameras_lists_configured_source() {
    let server = test_app().await;
    let resp = server.get("/api/cameras").await;
    resp.assert_status_ok();
    let body: Value = resp.json();
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["id"], "cam1");
    assert_eq!(body[0]["resolution"], "1920x1080");
}

#[tokio::test]
async fn status_reports_source_count() {
    let server = test_app().await;
    let resp = server.get("/api/status").await;
    resp.assert_status_ok();
    let body: Value = resp.json();
    assert_eq!(body["total_sources"], 1);
}

#[tokio::test]
async fn camera_start_unknown_source_returns_not_found() {
    let server = test_app().await;
    let resp = server.post("/api/camera/does-not-exist/start").await;
    resp.assert_status_ok();
    let body: Value = resp.json();
    assert_eq!(body["ok"], false);
    assert!(body["error"].as_str().unwrap().contains("unknown source"));
}

#[tokio::test]
async fn download_rejects_path_traversal() {
    let server = test_app().await;
    let resp = server.get("/api/download/cam1/..%2f..%2fetc%2fpasswd").await;
    resp.assert_status(axum::http::StatusCode::BAD_REQUEST);
    let body: Value = resp.json();
    assert_eq!(body["error"]["code"], "path_rejected");
}

#[tokio::test]
async fn download_missing_file_is_not_found() {
    let server = test_app().await;
    let resp = server.get("/api/download/cam1/cam1_20260101_000000.mp4").await;
    resp.assert_status(axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn transcoding_status_reflects_disabled_config() {
    let server = test_app().await;
    let resp = server.get("/api/transcoding/status").await;
    resp.assert_status_ok();
    let body: Value = resp.json();
    assert_eq!(body["enabled"], false);
}

#[tokio::test]
async fn transcoding_enable_flips_flag() {
    let server = test_app().await;
    server.post("/api/transcoding/enable").await.assert_status_ok();
    let body: Value = server.get("/api/transcoding/status").await.json();
    assert_eq!(body["enabled"], true);
}

#[tokio::test]
async fn dashboard_serves_html() {
    let server = test_app().await;
    let resp = server.get("/").await;
    resp.assert_status_ok();
    assert!(resp.text().contains("camsentry"));
}
