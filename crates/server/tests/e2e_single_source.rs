//! End-to-end scenario 1 ("single source happy path"): one enabled source,
//! stream-copy output, a fake encoder standing in for ffmpeg. Asserts the
//! control surface reports recordings and a healthy/recording camera after
//! two segment boundaries.

use std::sync::Arc;
use std::time::Duration;

use axum_test::TestServer;
use camsentry_capture::fleet::Fleet;
use camsentry_core::config::{Config, ConfigDocument};
use camsentry_core::logring::LogRing;
use camsentry_server::routes::build_router;
use camsentry_server::state::AppState;
use serde_json::Value;

fn locate_fixture(name: &str) -> std::path::PathBuf {
    for key_variant in [format!("CARGO_BIN_EXE_{name}")] {
        if let Ok(path) = std::env::var(&key_variant) {
            let p = std::path::PathBuf::from(path);
            if p.exists() {
                return p;
            }
        }
    }
    if let Ok(current) = std::env::current_exe() {
        if let Some(dir) = current.parent() {
            let candidate = dir.join(name);
            if candidate.exists() {
                return candidate;
            }
        }
    }
    panic!("could not locate fixture binary `{name}`; run via `cargo test`");
}

fn test_config(base: &std::path::Path, segment_duration_secs: u32) -> Config {
    let toml = format!(
        r#"
recordings_base_directory = "{base}"
segment_duration_seconds = {segment_duration_secs}
output_codec = "copy"

[sources.cam1]
name = "Front Door"
device = "/tmp/fakedev"
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

#[tokio::test]
async fn single_source_happy_path() {
    let encoder_exe = locate_fixture("fake_encoder");

    let base = std::env::temp_dir().join(format!("camsentry_e2e_{}", std::process::id()));
    std::fs::create_dir_all(&base).unwrap();
    let config = Arc::new(test_config(&base, 10));

    let fleet = Arc::new(Fleet::new(config.clone(), encoder_exe.clone()));
    let reencoder = camsentry_reencoder::spawn(config.clone(), encoder_exe.clone(), "ffprobe".into()).await;
    let log_ring = Arc::new(LogRing::new(200));

    let state = AppState {
        config: config.clone(),
        fleet: fleet.clone(),
        reencoder,
        log_ring,
        encoder_exe,
        sys: Arc::new(tokio::sync::Mutex::new(sysinfo::System::new())),
    };

    fleet.start("cam1").await.expect("source should start");

    let server = TestServer::new(build_router(state)).unwrap();

    tokio::time::sleep(Duration::from_secs(25)).await;

    let cameras: Value = server.get("/api/cameras").await.json();
    assert_eq!(cameras[0]["id"], "cam1");
    assert_eq!(cameras[0]["recording"], true);
    assert_eq!(cameras[0]["healthy"], true);

    let recordings: Value = server.get("/api/recordings?camera=cam1").await.json();
    let entries = recordings.as_array().unwrap();
    assert!(entries.len() >= 2, "expected at least 2 segments, got {}", entries.len());

    let name_pattern = regex_lite_check(&entries[0]["filename"].as_str().unwrap());
    assert!(name_pattern, "segment filename did not match cam1_YYYYMMDD_HHMMSS.mp4");

    fleet.shutdown().await;
    std::fs::remove_dir_all(&base).ok();
}

/// Hand-rolled check instead of pulling in `regex` as a test-only dependency
/// here: `cam1_` + 8 digits + `_` + 6 digits + `.mp4`.
fn regex_lite_check(filename: &str) -> bool {
    let Some(rest) = filename.strip_prefix("cam1_") else { return false };
    let Some(rest) = rest.strip_suffix(".mp4") else { return false };
    let Some((date, time)) = rest.split_once('_') else { return false };
    date.len() == 8 && time.len() == 6 && date.chars().all(|c| c.is_ascii_digit()) && time.chars().all(|c| c.is_ascii_digit())
}
