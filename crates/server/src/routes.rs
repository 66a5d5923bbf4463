use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use camsentry_core::error::ApiError;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::dashboard;
use crate::error::AppError;
use crate::state::AppState;

const DEFAULT_GRACEFUL_DEADLINE: Duration = Duration::from_secs(10);

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(dashboard::serve))
        .nest("/api", api_router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_router() -> Router<AppState> {
    Router::new()
        .route("/status", get(status))
        .route("/cameras", get(cameras))
        .route("/recordings", get(recordings))
        .route("/storage", get(storage))
        .route("/storage/cleanup", post(storage_cleanup))
        .route("/system/cpu", get(system_cpu))
        .route("/system/memory", get(system_memory))
        .route("/system/restart_cameras", post(restart_cameras))
        .route("/logs", get(logs))
        .route("/camera/{id}/start", post(camera_start))
        .route("/camera/{id}/stop", post(camera_stop))
        .route("/camera/{id}/restart", post(camera_restart))
        .route("/start_all", post(start_all))
        .route("/stop_all", post(stop_all))
        .route("/download/{id}/{filename}", get(download))
        .route("/delete/{id}/{filename}", delete(delete_segment))
        .route("/transcoding/status", get(transcoding_status))
        .route("/transcoding/enable", post(transcoding_enable))
        .route("/transcoding/disable", post(transcoding_disable))
}

// ---------------------------------------------------------------------------
// Status / cameras
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct StatusResponse {
    total_sources: usize,
    running_sources: usize,
    healthy_sources: usize,
    disk: camsentry_storage::UsageStats,
    children: Vec<ChildStatus>,
}

#[derive(Serialize)]
struct ChildStatus {
    source_id: String,
    pid: Option<u32>,
    cpu_percent: f32,
    memory_bytes: u64,
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let snapshot = state.fleet.snapshot().await;
    let running = snapshot
        .iter()
        .filter(|s| s.state == camsentry_core::types::SupervisorState::Running)
        .count();
    let healthy = snapshot.iter().filter(|s| s.healthy).count();

    let mut sys = state.sys.lock().await;
    sys.refresh_processes(sysinfo::ProcessesToUpdate::All, true);
    let children = snapshot
        .iter()
        .map(|s| {
            let (cpu_percent, memory_bytes) = s
                .pid
                .and_then(|pid| sys.process(sysinfo::Pid::from_u32(pid)))
                .map(|p| (p.cpu_usage(), p.memory()))
                .unwrap_or((0.0, 0));
            ChildStatus {
                source_id: s.source_id.clone(),
                pid: s.pid,
                cpu_percent,
                memory_bytes,
            }
        })
        .collect();

    Json(StatusResponse {
        total_sources: snapshot.len(),
        running_sources: running,
        healthy_sources: healthy,
        disk: camsentry_storage::usage(&state.config.recordings_base_directory),
        children,
    })
}

#[derive(Serialize)]
struct CameraSummary {
    id: String,
    name: String,
    state: camsentry_core::types::SupervisorState,
    recording: bool,
    healthy: bool,
    resolution: String,
    fps: u32,
    device: String,
}

async fn cameras(State(state): State<AppState>) -> Json<Vec<CameraSummary>> {
    let mut out = Vec::new();
    for source in &state.config.sources {
        let status = state.fleet.status(&source.id).await.ok();
        let (st, recording, healthy) = match &status {
            Some(s) => (s.state, s.state == camsentry_core::types::SupervisorState::Running, s.healthy),
            None => (camsentry_core::types::SupervisorState::Stopped, false, false),
        };
        out.push(CameraSummary {
            id: source.id.clone(),
            name: source.name.clone(),
            state: st,
            recording,
            healthy,
            resolution: format!("{}x{}", source.width, source.height),
            fps: source.framerate,
            device: source.device.to_string_lossy().into_owned(),
        });
    }
    Json(out)
}

// ---------------------------------------------------------------------------
// Recordings
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RecordingsQuery {
    camera: Option<String>,
    limit: Option<usize>,
}

#[derive(Serialize)]
struct RecordingEntry {
    id: String,
    filename: String,
    camera: String,
    size_bytes: u64,
    modified_at: chrono::DateTime<chrono::Utc>,
}

async fn recordings(
    State(state): State<AppState>,
    Query(q): Query<RecordingsQuery>,
) -> Result<Json<Vec<RecordingEntry>>, AppError> {
    let filter = q.camera.filter(|c| c != "all");
    let limit = q.limit.unwrap_or(50).min(500);

    if let Some(id) = &filter {
        if state.config.source(id).is_none() {
            return Err(ApiError::NotFound(format!("unknown source `{id}`")).into());
        }
    }

    let mut segments =
        camsentry_storage::scan(&state.config, filter.as_deref()).map_err(|e| ApiError::Internal(e.to_string()))?;
    segments.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));
    segments.truncate(limit);

    Ok(Json(
        segments
            .into_iter()
            .map(|s| RecordingEntry {
                id: s.filename.clone(),
                filename: s.filename,
                camera: s.source_id,
                size_bytes: s.size_bytes,
                modified_at: s.modified_at,
            })
            .collect(),
    ))
}

// ---------------------------------------------------------------------------
// Storage / system
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct StorageResponse {
    filesystem: camsentry_storage::UsageStats,
    per_source_bytes: std::collections::BTreeMap<String, u64>,
}

async fn storage(State(state): State<AppState>) -> Result<Json<StorageResponse>, AppError> {
    let mut per_source = std::collections::BTreeMap::new();
    for source in &state.config.sources {
        let segs = camsentry_storage::scan(&state.config, Some(&source.id))
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        per_source.insert(source.id.clone(), segs.iter().map(|s| s.size_bytes).sum());
    }
    Ok(Json(StorageResponse {
        filesystem: camsentry_storage::usage(&state.config.recordings_base_directory),
        per_source_bytes: per_source,
    }))
}

#[derive(Deserialize)]
struct CleanupRequest {
    #[serde(default)]
    dry_run: bool,
}

/// Operator-triggered age-based prune, independent of the health monitor's
/// own automatic pass (spec §4.5/§4.8).
async fn storage_cleanup(
    State(state): State<AppState>,
    body: Option<Json<CleanupRequest>>,
) -> Result<Json<camsentry_storage::PruneOutcome>, AppError> {
    let dry_run = body.map(|Json(b)| b.dry_run).unwrap_or(false);
    let outcome = camsentry_storage::prune_by_age(&state.config, state.config.storage.max_age_days, dry_run)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(outcome))
}

#[derive(Serialize)]
struct CpuResponse {
    global_percent: f32,
    per_core_percent: Vec<f32>,
}

async fn system_cpu(State(state): State<AppState>) -> Json<CpuResponse> {
    let mut sys = state.sys.lock().await;
    sys.refresh_cpu_usage();
    Json(CpuResponse {
        global_percent: sys.global_cpu_usage(),
        per_core_percent: sys.cpus().iter().map(|c| c.cpu_usage()).collect(),
    })
}

#[derive(Serialize)]
struct MemoryResponse {
    total_bytes: u64,
    used_bytes: u64,
    available_bytes: u64,
}

async fn system_memory(State(state): State<AppState>) -> Json<MemoryResponse> {
    let mut sys = state.sys.lock().await;
    sys.refresh_memory();
    Json(MemoryResponse {
        total_bytes: sys.total_memory(),
        used_bytes: sys.used_memory(),
        available_bytes: sys.available_memory(),
    })
}

#[derive(Deserialize)]
struct LogsQuery {
    lines: Option<usize>,
}

async fn logs(
    State(state): State<AppState>,
    Query(q): Query<LogsQuery>,
) -> Json<Vec<camsentry_core::logring::LogLine>> {
    let n = q.lines.unwrap_or(100).min(1000);
    Json(state.log_ring.tail(n))
}

// ---------------------------------------------------------------------------
// Fleet control
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct OkResponse {
    ok: bool,
    error: Option<String>,
}

async fn camera_start(State(state): State<AppState>, Path(id): Path<String>) -> Json<OkResponse> {
    match state.fleet.start(&id).await {
        Ok(()) => Json(OkResponse { ok: true, error: None }),
        Err(e) => Json(OkResponse { ok: false, error: Some(e.to_string()) }),
    }
}

async fn camera_stop(State(state): State<AppState>, Path(id): Path<String>) -> Json<OkResponse> {
    match state.fleet.stop(&id, DEFAULT_GRACEFUL_DEADLINE).await {
        Ok(()) => Json(OkResponse { ok: true, error: None }),
        Err(e) => Json(OkResponse { ok: false, error: Some(e.to_string()) }),
    }
}

async fn camera_restart(State(state): State<AppState>, Path(id): Path<String>) -> Json<OkResponse> {
    match state.fleet.restart(&id, DEFAULT_GRACEFUL_DEADLINE).await {
        Ok(_pid) => Json(OkResponse { ok: true, error: None }),
        Err(e) => Json(OkResponse { ok: false, error: Some(e.to_string()) }),
    }
}

#[derive(Serialize)]
struct BulkResponse {
    results: std::collections::BTreeMap<String, OkResult>,
}

#[derive(Serialize)]
struct OkResult {
    ok: bool,
    error: Option<String>,
}

fn to_bulk_response(outcomes: Vec<camsentry_capture::fleet::SourceOutcome>) -> BulkResponse {
    BulkResponse {
        results: outcomes
            .into_iter()
            .map(|o| (o.source_id, OkResult { ok: o.ok, error: o.error }))
            .collect(),
    }
}

async fn start_all(State(state): State<AppState>) -> Json<BulkResponse> {
    Json(to_bulk_response(state.fleet.start_all().await))
}

async fn stop_all(State(state): State<AppState>) -> Json<BulkResponse> {
    Json(to_bulk_response(state.fleet.stop_all(DEFAULT_GRACEFUL_DEADLINE).await))
}

#[derive(Serialize)]
struct RestartCamerasResponse {
    success: bool,
    message: String,
    warning: Option<String>,
}

async fn restart_cameras(State(state): State<AppState>) -> Json<RestartCamerasResponse> {
    let outcomes = state.fleet.restart_all(DEFAULT_GRACEFUL_DEADLINE).await;
    let failed: Vec<&str> = outcomes
        .iter()
        .filter(|o| !o.ok)
        .map(|o| o.source_id.as_str())
        .collect();

    if failed.is_empty() {
        Json(RestartCamerasResponse {
            success: true,
            message: format!("restarted {} source(s)", outcomes.len()),
            warning: None,
        })
    } else {
        Json(RestartCamerasResponse {
            success: false,
            message: format!("restarted {} of {} source(s)", outcomes.len() - failed.len(), outcomes.len()),
            warning: Some(format!("failed: {}", failed.join(", "))),
        })
    }
}

// ---------------------------------------------------------------------------
// Segment download / delete
// ---------------------------------------------------------------------------

/// Reject any filename containing a path separator or resolving outside the
/// source's segment directory (spec §6 path validation).
fn validate_segment_path(
    state: &AppState,
    id: &str,
    filename: &str,
) -> Result<std::path::PathBuf, ApiError> {
    if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
        return Err(ApiError::PathRejected(format!("invalid filename `{filename}`")));
    }
    let source = state
        .config
        .source(id)
        .ok_or_else(|| ApiError::NotFound(format!("unknown source `{id}`")))?;
    let path = source.segment_dir.join(filename);

    let canonical_dir = source
        .segment_dir
        .canonicalize()
        .map_err(|_| ApiError::NotFound("source directory missing".to_string()))?;
    let canonical_path = path
        .canonicalize()
        .map_err(|_| ApiError::NotFound(format!("`{filename}` not found")))?;
    if !canonical_path.starts_with(&canonical_dir) {
        return Err(ApiError::PathRejected(format!("`{filename}` resolves outside its source directory")));
    }

    Ok(path)
}

async fn download(
    State(state): State<AppState>,
    Path((id, filename)): Path<(String, String)>,
) -> Result<axum::response::Response, AppError> {
    use axum::body::Body;
    use axum::http::header;

    let path = validate_segment_path(&state, &id, &filename)?;
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|_| ApiError::NotFound(format!("`{filename}` not found")))?;
    let stream = tokio_util::io::ReaderStream::new(file);
    let body = Body::from_stream(stream);

    Ok(axum::response::Response::builder()
        .header(header::CONTENT_TYPE, "video/mp4")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        )
        .body(body)
        .unwrap())
}

async fn delete_segment(
    State(state): State<AppState>,
    Path((id, filename)): Path<(String, String)>,
) -> Result<Json<OkResponse>, AppError> {
    let path = validate_segment_path(&state, &id, &filename)?;
    tokio::fs::remove_file(&path)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(OkResponse { ok: true, error: None }))
}

// ---------------------------------------------------------------------------
// Transcoding
// ---------------------------------------------------------------------------

async fn transcoding_status(State(state): State<AppState>) -> Json<camsentry_reencoder::EngineStatus> {
    Json(state.reencoder.status().await)
}

async fn transcoding_enable(State(state): State<AppState>) -> Json<OkResponse> {
    state.reencoder.enable();
    Json(OkResponse { ok: true, error: None })
}

async fn transcoding_disable(State(state): State<AppState>) -> Json<OkResponse> {
    state.reencoder.disable();
    Json(OkResponse { ok: true, error: None })
}
