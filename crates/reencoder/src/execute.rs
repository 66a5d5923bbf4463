//! Execution, verification, and atomic swap for one candidate segment
//! (spec §4.7 "Execution", "Verification", "Atomic swap").

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use camsentry_core::config::Config;
use camsentry_core::segment::{self, SidecarKind, TranscodeMarker};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::probe::{self, MediaInfo};

const VERIFY_SIZE_FLOOR_BYTES: u64 = 1024;
const DURATION_TOLERANCE_SECS: f64 = 1.0;
const FRAMERATE_TOLERANCE_FPS: f64 = 1.0;
const CANCEL_WAIT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum TranscodeOutcomeError {
    #[error("launch failed: {0}")]
    LaunchFailed(String),
    #[error("verification failed: {0}")]
    VerificationFailed(String),
    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct Progress {
    pub filename: String,
    pub source_id: String,
    pub original_size: u64,
    pub current_size: u64,
    pub percent: f64,
}

pub struct TranscodeResult {
    pub original_size: u64,
    pub new_size: u64,
}

/// Run one candidate end to end: launch at low priority, poll progress,
/// verify the temp output, and perform the atomic swap. Deletes the temp
/// and returns an error on any verification failure or cancellation.
pub async fn process_one(
    config: &Config,
    encoder_exe: &Path,
    probe_exe: &Path,
    segment_path: &Path,
    source_id: &str,
    cancel: Arc<AtomicBool>,
    progress: Arc<Mutex<Option<Progress>>>,
) -> Result<TranscodeResult, TranscodeOutcomeError> {
    let original_size = std::fs::metadata(segment_path)
        .map(|m| m.len())
        .unwrap_or(0);
    let temp_path = segment::sidecar_path(segment_path, SidecarKind::Transcoding);

    let original_info = probe::probe(probe_exe, segment_path)
        .await
        .map_err(|e| TranscodeOutcomeError::LaunchFailed(e.to_string()))?;

    let mut child = launch_transcode(encoder_exe, segment_path, &temp_path, config)
        .await
        .map_err(TranscodeOutcomeError::LaunchFailed)?;

    lower_priority(&child);

    *progress.lock().await = Some(Progress {
        filename: segment_path.file_name().unwrap().to_string_lossy().into_owned(),
        source_id: source_id.to_string(),
        original_size,
        current_size: 0,
        percent: 0.0,
    });

    let expected_size = (original_size as f64 * 0.6).max(1.0);
    let result = loop {
        tokio::select! {
            status = child.wait() => {
                break status;
            }
            _ = tokio::time::sleep(Duration::from_millis(500)) => {
                let current = std::fs::metadata(&temp_path).map(|m| m.len()).unwrap_or(0);
                if let Some(p) = progress.lock().await.as_mut() {
                    p.current_size = current;
                    p.percent = ((current as f64 / expected_size) * 100.0).min(99.0);
                }
                if cancel.load(Ordering::Relaxed) {
                    let _ = child.start_kill();
                    let _ = tokio::time::timeout(CANCEL_WAIT, child.wait()).await;
                    let _ = tokio::fs::remove_file(&temp_path).await;
                    *progress.lock().await = None;
                    return Err(TranscodeOutcomeError::Cancelled);
                }
            }
        }
    };

    *progress.lock().await = None;

    let status = result.map_err(|e| TranscodeOutcomeError::LaunchFailed(e.to_string()))?;
    if !status.success() {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(TranscodeOutcomeError::VerificationFailed(format!(
            "encoder exited with {status}"
        )));
    }

    verify(&temp_path, probe_exe, &original_info, original_size, config).await.map_err(|e| {
        let temp_path = temp_path.clone();
        tokio::spawn(async move {
            let _ = tokio::fs::remove_file(&temp_path).await;
        });
        e
    })?;

    let new_size = std::fs::metadata(&temp_path).map(|m| m.len()).unwrap_or(0);
    atomic_swap(segment_path, &temp_path, original_size, new_size, config.transcoder.keep_original_days)
        .await
        .map_err(|e| TranscodeOutcomeError::VerificationFailed(e.to_string()))?;

    info!(
        path = %segment_path.display(),
        original_size,
        new_size,
        "re-encode swapped in"
    );

    Ok(TranscodeResult { original_size, new_size })
}

async fn launch_transcode(
    encoder_exe: &Path,
    input: &Path,
    output: &Path,
    config: &Config,
) -> Result<tokio::process::Child, String> {
    if !encoder_exe.exists() {
        return Err(format!("encoder executable not found: {}", encoder_exe.display()));
    }
    let args: Vec<String> = vec![
        "-y".into(),
        "-i".into(),
        input.to_string_lossy().into_owned(),
        "-c:v".into(),
        target_vcodec(&config.transcoder.output_codec).into(),
        "-preset".into(),
        config.transcoder.preset.clone(),
        "-global_quality".into(),
        config.transcoder.quality.to_string(),
        "-c:a".into(),
        "copy".into(),
        output.to_string_lossy().into_owned(),
    ];

    tokio::process::Command::new(encoder_exe)
        .args(&args)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .map_err(|e| e.to_string())
}

fn target_vcodec(output_codec: &str) -> &'static str {
    match output_codec {
        "h265-target" => "libx265",
        _ => "libx264",
    }
}

/// Best-effort: drop the child to the lowest OS scheduling priority and
/// idle I/O class. Platforms without these facilities simply keep the
/// child at normal priority; the CPU/I/O scheduling gate still keeps it
/// from contending with live capture.
fn lower_priority(child: &tokio::process::Child) {
    let Some(pid) = child.id() else { return };
    unsafe {
        libc::setpriority(libc::PRIO_PROCESS, pid, 19);
    }
    set_idle_io_class(pid as i32);
}

#[cfg(target_os = "linux")]
fn set_idle_io_class(pid: i32) {
    const IOPRIO_WHO_PROCESS: libc::c_int = 1;
    const IOPRIO_CLASS_IDLE: libc::c_int = 3;
    const IOPRIO_CLASS_SHIFT: libc::c_int = 13;
    let ioprio = (IOPRIO_CLASS_IDLE << IOPRIO_CLASS_SHIFT) | 7;
    unsafe {
        libc::syscall(libc::SYS_ioprio_set, IOPRIO_WHO_PROCESS, pid, ioprio);
    }
}

#[cfg(not(target_os = "linux"))]
fn set_idle_io_class(_pid: i32) {}

async fn verify(
    temp_path: &Path,
    probe_exe: &Path,
    original: &MediaInfo,
    original_size: u64,
    config: &Config,
) -> Result<(), TranscodeOutcomeError> {
    let meta = tokio::fs::metadata(temp_path)
        .await
        .map_err(|e| TranscodeOutcomeError::VerificationFailed(format!("temp missing: {e}")))?;
    if meta.len() < VERIFY_SIZE_FLOOR_BYTES {
        return Err(TranscodeOutcomeError::VerificationFailed("temp below size floor".into()));
    }

    let probed = probe::probe(probe_exe, temp_path)
        .await
        .map_err(|e| TranscodeOutcomeError::VerificationFailed(format!("probe failed: {e}")))?;

    if (probed.duration_secs - original.duration_secs).abs() > DURATION_TOLERANCE_SECS {
        return Err(TranscodeOutcomeError::VerificationFailed("duration mismatch".into()));
    }
    if probed.width != original.width || probed.height != original.height {
        return Err(TranscodeOutcomeError::VerificationFailed("resolution mismatch".into()));
    }
    if (probed.framerate - original.framerate).abs() > FRAMERATE_TOLERANCE_FPS {
        return Err(TranscodeOutcomeError::VerificationFailed("framerate mismatch".into()));
    }

    // Integrity pass: a second, independent probe invocation that fails on
    // stream errors rather than just reading container metadata.
    if !integrity_check(probe_exe, temp_path).await {
        return Err(TranscodeOutcomeError::VerificationFailed("integrity check failed".into()));
    }

    let new_size = meta.len();
    let savings_percent = if original_size == 0 {
        0.0
    } else {
        (1.0 - new_size as f64 / original_size as f64) * 100.0
    };
    if savings_percent < config.transcoder.min_savings_percent {
        return Err(TranscodeOutcomeError::VerificationFailed(format!(
            "savings {savings_percent:.1}% below minimum {}%",
            config.transcoder.min_savings_percent
        )));
    }

    Ok(())
}

async fn integrity_check(probe_exe: &Path, path: &Path) -> bool {
    tokio::process::Command::new(probe_exe)
        .args(["-v", "error", "-i"])
        .arg(path)
        .output()
        .await
        .map(|o| o.status.success() && o.stderr.is_empty())
        .unwrap_or(false)
}

/// Three-step atomic swap (spec §4.7).
async fn atomic_swap(
    segment_path: &Path,
    temp_path: &Path,
    original_size: u64,
    new_size: u64,
    keep_original_days: u32,
) -> std::io::Result<()> {
    let original_sidecar = segment::sidecar_path(segment_path, SidecarKind::Original);
    tokio::fs::rename(segment_path, &original_sidecar).await?;
    tokio::fs::rename(temp_path, segment_path).await?;

    let marker_path = segment::sidecar_path(segment_path, SidecarKind::Transcoded);
    let marker = TranscodeMarker::new(original_size, new_size, original_sidecar, keep_original_days);
    marker.write_atomic(&marker_path).await?;
    Ok(())
}
