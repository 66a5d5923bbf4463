//! Child encoder adapter (component C2).
//!
//! Builds the argument vector for one source's capture child and owns the
//! launch/signal/reap primitives, generalized from a single HLS transcode
//! template to the three capture templates cameras actually need.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use camsentry_core::config::{Config, Source};
use camsentry_core::types::{InputCodec, OutputCodec};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("encoder executable not found: {0}")]
    ExecutableNotFound(PathBuf),
    #[error("launch failed: {0}")]
    Launch(String),
}

/// Runtime state of one running encoder child (spec §3 "Child handle").
pub struct ChildHandle {
    pub pid: u32,
    pub started_at: Instant,
    pub stderr_ring: Arc<Mutex<VecDeque<String>>>,
    pub exit_status: Arc<Mutex<Option<i32>>>,
    child: Child,
}

const STDERR_RING_CAPACITY: usize = 256;

impl ChildHandle {
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub async fn last_lines(&self, n: usize) -> Vec<String> {
        let ring = self.stderr_ring.lock().await;
        let skip = ring.len().saturating_sub(n);
        ring.iter().skip(skip).cloned().collect()
    }
}

/// Choice of argument-vector shape (spec §4.2, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArgTemplate {
    StreamCopy,
    H264InputTranscode,
    RawInputTranscode,
}

fn pick_template(source: &Source, output_codec: OutputCodec) -> ArgTemplate {
    match output_codec {
        OutputCodec::Copy => ArgTemplate::StreamCopy,
        OutputCodec::H264Target | OutputCodec::H265Target => match source.input_codec {
            InputCodec::Raw => ArgTemplate::RawInputTranscode,
            InputCodec::H264 | InputCodec::Mjpeg => ArgTemplate::H264InputTranscode,
        },
    }
}

fn target_vcodec(output_codec: OutputCodec) -> &'static str {
    match output_codec {
        OutputCodec::Copy => "copy",
        OutputCodec::H264Target => "libx264",
        OutputCodec::H265Target => "libx265",
    }
}

/// Build the argument vector for one source's capture child.
pub fn build_args(config: &Config, source: &Source) -> Vec<String> {
    let dir = source.segment_dir.to_string_lossy().into_owned();
    let pattern = format!("{}/{}_%Y%m%d_%H%M%S.mp4", dir, source.id);
    let template = pick_template(source, config.output_codec);

    let mut args: Vec<String> = vec!["-f".into(), "v4l2".into()];

    if !matches!(template, ArgTemplate::RawInputTranscode) {
        args.extend(["-input_format".into(), source.input_codec.as_str().into()]);
    }

    args.extend([
        "-video_size".into(),
        format!("{}x{}", source.width, source.height),
        "-framerate".into(),
        source.framerate.to_string(),
        "-i".into(),
        source.device.to_string_lossy().into_owned(),
    ]);

    match template {
        ArgTemplate::StreamCopy => {
            args.extend(["-c:v".into(), "copy".into()]);
        }
        ArgTemplate::H264InputTranscode | ArgTemplate::RawInputTranscode => {
            let gop = source.framerate.max(1) * 2;
            let target_kbps = estimate_bitrate_kbps(source.width, source.height, source.framerate);
            args.extend([
                "-c:v".into(),
                target_vcodec(config.output_codec).to_string(),
                "-preset".into(),
                "veryfast".into(),
                "-global_quality".into(),
                "23".into(),
                "-b:v".into(),
                format!("{target_kbps}k"),
                "-maxrate".into(),
                format!("{}k", target_kbps * 2),
                "-g".into(),
                gop.to_string(),
                "-refs".into(),
                "2".into(),
                "-bf".into(),
                "3".into(),
            ]);
        }
    }

    args.extend([
        "-f".into(),
        "segment".into(),
        "-segment_time".into(),
        config.segment_duration_seconds.to_string(),
        "-segment_format".into(),
        "mp4".into(),
        "-reset_timestamps".into(),
        "1".into(),
        "-strftime".into(),
        "1".into(),
        pattern,
    ]);

    args
}

/// Rough CBR target for a software transcode; matches the order of magnitude
/// ffmpeg guides recommend for 1080p/30fps H.264 (~4-6 Mbps) and scales
/// linearly with pixel throughput.
fn estimate_bitrate_kbps(width: u32, height: u32, fps: u32) -> u32 {
    let pixels_per_sec = (width as u64) * (height as u64) * (fps.max(1) as u64);
    let reference = 1920u64 * 1080 * 30;
    let reference_kbps = 4000u64;
    ((pixels_per_sec * reference_kbps / reference).max(500)) as u32
}

/// Launch a source's capture child, wiring stderr into its ring buffer.
pub async fn launch(
    exe_path: &std::path::Path,
    config: &Config,
    source: &Source,
) -> Result<ChildHandle, LaunchError> {
    if !exe_path.exists() {
        return Err(LaunchError::ExecutableNotFound(exe_path.to_path_buf()));
    }

    let args = build_args(config, source);
    let mut child = tokio::process::Command::new(exe_path)
        .args(&args)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .map_err(|e| LaunchError::Launch(e.to_string()))?;

    let pid = child.id().ok_or_else(|| LaunchError::Launch("no pid after spawn".into()))?;

    let stderr_ring = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_RING_CAPACITY)));
    let exit_status = Arc::new(Mutex::new(None));

    if let Some(stderr) = child.stderr.take() {
        spawn_line_reader(stderr, stderr_ring.clone(), source.id.clone());
    }
    if let Some(stdout) = child.stdout.take() {
        spawn_line_reader(stdout, stderr_ring.clone(), source.id.clone());
    }

    info!(source_id = %source.id, pid, ?args, "launched capture child");

    Ok(ChildHandle {
        pid,
        started_at: Instant::now(),
        stderr_ring,
        exit_status,
        child,
    })
}

fn spawn_line_reader<R>(reader: R, ring: Arc<Mutex<VecDeque<String>>>, source_id: String)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let mut ring = ring.lock().await;
                    if ring.len() >= STDERR_RING_CAPACITY {
                        ring.pop_front();
                    }
                    ring.push_back(line);
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(source_id = %source_id, error = %e, "error reading child output");
                    break;
                }
            }
        }
    });
}

/// Send an interrupt-style signal so the child flushes and exits cleanly.
pub fn signal_interrupt(handle: &ChildHandle) -> std::io::Result<()> {
    send_signal(handle.pid, nix::sys::signal::Signal::SIGINT)
}

/// Escalate to a forced kill after the graceful deadline expires.
pub fn signal_kill(handle: &ChildHandle) -> std::io::Result<()> {
    send_signal(handle.pid, nix::sys::signal::Signal::SIGKILL)
}

fn send_signal(pid: u32, signal: nix::sys::signal::Signal) -> std::io::Result<()> {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), signal)
        .map_err(|e| std::io::Error::from_raw_os_error(e as i32))
}

/// Wait for the child to exit, racing a deadline.
pub async fn wait(handle: &mut ChildHandle, deadline: std::time::Duration) -> Option<i32> {
    match tokio::time::timeout(deadline, handle.child.wait()).await {
        Ok(Ok(status)) => {
            let code = status.code();
            *handle.exit_status.lock().await = code;
            code
        }
        Ok(Err(_)) | Err(_) => None,
    }
}

/// Non-blocking liveness check used by the supervisor's health contract.
pub fn is_alive(handle: &mut ChildHandle) -> bool {
    matches!(handle.child.try_wait(), Ok(None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use camsentry_core::config::{ConfigDocument, OutputCodecField, SourceDocument, InputCodecField};
    use std::collections::BTreeMap;

    fn doc_with(output: OutputCodecField, input: InputCodecField) -> (Config, Source) {
        let mut sources = BTreeMap::new();
        sources.insert(
            "cam1".to_string(),
            SourceDocument {
                device: "/dev/video0".into(),
                name: "Front".into(),
                resolution: "1280x720".into(),
                framerate: 15,
                input_codec: Some(input),
                enabled: true,
            },
        );
        let doc = ConfigDocument {
            recordings_base_directory: std::env::temp_dir(),
            segment_duration_seconds: 30,
            output_codec: output,
            sources,
            ..Default::default()
        };
        let cfg = Config::from_document(doc).unwrap();
        let source = cfg.source("cam1").unwrap().clone();
        (cfg, source)
    }

    #[test]
    fn stream_copy_uses_c_v_copy() {
        let (cfg, source) = doc_with(OutputCodecField::Copy, InputCodecField::H264);
        let args = build_args(&cfg, &source);
        assert!(args.windows(2).any(|w| w == ["-c:v".to_string(), "copy".to_string()]));
        assert!(args.iter().any(|a| a == "-input_format"));
    }

    #[test]
    fn raw_input_drops_input_format_flag() {
        let (cfg, source) = doc_with(OutputCodecField::H264Target, InputCodecField::Raw);
        let args = build_args(&cfg, &source);
        assert!(!args.iter().any(|a| a == "-input_format"));
        assert!(args.windows(2).any(|w| w == ["-c:v".to_string(), "libx264".to_string()]));
    }

    #[test]
    fn h264_input_transcode_keeps_input_format() {
        let (cfg, source) = doc_with(OutputCodecField::H265Target, InputCodecField::H264);
        let args = build_args(&cfg, &source);
        assert!(args.iter().any(|a| a == "-input_format"));
        assert!(args.windows(2).any(|w| w == ["-c:v".to_string(), "libx265".to_string()]));
    }

    #[test]
    fn segment_pattern_embeds_id_and_strftime() {
        let (cfg, source) = doc_with(OutputCodecField::Copy, InputCodecField::H264);
        let args = build_args(&cfg, &source);
        let pattern = args.last().unwrap();
        assert!(pattern.contains("cam1_%Y%m%d_%H%M%S.mp4"));
    }
}
