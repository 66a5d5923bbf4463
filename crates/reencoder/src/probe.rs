//! Media probe wrapper used for codec detection and post-transcode
//! verification. Trimmed to the fields the re-encoder actually compares.

use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe executable not found: {0}")]
    ExecutableNotFound(std::path::PathBuf),
    #[error("probe failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    pub duration_secs: f64,
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub framerate: f64,
}

/// Run the probe executable on `file` and parse its JSON output. Uses the
/// same `-show_format -show_streams` invocation shape the corpus's ffprobe
/// wrapper uses.
pub async fn probe(probe_exe: &Path, file: &Path) -> Result<MediaInfo, ProbeError> {
    if !probe_exe.exists() {
        return Err(ProbeError::ExecutableNotFound(probe_exe.to_path_buf()));
    }

    let output = tokio::process::Command::new(probe_exe)
        .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
        .arg(file)
        .output()
        .await
        .map_err(|e| ProbeError::Failed(format!("spawn failed: {e}")))?;

    if !output.status.success() {
        return Err(ProbeError::Failed(String::from_utf8_lossy(&output.stderr).into_owned()));
    }

    let raw: serde_json::Value = serde_json::from_slice(&output.stdout)
        .map_err(|e| ProbeError::Failed(format!("parse JSON: {e}")))?;

    parse_probe_output(&raw)
}

fn parse_probe_output(raw: &serde_json::Value) -> Result<MediaInfo, ProbeError> {
    let format = raw
        .get("format")
        .ok_or_else(|| ProbeError::Failed("missing 'format'".into()))?;
    let duration_secs: f64 = format
        .get("duration")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.0);

    let streams = raw.get("streams").and_then(|v| v.as_array()).cloned().unwrap_or_default();
    let video = streams
        .iter()
        .find(|s| s.get("codec_type").and_then(|v| v.as_str()) == Some("video"))
        .ok_or_else(|| ProbeError::Failed("no video stream".into()))?;

    let codec = video
        .get("codec_name")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();
    let width = video.get("width").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    let height = video.get("height").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    let framerate = video
        .get("r_frame_rate")
        .and_then(|v| v.as_str())
        .and_then(parse_fraction)
        .unwrap_or(0.0);

    Ok(MediaInfo { duration_secs, codec, width, height, framerate })
}

fn parse_fraction(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let n: f64 = num.parse().ok()?;
        let d: f64 = den.parse().ok()?;
        if d > 0.0 { Some(n / d) } else { None }
    } else {
        s.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_video_stream_fields() {
        let json = serde_json::json!({
            "format": {"duration": "120.5"},
            "streams": [
                {"codec_type": "video", "codec_name": "h264", "width": 1280, "height": 720, "r_frame_rate": "30/1"}
            ]
        });
        let info = parse_probe_output(&json).unwrap();
        assert_eq!(info.codec, "h264");
        assert_eq!(info.width, 1280);
        assert!((info.duration_secs - 120.5).abs() < 0.001);
        assert!((info.framerate - 30.0).abs() < 0.001);
    }

    #[test]
    fn errors_without_video_stream() {
        let json = serde_json::json!({"format": {"duration": "1.0"}, "streams": []});
        assert!(parse_probe_output(&json).is_err());
    }
}
