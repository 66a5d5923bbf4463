//! Segment filename grammar, transcode markers, and persisted statistics
//! (spec §3 "Segment", "Transcode marker", "Transcoder statistics"; §6).

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::SystemTime;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// `<source_id>_YYYYMMDD_HHMMSS.<ext>`
static SEGMENT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<id>[A-Za-z0-9_-]+)_(?P<ts>\d{8}_\d{6})\.(?P<ext>[A-Za-z0-9]+)$").unwrap());

/// A finished or in-progress container file produced by a capture child.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub source_id: String,
    pub filename: String,
    pub path: PathBuf,
    pub recorded_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub size_bytes: u64,
}

/// Parse a bare filename (no directory component) against the segment grammar.
/// Returns `None` for non-matching names and for sidecar extensions
/// (`.original`, `.transcoded`, `.transcoding`), which are reported separately.
pub fn parse_segment_filename(filename: &str) -> Option<(String, DateTime<Utc>)> {
    let caps = SEGMENT_PATTERN.captures(filename)?;
    let ext = &caps["ext"];
    if matches!(ext, "original" | "transcoded" | "transcoding") {
        return None;
    }
    let ts = &caps["ts"];
    let naive = NaiveDateTime::parse_from_str(ts, "%Y%m%d_%H%M%S").ok()?;
    Some((
        caps["id"].to_string(),
        DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc),
    ))
}

/// Build a segment entry from a path already known to match the grammar.
pub fn segment_from_path(path: &Path) -> Option<Segment> {
    let filename = path.file_name()?.to_str()?.to_string();
    let (source_id, recorded_at) = parse_segment_filename(&filename)?;
    let metadata = std::fs::metadata(path).ok()?;
    let modified_at: DateTime<Utc> = metadata.modified().ok()?.into();
    Some(Segment {
        source_id,
        filename,
        path: path.to_path_buf(),
        recorded_at,
        modified_at,
        size_bytes: metadata.len(),
    })
}

/// Sidecar auxiliary kind denoting a re-encode lifecycle state (spec §3, §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidecarKind {
    Original,
    Transcoded,
    Transcoding,
}

impl SidecarKind {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Transcoded => "transcoded",
            Self::Transcoding => "transcoding",
        }
    }
}

pub fn sidecar_path(segment_path: &Path, kind: SidecarKind) -> PathBuf {
    let mut s = segment_path.as_os_str().to_os_string();
    s.push(".");
    s.push(kind.extension());
    PathBuf::from(s)
}

/// Sidecar record persisted next to a replaced segment (spec §6 marker payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeMarker {
    pub transcoded_at: DateTime<Utc>,
    pub original_size: u64,
    pub new_size: u64,
    pub savings_bytes: i64,
    pub original_file: PathBuf,
    pub delete_after: DateTime<Utc>,
}

impl TranscodeMarker {
    pub fn new(
        original_size: u64,
        new_size: u64,
        original_file: PathBuf,
        keep_original_days: u32,
    ) -> Self {
        let now = Utc::now();
        // Always strictly after `transcoded_at`, even when keep_original_days == 0,
        // so the deferred-delete sweep has a well-ordered window to act on.
        let window = chrono::Duration::days(keep_original_days as i64)
            .max(chrono::Duration::seconds(1));
        Self {
            transcoded_at: now,
            original_size,
            new_size,
            savings_bytes: original_size as i64 - new_size as i64,
            original_file,
            delete_after: now + window,
        }
    }

    /// Atomic write-then-rename, per spec §4.7's swap-step-3 contract.
    pub async fn write_atomic(&self, marker_path: &Path) -> std::io::Result<()> {
        let tmp_path = sidecar_tmp_path(marker_path);
        let json = serde_json::to_vec_pretty(self)?;
        {
            let mut f = tokio::fs::File::create(&tmp_path).await?;
            use tokio::io::AsyncWriteExt;
            f.write_all(&json).await?;
            f.sync_all().await?;
        }
        tokio::fs::rename(&tmp_path, marker_path).await?;
        Ok(())
    }

    pub async fn read(marker_path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(marker_path).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

fn sidecar_tmp_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(".tmp");
    PathBuf::from(s)
}

/// Cumulative statistics persisted at `<recordings_base>/.transcoding_stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscoderStats {
    pub files_transcoded: u64,
    pub files_failed: u64,
    pub space_saved_bytes: i64,
    pub total_original_bytes: u64,
    pub total_transcoded_bytes: u64,
    pub last_transcoded: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for TranscoderStats {
    fn default() -> Self {
        Self {
            files_transcoded: 0,
            files_failed: 0,
            space_saved_bytes: 0,
            total_original_bytes: 0,
            total_transcoded_bytes: 0,
            last_transcoded: None,
            last_error: None,
        }
    }
}

impl TranscoderStats {
    pub const FILENAME: &'static str = ".transcoding_stats";

    pub async fn load(recordings_base: &Path) -> std::io::Result<Self> {
        let path = recordings_base.join(Self::FILENAME);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    pub async fn save(&self, recordings_base: &Path) -> std::io::Result<()> {
        let path = recordings_base.join(Self::FILENAME);
        let tmp_path = sidecar_tmp_path(&path);
        let json = serde_json::to_vec_pretty(self)?;
        {
            let mut f = tokio::fs::File::create(&tmp_path).await?;
            use tokio::io::AsyncWriteExt;
            f.write_all(&json).await?;
            f.sync_all().await?;
        }
        tokio::fs::rename(&tmp_path, path).await?;
        Ok(())
    }

    pub fn record_success(&mut self, original_size: u64, new_size: u64) {
        self.files_transcoded += 1;
        self.space_saved_bytes += original_size as i64 - new_size as i64;
        self.total_original_bytes += original_size;
        self.total_transcoded_bytes += new_size;
        self.last_transcoded = Some(Utc::now());
    }

    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.files_failed += 1;
        self.last_error = Some(error.into());
    }
}

pub fn system_time_to_chrono(t: SystemTime) -> DateTime<Utc> {
    t.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_segment_name() {
        let (id, ts) = parse_segment_filename("cam1_20230101_000000.mp4").unwrap();
        assert_eq!(id, "cam1");
        assert_eq!(ts.format("%Y%m%d%H%M%S").to_string(), "20230101000000");
    }

    #[test]
    fn rejects_transcoding_sidecar_as_segment() {
        assert!(parse_segment_filename("cam1_20230101_000000.mp4.transcoding").is_none());
    }

    #[test]
    fn rejects_original_and_transcoded_sidecars() {
        assert!(parse_segment_filename("cam1_20230101_000000.mp4.original").is_none());
        assert!(parse_segment_filename("cam1_20230101_000000.mp4.transcoded").is_none());
    }

    #[test]
    fn rejects_non_matching_name() {
        assert!(parse_segment_filename("readme.txt").is_none());
        assert!(parse_segment_filename("cam1_bad_timestamp.mp4").is_none());
    }

    #[test]
    fn sidecar_paths_append_extension() {
        let p = PathBuf::from("/rec/cam1/cam1_20230101_000000.mp4");
        assert_eq!(
            sidecar_path(&p, SidecarKind::Original),
            PathBuf::from("/rec/cam1/cam1_20230101_000000.mp4.original")
        );
        assert_eq!(
            sidecar_path(&p, SidecarKind::Transcoding),
            PathBuf::from("/rec/cam1/cam1_20230101_000000.mp4.transcoding")
        );
    }

    #[test]
    fn marker_delete_after_is_strictly_after_transcoded_at() {
        let marker = TranscodeMarker::new(100, 50, PathBuf::from("/x"), 0);
        assert!(marker.delete_after > marker.transcoded_at);
        let marker = TranscodeMarker::new(100, 50, PathBuf::from("/x"), 1);
        assert!(marker.delete_after > marker.transcoded_at);
    }

    #[test]
    fn stats_default_round_trips() {
        let mut stats = TranscoderStats::default();
        stats.record_success(1000, 400);
        let json = serde_json::to_string(&stats).unwrap();
        let back: TranscoderStats = serde_json::from_str(&json).unwrap();
        assert_eq!(back.files_transcoded, 1);
        assert_eq!(back.space_saved_bytes, 600);
    }
}
