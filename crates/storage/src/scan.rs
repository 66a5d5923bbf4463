//! Segment enumeration (component C5, `scan()`).

use camsentry_core::config::Config;
use camsentry_core::segment::{self, Segment, SidecarKind};

/// List segment files across all sources, or just `source_id` when given.
/// Non-recursive beyond each per-source directory; sidecar auxiliaries are
/// never reported as segments.
pub fn scan(config: &Config, source_id: Option<&str>) -> std::io::Result<Vec<Segment>> {
    let mut out = Vec::new();
    for source in &config.sources {
        if let Some(id) = source_id {
            if source.id != id {
                continue;
            }
        }
        out.extend(scan_source_dir(&source.segment_dir)?);
    }
    Ok(out)
}

fn scan_source_dir(dir: &std::path::Path) -> std::io::Result<Vec<Segment>> {
    let mut out = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if let Some(seg) = segment::segment_from_path(&path) {
            out.push(seg);
        }
    }
    Ok(out)
}

/// Whether `segment_path` has a `.transcoding` companion present, indicating
/// an in-progress re-encode that must not be disturbed.
pub fn has_transcoding_companion(segment_path: &std::path::Path) -> bool {
    segment::sidecar_path(segment_path, SidecarKind::Transcoding).exists()
}
