//! Age-based and emergency pruning (component C5).

use std::collections::HashMap;
use std::path::PathBuf;

use camsentry_core::config::Config;
use camsentry_core::segment::Segment;
use serde::Serialize;
use tracing::{info, warn};

use crate::scan::{has_transcoding_companion, scan};
use crate::usage::{self, UsageStats};

/// Bound on files removed per `emergency_prune` invocation (spec §4.6).
const EMERGENCY_PRUNE_BOUND: usize = 1000;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PruneOutcome {
    pub removed_count: u64,
    pub freed_bytes: u64,
}

/// The most recent segment per source is never a deletion candidate.
fn protected_paths(segments: &[Segment]) -> std::collections::HashSet<PathBuf> {
    let mut latest: HashMap<&str, &Segment> = HashMap::new();
    for seg in segments {
        latest
            .entry(seg.source_id.as_str())
            .and_modify(|cur| {
                if seg.modified_at > cur.modified_at {
                    *cur = seg;
                }
            })
            .or_insert(seg);
    }
    latest.values().map(|s| s.path.clone()).collect()
}

fn deletable(segments: Vec<Segment>) -> Vec<Segment> {
    let protected = protected_paths(&segments);
    segments
        .into_iter()
        .filter(|s| !protected.contains(&s.path))
        .filter(|s| !has_transcoding_companion(&s.path))
        .collect()
}

/// Remove segment files older than `max_age_days`, oldest first. Returns
/// what would have been removed when `dry_run` is set.
pub fn prune_by_age(config: &Config, max_age_days: u32, dry_run: bool) -> std::io::Result<PruneOutcome> {
    let cutoff = chrono::Utc::now() - chrono::Duration::days(max_age_days as i64);
    let all = scan(config, None)?;
    let mut candidates = deletable(all);
    candidates.retain(|s| s.modified_at < cutoff);
    candidates.sort_by(|a, b| a.modified_at.cmp(&b.modified_at).then_with(|| a.path.cmp(&b.path)));

    let mut outcome = PruneOutcome::default();
    for seg in &candidates {
        if dry_run {
            outcome.removed_count += 1;
            outcome.freed_bytes += seg.size_bytes;
            continue;
        }
        match std::fs::remove_file(&seg.path) {
            Ok(()) => {
                outcome.removed_count += 1;
                outcome.freed_bytes += seg.size_bytes;
            }
            Err(e) => warn!(path = %seg.path.display(), error = %e, "failed to prune aged segment"),
        }
    }
    info!(
        removed = outcome.removed_count,
        freed_bytes = outcome.freed_bytes,
        dry_run,
        "age-based prune complete"
    );
    Ok(outcome)
}

/// Delete oldest segments across all sources until used fraction ≤
/// `target_fraction`, bounded to `EMERGENCY_PRUNE_BOUND` files per call.
pub fn emergency_prune(config: &Config, target_fraction: f64) -> std::io::Result<PruneOutcome> {
    let all = scan(config, None)?;
    let mut candidates = deletable(all);
    candidates.sort_by(|a, b| a.modified_at.cmp(&b.modified_at).then_with(|| a.path.cmp(&b.path)));

    let mut outcome = PruneOutcome::default();
    for seg in candidates.iter().take(EMERGENCY_PRUNE_BOUND) {
        let current: UsageStats = usage::usage(&config.recordings_base_directory);
        if current.used_fraction <= target_fraction {
            break;
        }
        match std::fs::remove_file(&seg.path) {
            Ok(()) => {
                outcome.removed_count += 1;
                outcome.freed_bytes += seg.size_bytes;
            }
            Err(e) => warn!(path = %seg.path.display(), error = %e, "failed to emergency-prune segment"),
        }
    }

    if outcome.removed_count as usize >= EMERGENCY_PRUNE_BOUND {
        warn!(bound = EMERGENCY_PRUNE_BOUND, "emergency prune hit per-invocation bound");
    }
    info!(
        removed = outcome.removed_count,
        freed_bytes = outcome.freed_bytes,
        "emergency prune complete"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use camsentry_core::config::{Config, ConfigDocument, OutputCodecField, SourceDocument};
    use std::collections::BTreeMap;
    use std::fs;

    fn make_config(base: &std::path::Path, source_ids: &[&str]) -> Config {
        let mut sources = BTreeMap::new();
        for id in source_ids {
            fs::create_dir_all(base.join(id)).unwrap();
            sources.insert(
                id.to_string(),
                SourceDocument {
                    device: "/dev/video0".into(),
                    name: id.to_string(),
                    resolution: "640x480".into(),
                    framerate: 10,
                    input_codec: None,
                    enabled: true,
                },
            );
        }
        let doc = ConfigDocument {
            recordings_base_directory: base.to_path_buf(),
            segment_duration_seconds: 10,
            output_codec: OutputCodecField::Copy,
            sources,
            ..Default::default()
        };
        Config::from_document(doc).unwrap()
    }

    fn touch_segment(base: &std::path::Path, id: &str, stamp: &str, days_old: i64) {
        let path = base.join(id).join(format!("{id}_{stamp}.mp4"));
        fs::write(&path, b"x".repeat(1024)).unwrap();
        let mtime = std::time::SystemTime::now() - std::time::Duration::from_secs((days_old * 86400) as u64);
        fs::File::open(&path).unwrap().set_modified(mtime).unwrap();
    }

    #[test]
    fn prune_by_age_skips_most_recent_segment() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = make_config(dir.path(), &["cam1"]);
        touch_segment(dir.path(), "cam1", "20200101_000000", 40);
        touch_segment(dir.path(), "cam1", "20200102_000000", 1);

        let outcome = prune_by_age(&cfg, 30, false).unwrap();
        assert_eq!(outcome.removed_count, 1);
        assert!(dir.path().join("cam1").join("cam1_20200102_000000.mp4").exists());
        assert!(!dir.path().join("cam1").join("cam1_20200101_000000.mp4").exists());
    }

    #[test]
    fn prune_by_age_dry_run_leaves_files() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = make_config(dir.path(), &["cam1"]);
        touch_segment(dir.path(), "cam1", "20200101_000000", 40);
        touch_segment(dir.path(), "cam1", "20200102_000000", 35);

        let outcome = prune_by_age(&cfg, 30, true).unwrap();
        assert_eq!(outcome.removed_count, 1);
        assert!(dir.path().join("cam1").join("cam1_20200101_000000.mp4").exists());
    }

    #[test]
    fn prune_never_deletes_file_with_transcoding_companion() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = make_config(dir.path(), &["cam1"]);
        touch_segment(dir.path(), "cam1", "20200101_000000", 40);
        touch_segment(dir.path(), "cam1", "20200102_000000", 40);
        let temp_marker = dir
            .path()
            .join("cam1")
            .join("cam1_20200101_000000.mp4.transcoding");
        fs::write(&temp_marker, b"").unwrap();

        let outcome = prune_by_age(&cfg, 30, false).unwrap();
        assert_eq!(outcome.removed_count, 1);
        assert!(dir.path().join("cam1").join("cam1_20200101_000000.mp4").exists());
    }
}
