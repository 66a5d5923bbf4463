//! Startup crash recovery and the deferred-delete sweep (spec §4.7).

use camsentry_core::config::Config;
use camsentry_core::segment::{self, SidecarKind, TranscodeMarker};
use tracing::warn;

/// Bound on deletions per deferred-delete sweep, to avoid a long stall when
/// many markers come due at once.
const SWEEP_BOUND: usize = 200;

/// Reconcile partial re-encode states left behind by a crash. Idempotent:
/// running it again on an already-consistent tree makes no changes.
pub async fn reconcile_startup(config: &Config) -> std::io::Result<()> {
    for source in &config.sources {
        let entries = match std::fs::read_dir(&source.segment_dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        for entry in entries {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
            if let Some(stem) = name.strip_suffix(".transcoding") {
                let segment_path = source.segment_dir.join(stem);
                let original = segment::sidecar_path(&segment_path, SidecarKind::Original);
                if !original.exists() {
                    warn!(path = %path.display(), "deleting orphaned .transcoding temp from crash recovery");
                    tokio::fs::remove_file(&path).await.ok();
                }
            } else if let Some(stem) = name.strip_suffix(".original") {
                let segment_path = source.segment_dir.join(stem);
                let marker = segment::sidecar_path(&segment_path, SidecarKind::Transcoded);
                if !marker.exists() && segment_path.exists() {
                    warn!(path = %segment_path.display(), "synthesizing transcode marker after incomplete swap");
                    let original_size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                    let new_size = std::fs::metadata(&segment_path).map(|m| m.len()).unwrap_or(0);
                    let synthesized = TranscodeMarker::new(
                        original_size,
                        new_size,
                        path.clone(),
                        config.transcoder.keep_original_days,
                    );
                    synthesized.write_atomic(&marker).await.ok();
                }
            } else if let Some(stem) = name.strip_suffix(".transcoded") {
                let segment_path = source.segment_dir.join(stem);
                let original = segment::sidecar_path(&segment_path, SidecarKind::Original);
                if !original.exists() {
                    warn!(path = %path.display(), "deleting orphaned transcode marker");
                    tokio::fs::remove_file(&path).await.ok();
                }
            }
        }
    }
    Ok(())
}

/// Delete any `.original` whose paired marker's `delete_after` has passed.
/// Bounded to `SWEEP_BOUND` deletions; idempotent when run with no clock
/// advance.
pub async fn sweep_deferred_deletes(config: &Config) -> std::io::Result<u64> {
    let mut removed = 0u64;
    'sources: for source in &config.sources {
        let entries = match std::fs::read_dir(&source.segment_dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        for entry in entries {
            if removed as usize >= SWEEP_BOUND {
                break 'sources;
            }
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
            let Some(stem) = name.strip_suffix(".transcoded") else { continue };

            let marker = match TranscodeMarker::read(&path).await {
                Ok(m) => m,
                Err(_) => continue,
            };
            if chrono::Utc::now() < marker.delete_after {
                continue;
            }

            let segment_path = source.segment_dir.join(stem);
            let original = segment::sidecar_path(&segment_path, SidecarKind::Original);
            if original.exists() {
                tokio::fs::remove_file(&original).await.ok();
            }
            tokio::fs::remove_file(&path).await.ok();
            removed += 1;
        }
    }
    Ok(removed)
}
