//! Candidate selection (spec §4.7 "Candidate selection").

use camsentry_core::config::Config;
use camsentry_core::segment::{self, Segment, SidecarKind};
use camsentry_storage::scan;
use serde::Serialize;

use crate::probe::{self, MediaInfo, ProbeError};

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanCounters {
    pub scanned: u64,
    pub too_new: u64,
    pub already_transcoded: u64,
    pub in_progress: u64,
    pub wrong_codec: u64,
    pub eligible: u64,
}

/// Return candidates oldest-first, along with the aggregate counters logged
/// by the scan (spec §4.7).
pub async fn select_candidates(
    config: &Config,
    probe_exe: &std::path::Path,
    min_age: chrono::Duration,
    target_codec: &str,
) -> std::io::Result<(Vec<Segment>, ScanCounters)> {
    let mut counters = ScanCounters::default();
    let all = scan(config, None)?;
    counters.scanned = all.len() as u64;

    let cutoff = chrono::Utc::now() - min_age;
    let mut candidates = Vec::new();

    for seg in all {
        if seg.modified_at > cutoff {
            counters.too_new += 1;
            continue;
        }
        let transcoded = segment::sidecar_path(&seg.path, SidecarKind::Transcoded);
        if transcoded.exists() {
            counters.already_transcoded += 1;
            continue;
        }
        let transcoding = segment::sidecar_path(&seg.path, SidecarKind::Transcoding);
        if transcoding.exists() {
            counters.in_progress += 1;
            continue;
        }

        match probe::probe(probe_exe, &seg.path).await {
            Ok(MediaInfo { codec, .. }) if codec == target_codec => {
                counters.wrong_codec += 1;
                continue;
            }
            Ok(_) => {}
            Err(ProbeError::ExecutableNotFound(_)) => return Ok((Vec::new(), counters)),
            Err(e) => {
                tracing::warn!(path = %seg.path.display(), error = %e, "skipping unprobeable segment");
                continue;
            }
        }

        counters.eligible += 1;
        candidates.push(seg);
    }

    candidates.sort_by(|a, b| a.modified_at.cmp(&b.modified_at).then_with(|| a.path.cmp(&b.path)));
    Ok((candidates, counters))
}
