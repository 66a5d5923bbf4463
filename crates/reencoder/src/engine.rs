//! Re-encoder engine (component C6): main loop tying together the
//! scheduling gate, candidate selection, execution/verification, atomic
//! swap, and persisted statistics.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use camsentry_core::config::Config;
use camsentry_core::segment::TranscoderStats;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::candidate::select_candidates;
use crate::execute::{process_one, Progress, TranscodeOutcomeError};
use crate::gate::{self, GateFailure};

const POLL_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub enabled: bool,
    pub running: bool,
    pub in_schedule: bool,
    pub progress: Option<Progress>,
    pub stats: TranscoderStats,
}

/// Handle used by the control surface to flip the enable toggle and read a
/// status snapshot.
#[derive(Clone)]
pub struct ReencoderHandle {
    enabled: Arc<AtomicBool>,
    shutting_down: Arc<AtomicBool>,
    progress: Arc<Mutex<Option<Progress>>>,
    stats: Arc<Mutex<TranscoderStats>>,
    config: Arc<Config>,
}

impl ReencoderHandle {
    /// Flip the atomic enable flag on. Does not interrupt a run in
    /// progress (there is none to interrupt when disabled).
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    /// Flip the atomic enable flag off. Per design, an in-flight file
    /// completes; the engine quiesces only once idle.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    pub fn request_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);
    }

    pub async fn status(&self) -> EngineStatus {
        let progress = self.progress.lock().await.clone();
        let stats = self.stats.lock().await.clone();
        let now_minutes = {
            use chrono::Timelike;
            let now = chrono::Local::now();
            now.hour() * 60 + now.minute()
        };
        EngineStatus {
            enabled: self.enabled.load(Ordering::Relaxed),
            running: progress.is_some(),
            in_schedule: self.config.transcoder.schedule.contains(now_minutes),
            progress,
            stats,
        }
    }
}

/// Spawn the re-encoder's background task. Runs startup crash recovery
/// before entering the main loop.
pub async fn spawn(
    config: Arc<Config>,
    encoder_exe: PathBuf,
    probe_exe: PathBuf,
) -> ReencoderHandle {
    if let Err(e) = crate::reconcile::reconcile_startup(&config).await {
        error!(error = %e, "startup re-encode reconciliation failed");
    }

    let stats = match TranscoderStats::load(&config.recordings_base_directory).await {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "failed to load transcoder statistics, starting fresh");
            TranscoderStats::default()
        }
    };

    let handle = ReencoderHandle {
        enabled: Arc::new(AtomicBool::new(config.transcoder.enabled)),
        shutting_down: Arc::new(AtomicBool::new(false)),
        progress: Arc::new(Mutex::new(None)),
        stats: Arc::new(Mutex::new(stats)),
        config: config.clone(),
    };

    let handle_for_task = handle.clone();
    tokio::spawn(async move {
        run(config, encoder_exe, probe_exe, handle_for_task).await;
    });

    handle
}

async fn run(config: Arc<Config>, encoder_exe: PathBuf, probe_exe: PathBuf, handle: ReencoderHandle) {
    loop {
        if handle.shutting_down.load(Ordering::Relaxed) {
            break;
        }

        if let Err(failure) = gate::evaluate(&config, &handle.enabled, &handle.shutting_down).await {
            if failure == GateFailure::ShuttingDown {
                break;
            }
            debug!(reason = failure.reason(), "scheduling gate held");
            tokio::time::sleep(POLL_INTERVAL).await;
            continue;
        }

        let target_codec = match config.transcoder.output_codec.as_str() {
            "h265-target" => "hevc",
            _ => "h264",
        };
        let min_age = chrono::Duration::days(config.transcoder.min_age_days as i64);

        let (candidates, counters) =
            match select_candidates(&config, &probe_exe, min_age, target_codec).await {
                Ok(c) => c,
                Err(e) => {
                    error!(error = %e, "candidate scan failed");
                    tokio::time::sleep(POLL_INTERVAL).await;
                    continue;
                }
            };

        info!(
            scanned = counters.scanned,
            too_new = counters.too_new,
            already_transcoded = counters.already_transcoded,
            in_progress = counters.in_progress,
            wrong_codec = counters.wrong_codec,
            eligible = counters.eligible,
            "re-encode candidate scan complete"
        );

        let Some(segment) = candidates.into_iter().next() else {
            tokio::time::sleep(POLL_INTERVAL).await;
            continue;
        };

        let outcome = process_one(
            &config,
            &encoder_exe,
            &probe_exe,
            &segment.path,
            &segment.source_id,
            handle.shutting_down.clone(),
            handle.progress.clone(),
        )
        .await;

        let mut stats = handle.stats.lock().await;
        match outcome {
            Ok(result) => {
                stats.record_success(result.original_size, result.new_size);
            }
            Err(TranscodeOutcomeError::Cancelled) => {
                info!(path = %segment.path.display(), "re-encode cancelled by shutdown");
            }
            Err(e) => {
                warn!(path = %segment.path.display(), error = %e, "re-encode attempt failed");
                stats.record_failure(e.to_string());
            }
        }
        if let Err(e) = stats.save(&config.recordings_base_directory).await {
            error!(error = %e, "failed to persist transcoder statistics");
        }
        drop(stats);

        if let Err(e) = crate::reconcile::sweep_deferred_deletes(&config).await {
            error!(error = %e, "deferred-delete sweep failed");
        }
    }
}
