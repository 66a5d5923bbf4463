//! Health monitor (component C7): a single periodic tick performing, in
//! order, liveness confirmation, emergency pruning, age-based pruning, the
//! re-encoder's deferred-delete sweep, and a structured status line.

use std::sync::Arc;
use std::time::Duration;

use camsentry_capture::fleet::Fleet;
use camsentry_core::config::Config;
use camsentry_core::logring::LogRing;
use tracing::{info, warn};

const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(10);

/// Lower threshold (relative to the configured emergency threshold) at
/// which routine age-based pruning is invoked on every tick, rather than
/// waiting for the emergency path.
const AGE_PRUNE_HEADROOM_FRACTION: f64 = 0.1;

pub fn spawn(config: Arc<Config>, fleet: Arc<Fleet>, log_ring: Arc<LogRing>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run(config, fleet, log_ring))
}

async fn run(config: Arc<Config>, fleet: Arc<Fleet>, log_ring: Arc<LogRing>) {
    let mut interval = tokio::time::interval(DEFAULT_TICK_INTERVAL);
    loop {
        interval.tick().await;
        tick(&config, &fleet, &log_ring).await;
    }
}

async fn tick(config: &Config, fleet: &Fleet, log_ring: &LogRing) {
    // 1. Confirm supervisor liveness. The supervisors themselves already
    // react to an unexpected exit via their own restart policy; this read
    // is the monitor's confirmatory pass over the fleet-wide picture.
    let (healthy, total) = fleet.healthy_count().await;
    if healthy < total {
        warn!(healthy, total, "fleet health check found unhealthy sources");
    }

    let mut emergency_removed = 0u64;
    let mut age_removed = 0u64;

    if config.storage.cleanup_enabled {
        let usage = camsentry_storage::usage(&config.recordings_base_directory);

        // 2. Emergency prune.
        if usage.used_fraction >= config.storage.emergency_used_fraction {
            info!(
                used_fraction = usage.used_fraction,
                target = config.storage.emergency_target_fraction,
                "disk usage over emergency threshold, running emergency prune"
            );
            match camsentry_storage::emergency_prune(config, config.storage.emergency_target_fraction) {
                Ok(outcome) => {
                    emergency_removed = outcome.removed_count;
                    let after = camsentry_storage::usage(&config.recordings_base_directory);
                    info!(
                        removed = outcome.removed_count,
                        freed_bytes = outcome.freed_bytes,
                        used_fraction_after = after.used_fraction,
                        "emergency prune finished"
                    );
                }
                Err(e) => warn!(error = %e, "emergency prune failed"),
            }
        } else if usage.used_fraction
            >= config.storage.emergency_used_fraction - AGE_PRUNE_HEADROOM_FRACTION
        {
            // 3. Routine age-based prune, triggered a bit below the
            // emergency line so pruning is proactive rather than reactive.
            match camsentry_storage::prune_by_age(config, config.storage.max_age_days, false) {
                Ok(outcome) => age_removed = outcome.removed_count,
                Err(e) => warn!(error = %e, "age-based prune failed"),
            }
        }
    }

    // 4. Deferred-delete sweep.
    let deferred_removed = match camsentry_reencoder::reconcile::sweep_deferred_deletes(config).await {
        Ok(n) => n,
        Err(e) => {
            warn!(error = %e, "deferred-delete sweep failed");
            0
        }
    };

    // 5. One structured status line into the log ring.
    let message = format!(
        "health tick: {healthy}/{total} sources healthy, emergency_removed={emergency_removed}, age_removed={age_removed}, deferred_removed={deferred_removed}"
    );
    info!("{message}");
    log_ring.push("info", message);
}
