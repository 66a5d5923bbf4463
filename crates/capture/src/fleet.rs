//! Fleet controller (component C4).
//!
//! Owns the registry of per-source supervisors and the bulk operations that
//! fan out across them. A single mutex serializes fleet-wide mutations
//! (`start_all`/`stop_all`/`restart_all`) so two overlapping bulk calls can't
//! interleave; per-source calls still go straight to the supervisor's own
//! channel and are unaffected by this lock.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use camsentry_core::config::Config;
use camsentry_core::error::ApiError;
use camsentry_core::types::{SupervisorFailure, SupervisorState};
use tokio::sync::Mutex;

use crate::supervisor::{self, SupervisorHandle, SupervisorStatus};

fn to_api_error(f: SupervisorFailure) -> ApiError {
    match f {
        SupervisorFailure::Busy => ApiError::Busy(f.to_string()),
        other => ApiError::Internal(other.to_string()),
    }
}

const SETTLE_DELAY: Duration = Duration::from_secs(2);
const DEFAULT_DEADLINE: Duration = Duration::from_secs(10);

/// Outcome of one source within a bulk fleet operation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SourceOutcome {
    pub source_id: String,
    pub ok: bool,
    pub error: Option<String>,
}

pub struct Fleet {
    supervisors: BTreeMap<String, SupervisorHandle>,
    config: Arc<Config>,
    bulk_lock: Mutex<()>,
}

impl Fleet {
    /// Spawn one supervisor per configured source (enabled or not — a
    /// disabled source simply starts life in `Stopped` and is never asked
    /// to start).
    pub fn new(config: Arc<Config>, encoder_exe: PathBuf) -> Self {
        let mut supervisors = BTreeMap::new();
        for source in &config.sources {
            let handle = supervisor::spawn(source.clone(), config.clone(), encoder_exe.clone());
            supervisors.insert(source.id.clone(), handle);
        }
        Self {
            supervisors,
            config,
            bulk_lock: Mutex::new(()),
        }
    }

    /// True if the given source is enabled in configuration. Unknown ids are
    /// treated as not enabled.
    fn is_enabled(&self, id: &str) -> bool {
        self.config.source(id).map(|s| s.enabled).unwrap_or(false)
    }

    pub fn source_ids(&self) -> Vec<String> {
        self.supervisors.keys().cloned().collect()
    }

    fn handle(&self, id: &str) -> Result<&SupervisorHandle, ApiError> {
        self.supervisors
            .get(id)
            .ok_or_else(|| ApiError::NotFound(format!("unknown source `{id}`")))
    }

    pub async fn start(&self, id: &str) -> Result<(), ApiError> {
        self.handle(id)?.start().await.map_err(to_api_error)
    }

    pub async fn stop(&self, id: &str, deadline: Duration) -> Result<(), ApiError> {
        self.handle(id)?.stop(deadline).await.map_err(to_api_error)
    }

    pub async fn restart(&self, id: &str, deadline: Duration) -> Result<u32, ApiError> {
        self.handle(id)?.restart(deadline).await.map_err(to_api_error)
    }

    pub async fn status(&self, id: &str) -> Result<SupervisorStatus, ApiError> {
        Ok(self.handle(id)?.status().await)
    }

    pub async fn snapshot(&self) -> Vec<SupervisorStatus> {
        let mut out = Vec::with_capacity(self.supervisors.len());
        for handle in self.supervisors.values() {
            out.push(handle.status().await);
        }
        out
    }

    /// Start every *enabled* source, in parallel, aggregating per-source
    /// results. Not atomic: a failure on one source does not roll back
    /// others.
    pub async fn start_all(&self) -> Vec<SourceOutcome> {
        let _guard = self.bulk_lock.lock().await;
        let futures = self
            .supervisors
            .iter()
            .filter(|(id, _)| self.is_enabled(id))
            .map(|(id, handle)| {
                let id = id.clone();
                async move {
                    match handle.start().await {
                        Ok(()) => SourceOutcome { source_id: id, ok: true, error: None },
                        Err(e) => SourceOutcome { source_id: id, ok: false, error: Some(e.to_string()) },
                    }
                }
            });
        futures::future::join_all(futures).await
    }

    /// Stop every *enabled* source, in parallel, aggregating per-source
    /// results.
    pub async fn stop_all(&self, deadline: Duration) -> Vec<SourceOutcome> {
        let _guard = self.bulk_lock.lock().await;
        let futures = self
            .supervisors
            .iter()
            .filter(|(id, _)| self.is_enabled(id))
            .map(|(id, handle)| {
                let id = id.clone();
                async move {
                    match handle.stop(deadline).await {
                        Ok(()) => SourceOutcome { source_id: id, ok: true, error: None },
                        Err(e) => SourceOutcome { source_id: id, ok: false, error: Some(e.to_string()) },
                    }
                }
            });
        futures::future::join_all(futures).await
    }

    /// Stop every *enabled* source, wait for the fleet to settle, then start
    /// every enabled source again. Also clears each supervisor's crash retry
    /// budget, so an operator-initiated fleet restart always gets a fresh
    /// backoff schedule rather than inheriting whatever budget pre-existed.
    pub async fn restart_all(&self, deadline: Duration) -> Vec<SourceOutcome> {
        let _guard = self.bulk_lock.lock().await;

        let enabled_handles = || {
            self.supervisors
                .iter()
                .filter(|(id, _)| self.is_enabled(id))
                .map(|(_, h)| h)
        };

        let stop_futures = enabled_handles().map(|h| h.stop(deadline));
        let _ = futures::future::join_all(stop_futures).await;

        tokio::time::sleep(SETTLE_DELAY).await;

        for handle in enabled_handles() {
            handle.clear_retry_budget().await;
        }

        let futures = self
            .supervisors
            .iter()
            .filter(|(id, _)| self.is_enabled(id))
            .map(|(id, handle)| {
                let id = id.clone();
                async move {
                    match handle.start().await {
                        Ok(()) => SourceOutcome { source_id: id, ok: true, error: None },
                        Err(e) => SourceOutcome { source_id: id, ok: false, error: Some(e.to_string()) },
                    }
                }
            });
        futures::future::join_all(futures).await
    }

    /// Stop every source with the default graceful deadline; used during
    /// process shutdown.
    pub async fn shutdown(&self) {
        let futures = self
            .supervisors
            .values()
            .map(|h| h.shutdown(DEFAULT_DEADLINE));
        futures::future::join_all(futures).await;
    }

    pub async fn healthy_count(&self) -> (usize, usize) {
        let snapshot = self.snapshot().await;
        let total = snapshot.len();
        let healthy = snapshot
            .iter()
            .filter(|s| s.state == SupervisorState::Running && s.healthy)
            .count();
        (healthy, total)
    }
}
