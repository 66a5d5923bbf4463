//! Source supervisor (component C3).
//!
//! One task per source, blocked on a command channel and on child wait, per
//! the concurrency model in spec §5. Commands to a single supervisor are
//! serialized by the channel, which is how `stop` immediately followed by
//! `start` is observed as the semantic `restart`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use camsentry_core::config::{Config, Source};
use camsentry_core::types::{SupervisorFailure, SupervisorState};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::child::{self, ChildHandle, LaunchError};

const INITIAL_BACKOFF: Duration = Duration::from_secs(2);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const BACKOFF_RESET_AFTER: Duration = Duration::from_secs(600);
const CRASH_WINDOW: Duration = Duration::from_secs(300);
const CRASH_LIMIT: u32 = 5;

#[derive(Debug, Clone, serde::Serialize)]
pub struct SupervisorStatus {
    pub source_id: String,
    pub state: SupervisorState,
    pub pid: Option<u32>,
    pub uptime_secs: Option<u64>,
    pub last_exit_code: Option<i32>,
    pub recent_stderr: Vec<String>,
    pub healthy: bool,
}

enum Command {
    Start { reply: oneshot::Sender<Result<(), SupervisorFailure>> },
    Stop { deadline: Duration, reply: oneshot::Sender<Result<(), SupervisorFailure>> },
    Restart { deadline: Duration, reply: oneshot::Sender<Result<u32, SupervisorFailure>> },
    Status { reply: oneshot::Sender<SupervisorStatus> },
    ClearRetryBudget,
    Shutdown { deadline: Duration },
}

/// Handle used by the fleet controller and HTTP layer to talk to one
/// supervisor task. Cloning is cheap; the channel fans in to a single actor.
#[derive(Clone)]
pub struct SupervisorHandle {
    source_id: String,
    tx: mpsc::Sender<Command>,
}

impl SupervisorHandle {
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub async fn start(&self) -> Result<(), SupervisorFailure> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Start { reply }).await;
        rx.await.unwrap_or(Err(SupervisorFailure::Busy))
    }

    pub async fn stop(&self, deadline: Duration) -> Result<(), SupervisorFailure> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stop { deadline, reply }).await;
        rx.await.unwrap_or(Err(SupervisorFailure::Busy))
    }

    /// Restart; returns the fresh child's pid on success.
    pub async fn restart(&self, deadline: Duration) -> Result<u32, SupervisorFailure> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Restart { deadline, reply }).await;
        rx.await.unwrap_or(Err(SupervisorFailure::Busy))
    }

    pub async fn status(&self) -> SupervisorStatus {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Status { reply }).await;
        rx.await.unwrap_or(SupervisorStatus {
            source_id: self.source_id.clone(),
            state: SupervisorState::Failed,
            pid: None,
            uptime_secs: None,
            last_exit_code: None,
            recent_stderr: Vec::new(),
            healthy: false,
        })
    }

    /// Clears the crash retry budget so a pinned-Failed supervisor can be
    /// restarted by an operator (spec §9's `restart_all` resolution).
    pub async fn clear_retry_budget(&self) {
        self.send(Command::ClearRetryBudget).await;
    }

    pub async fn shutdown(&self, deadline: Duration) {
        self.send(Command::Shutdown { deadline }).await;
    }

    async fn send(&self, cmd: Command) {
        let _ = self.tx.send(cmd).await;
    }
}

struct RestartTracker {
    backoff: Duration,
    running_since: Option<Instant>,
    recent_exits: Vec<Instant>,
}

impl RestartTracker {
    fn new() -> Self {
        Self {
            backoff: INITIAL_BACKOFF,
            running_since: None,
            recent_exits: Vec::new(),
        }
    }

    fn on_running(&mut self) {
        self.running_since = Some(Instant::now());
    }

    /// Records a crash and returns the backoff delay to apply before the
    /// next relaunch attempt, or `None` if the crash budget is exhausted.
    fn on_crash(&mut self) -> Option<Duration> {
        if let Some(since) = self.running_since {
            if since.elapsed() >= BACKOFF_RESET_AFTER {
                self.backoff = INITIAL_BACKOFF;
            }
        }
        self.running_since = None;

        let now = Instant::now();
        self.recent_exits.retain(|t| now.duration_since(*t) < CRASH_WINDOW);
        self.recent_exits.push(now);

        if self.recent_exits.len() >= CRASH_LIMIT as usize {
            return None;
        }

        let delay = self.backoff;
        self.backoff = (self.backoff * 2).min(MAX_BACKOFF);
        Some(delay)
    }

    fn clear(&mut self) {
        self.backoff = INITIAL_BACKOFF;
        self.running_since = None;
        self.recent_exits.clear();
    }
}

/// Spawn the supervisor task for one source and return its handle.
pub fn spawn(source: Source, config: Arc<Config>, encoder_exe: PathBuf) -> SupervisorHandle {
    let (tx, rx) = mpsc::channel(16);
    let source_id = source.id.clone();
    tokio::spawn(run(source, config, encoder_exe, rx));
    SupervisorHandle { source_id, tx }
}

async fn run(
    source: Source,
    config: Arc<Config>,
    encoder_exe: PathBuf,
    mut rx: mpsc::Receiver<Command>,
) {
    let mut state = SupervisorState::Stopped;
    let mut child: Option<ChildHandle> = None;
    let mut last_exit_code: Option<i32> = None;
    let mut tracker = RestartTracker::new();
    let mut shutting_down = false;

    loop {
        // Race the command channel against the live child's exit, if any.
        let wait_fut = async {
            if let Some(h) = child.as_mut() {
                Some(child::wait(h, Duration::from_secs(3600 * 24)).await)
            } else {
                std::future::pending().await
            }
        };

        tokio::select! {
            cmd = rx.recv() => {
                match cmd {
                    Some(Command::Start { reply }) => {
                        let result = do_start(&source, &config, &encoder_exe, &mut state, &mut child, &mut tracker).await;
                        let _ = reply.send(result);
                    }
                    Some(Command::Stop { deadline, reply }) => {
                        let result = do_stop(&mut state, &mut child, deadline).await;
                        let _ = reply.send(result);
                    }
                    Some(Command::Restart { deadline, reply }) => {
                        let _ = do_stop(&mut state, &mut child, deadline).await;
                        let result = do_start(&source, &config, &encoder_exe, &mut state, &mut child, &mut tracker).await;
                        let _ = reply.send(result.map(|_| child.as_ref().map(|c| c.pid).unwrap_or_default()));
                    }
                    Some(Command::Status { reply }) => {
                        let status = build_status(&source, state, child.as_mut(), last_exit_code).await;
                        let _ = reply.send(status);
                    }
                    Some(Command::ClearRetryBudget) => {
                        tracker.clear();
                    }
                    Some(Command::Shutdown { deadline }) => {
                        shutting_down = true;
                        let _ = do_stop(&mut state, &mut child, deadline).await;
                        break;
                    }
                    None => break,
                }
            }
            exit_code = wait_fut, if child.is_some() => {
                if let Some(code) = exit_code {
                    last_exit_code = code;
                    if state == SupervisorState::Running {
                        warn!(source_id = %source.id, ?code, "capture child exited unexpectedly");
                        state = SupervisorState::Failed;
                        child = None;
                        if !shutting_down {
                            if let Some(delay) = tracker.on_crash() {
                                let handle_src = source.clone();
                                let handle_cfg = config.clone();
                                let handle_exe = encoder_exe.clone();
                                tokio::time::sleep(delay).await;
                                let mut dummy_state = SupervisorState::Failed;
                                let mut dummy_child = None;
                                let _ = do_start(&handle_src, &handle_cfg, &handle_exe, &mut dummy_state, &mut dummy_child, &mut tracker).await;
                                state = dummy_state;
                                child = dummy_child;
                            } else {
                                warn!(source_id = %source.id, "crash retry budget exhausted, pinned in Failed");
                            }
                        }
                    } else {
                        child = None;
                    }
                }
            }
        }
    }
}

async fn do_start(
    source: &Source,
    config: &Config,
    encoder_exe: &std::path::Path,
    state: &mut SupervisorState,
    child: &mut Option<ChildHandle>,
    tracker: &mut RestartTracker,
) -> Result<(), SupervisorFailure> {
    match *state {
        SupervisorState::Running => return Ok(()),
        SupervisorState::Starting | SupervisorState::Stopping => {
            return Err(SupervisorFailure::Busy);
        }
        SupervisorState::Stopped | SupervisorState::Failed => {}
    }

    *state = SupervisorState::Starting;
    tokio::fs::create_dir_all(&source.segment_dir).await.ok();

    match child::launch(encoder_exe, config, source).await {
        Ok(handle) => {
            info!(source_id = %source.id, pid = handle.pid, "capture child running");
            *child = Some(handle);
            *state = SupervisorState::Running;
            tracker.on_running();
            Ok(())
        }
        Err(LaunchError::ExecutableNotFound(path)) => {
            *state = SupervisorState::Failed;
            Err(SupervisorFailure::LaunchFailed {
                reason: format!("executable not found: {}", path.display()),
            })
        }
        Err(LaunchError::Launch(reason)) => {
            *state = SupervisorState::Failed;
            Err(SupervisorFailure::LaunchFailed { reason })
        }
    }
}

async fn do_stop(
    state: &mut SupervisorState,
    child: &mut Option<ChildHandle>,
    deadline: Duration,
) -> Result<(), SupervisorFailure> {
    if *state == SupervisorState::Stopped {
        return Ok(());
    }

    *state = SupervisorState::Stopping;

    if let Some(handle) = child.as_mut() {
        let _ = child::signal_interrupt(handle);
        if child::wait(handle, deadline).await.is_none() {
            let _ = child::signal_kill(handle);
            let _ = child::wait(handle, Duration::from_secs(5)).await;
        }
    }

    *child = None;
    *state = SupervisorState::Stopped;
    Ok(())
}

async fn build_status(
    source: &Source,
    state: SupervisorState,
    child: Option<&mut ChildHandle>,
    last_exit_code: Option<i32>,
) -> SupervisorStatus {
    let (pid, uptime, stderr, alive) = match child {
        Some(h) => (Some(h.pid), Some(h.uptime_secs()), h.last_lines(32).await, child::is_alive(h)),
        None => (None, None, Vec::new(), false),
    };
    SupervisorStatus {
        source_id: source.id.clone(),
        state,
        pid,
        uptime_secs: uptime,
        last_exit_code,
        recent_stderr: stderr,
        healthy: state == SupervisorState::Running && alive,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_max() {
        let mut tracker = RestartTracker::new();
        let mut delays = Vec::new();
        for _ in 0..5 {
            delays.push(tracker.on_crash().unwrap());
        }
        // fifth crash in the window hits the limit and returns None instead.
        assert_eq!(delays, vec![
            Duration::from_secs(2),
            Duration::from_secs(4),
            Duration::from_secs(8),
            Duration::from_secs(16),
            Duration::from_secs(32),
        ]);
        assert!(tracker.on_crash().is_none());
    }

    #[test]
    fn backoff_caps_at_max_delay() {
        let mut tracker = RestartTracker::new();
        tracker.backoff = Duration::from_secs(50);
        let delay = tracker.on_crash().unwrap();
        assert_eq!(delay, Duration::from_secs(50));
        assert_eq!(tracker.backoff, MAX_BACKOFF);
    }

    #[test]
    fn clear_resets_crash_window_and_backoff() {
        let mut tracker = RestartTracker::new();
        for _ in 0..4 {
            tracker.on_crash();
        }
        tracker.clear();
        assert_eq!(tracker.backoff, INITIAL_BACKOFF);
        assert!(tracker.on_crash().is_some());
    }
}
