//! Scheduling gate (spec §4.7 "Scheduling gate").
//!
//! Evaluated in order before every transcode attempt; the first failing
//! check is reported so the engine logs a specific reason at debug level
//! instead of a generic "gate held".

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use camsentry_core::config::Config;
use sysinfo::System;

/// Sampling window for the CPU gate. 1-5 s is typical for this kind of
/// advisory check; the exact value has no effect on correctness.
const CPU_SAMPLE_WINDOW: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateFailure {
    Disabled,
    OutOfSchedule,
    CpuTooHigh,
    IoWaitTooHigh,
    FreeSpaceTooLow,
    ShuttingDown,
}

impl GateFailure {
    pub fn reason(self) -> &'static str {
        match self {
            Self::Disabled => "transcoder disabled",
            Self::OutOfSchedule => "outside schedule window",
            Self::CpuTooHigh => "host CPU usage above threshold",
            Self::IoWaitTooHigh => "host I/O wait above threshold",
            Self::FreeSpaceTooLow => "recordings volume below minimum free space",
            Self::ShuttingDown => "fleet is shutting down",
        }
    }
}

/// Sample host CPU usage (percent, 0..100) over a short window.
pub async fn sample_cpu_percent() -> f64 {
    let mut sys = System::new();
    sys.refresh_cpu_usage();
    tokio::time::sleep(CPU_SAMPLE_WINDOW).await;
    sys.refresh_cpu_usage();
    sys.global_cpu_usage() as f64
}

/// Sample host I/O-wait percentage since boot by diffing `/proc/stat`
/// ticks across the same window used for the CPU sample. Returns `0.0` on
/// platforms without `/proc/stat`, making the gate a no-op there.
pub fn sample_io_wait_percent(before: &CpuTicks, after: &CpuTicks) -> f64 {
    let total_delta = after.total().saturating_sub(before.total());
    if total_delta == 0 {
        return 0.0;
    }
    let iowait_delta = after.iowait.saturating_sub(before.iowait);
    (iowait_delta as f64 / total_delta as f64) * 100.0
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CpuTicks {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
}

impl CpuTicks {
    fn total(&self) -> u64 {
        self.user + self.nice + self.system + self.idle + self.iowait + self.irq + self.softirq
    }

    pub fn read() -> Self {
        let Ok(content) = std::fs::read_to_string("/proc/stat") else {
            return Self::default();
        };
        let Some(line) = content.lines().find(|l| l.starts_with("cpu ")) else {
            return Self::default();
        };
        let fields: Vec<u64> = line
            .split_whitespace()
            .skip(1)
            .filter_map(|f| f.parse().ok())
            .collect();
        Self {
            user: fields.first().copied().unwrap_or(0),
            nice: fields.get(1).copied().unwrap_or(0),
            system: fields.get(2).copied().unwrap_or(0),
            idle: fields.get(3).copied().unwrap_or(0),
            iowait: fields.get(4).copied().unwrap_or(0),
            irq: fields.get(5).copied().unwrap_or(0),
            softirq: fields.get(6).copied().unwrap_or(0),
        }
    }
}

/// Evaluate the six ordered checks from spec §4.7. Stops at the first
/// failure.
pub async fn evaluate(
    config: &Config,
    enabled: &AtomicBool,
    shutting_down: &AtomicBool,
) -> Result<(), GateFailure> {
    if !enabled.load(Ordering::Relaxed) {
        return Err(GateFailure::Disabled);
    }

    let now_minutes = local_minutes_since_midnight();
    if !config.transcoder.schedule.contains(now_minutes) {
        return Err(GateFailure::OutOfSchedule);
    }

    let cpu = sample_cpu_percent().await;
    if cpu > config.transcoder.max_cpu_percent {
        return Err(GateFailure::CpuTooHigh);
    }

    let before = CpuTicks::read();
    tokio::time::sleep(Duration::from_millis(200)).await;
    let after = CpuTicks::read();
    let io_wait = sample_io_wait_percent(&before, &after);
    if io_wait > config.transcoder.max_io_wait {
        return Err(GateFailure::IoWaitTooHigh);
    }

    let usage = camsentry_storage::usage(&config.recordings_base_directory);
    let free_gb = usage.free_bytes / (1024 * 1024 * 1024);
    if free_gb < config.transcoder.min_free_gb as u64 {
        return Err(GateFailure::FreeSpaceTooLow);
    }

    if shutting_down.load(Ordering::Relaxed) {
        return Err(GateFailure::ShuttingDown);
    }

    Ok(())
}

fn local_minutes_since_midnight() -> u32 {
    let now = chrono::Local::now();
    use chrono::Timelike;
    now.hour() * 60 + now.minute()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_wait_percent_from_tick_delta() {
        let before = CpuTicks { user: 100, idle: 800, iowait: 10, ..Default::default() };
        let after = CpuTicks { user: 150, idle: 850, iowait: 60, ..Default::default() };
        let pct = sample_io_wait_percent(&before, &after);
        // delta total = 50 + 50 + 50 = 150, delta iowait = 50 -> ~33.3%
        assert!((pct - 33.333).abs() < 0.1);
    }

    #[test]
    fn io_wait_zero_when_no_tick_delta() {
        let t = CpuTicks::default();
        assert_eq!(sample_io_wait_percent(&t, &t), 0.0);
    }
}
