//! Stand-in for `ffmpeg` in end-to-end tests. Two modes, distinguished by
//! argv shape exactly as the real command lines differ:
//!
//! - segmenting capture mode (`-f segment ... <dir>/<id>_%Y%m%d_%H%M%S.mp4`):
//!   periodically writes a timestamped segment file until interrupted.
//! - single-shot transcode mode (`-i <input> -c:v <target> ... <output>`):
//!   writes one smaller output file and exits.
//!
//! Graceful shutdown mirrors the real encoder's contract: SIGINT causes a
//! clean exit(0) once the in-flight segment boundary is reached.

use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_sig: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

fn install_sigint_handler() {
    unsafe {
        libc::signal(libc::SIGINT, on_sigint as libc::sighandler_t);
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn main() {
    install_sigint_handler();
    let argv: Vec<String> = env::args().skip(1).collect();

    if argv.iter().any(|a| a == "segment") {
        run_segmenting_capture(&argv);
    } else {
        run_single_shot_transcode(&argv);
    }
}

fn arg_value(argv: &[String], flag: &str) -> Option<String> {
    argv.iter().position(|a| a == flag).and_then(|i| argv.get(i + 1)).cloned()
}

fn run_segmenting_capture(argv: &[String]) {
    let segment_secs: u64 = arg_value(argv, "-segment_time").and_then(|v| v.parse().ok()).unwrap_or(10);
    let pattern = argv.last().cloned().unwrap_or_default();
    let pattern_path = PathBuf::from(&pattern);
    let dir = pattern_path.parent().unwrap_or_else(|| std::path::Path::new(".")).to_path_buf();
    std::fs::create_dir_all(&dir).ok();

    let filename = pattern_path.file_name().unwrap_or_default().to_string_lossy().into_owned();
    let source_id = filename.split("_%Y").next().unwrap_or("cam").to_string();

    // Test-only acceleration: real captures segment on wall-clock time, but
    // a 10s+ sleep per segment would make every e2e test slow. Scaled down
    // unless a caller wants exact wall-clock behavior.
    let tick = Duration::from_millis(env_u64("FAKE_ENCODER_TICK_MS", segment_secs * 1000));

    loop {
        sleep_checking_interrupt(tick);
        if INTERRUPTED.load(Ordering::SeqCst) {
            break;
        }
        let now = chrono::Utc::now();
        let name = format!("{source_id}_{}.mp4", now.format("%Y%m%d_%H%M%S"));
        let path = dir.join(name);
        std::fs::write(path, b"fake segment data").ok();
    }
    std::process::exit(0);
}

fn run_single_shot_transcode(argv: &[String]) {
    if env::var("FAKE_ENCODER_FAIL").is_ok() {
        eprintln!("fake_encoder: forced transcode failure");
        std::process::exit(1);
    }

    let input = arg_value(argv, "-i").unwrap_or_default();
    let output = argv.last().cloned().unwrap_or_default();

    let input_size = std::fs::metadata(&input).map(|m| m.len()).unwrap_or(1_000_000);
    let ratio: f64 = env::var("FAKE_ENCODER_RATIO").ok().and_then(|v| v.parse().ok()).unwrap_or(0.5);
    let output_size = ((input_size as f64) * ratio).max(2048.0) as usize;

    std::fs::write(output, vec![0u8; output_size]).expect("fake_encoder must write output");
    std::process::exit(0);
}

fn sleep_checking_interrupt(total: Duration) {
    let step = Duration::from_millis(50);
    let mut slept = Duration::ZERO;
    while slept < total {
        if INTERRUPTED.load(Ordering::SeqCst) {
            return;
        }
        std::thread::sleep(step.min(total - slept));
        slept += step;
    }
}
