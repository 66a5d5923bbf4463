//! Stand-in for `ffprobe` in end-to-end tests. Reports codec/resolution/
//! framerate/duration from environment variables rather than inspecting real
//! media, mirroring the env-var-driven mock in the ffui pack
//! (`tests/ffui_mock_ffmpeg.rs`). A file whose path ends in `.transcoding`
//! is treated as the re-encoder's temp output and reports the target codec;
//! anything else reports the source codec.

use std::env;

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn main() {
    let argv: Vec<String> = env::args().skip(1).collect();

    // Integrity-check invocation: `-v error -i <path>`. Succeed silently
    // unless FAKE_PROBE_INTEGRITY_FAIL is set.
    if argv.iter().any(|a| a == "error") && !argv.iter().any(|a| a == "-print_format") {
        if env::var("FAKE_PROBE_INTEGRITY_FAIL").is_ok() {
            eprintln!("fake_probe: integrity check forced failure");
            std::process::exit(1);
        }
        std::process::exit(0);
    }

    let path = argv.last().cloned().unwrap_or_default();
    let is_temp_output = path.ends_with(".transcoding");

    let codec = if is_temp_output {
        env_or("FAKE_PROBE_TARGET_CODEC", "hevc")
    } else {
        env_or("FAKE_PROBE_SOURCE_CODEC", "h264")
    };
    let width: u32 = env_or("FAKE_PROBE_WIDTH", "1920").parse().unwrap_or(1920);
    let height: u32 = env_or("FAKE_PROBE_HEIGHT", "1080").parse().unwrap_or(1080);
    let framerate = env_or("FAKE_PROBE_FRAMERATE", "30/1");
    let duration = env_or("FAKE_PROBE_DURATION", "10.0");

    let json = format!(
        r#"{{"format":{{"duration":"{duration}"}},"streams":[{{"codec_type":"video","codec_name":"{codec}","width":{width},"height":{height},"r_frame_rate":"{framerate}"}}]}}"#
    );
    print!("{json}");
}
