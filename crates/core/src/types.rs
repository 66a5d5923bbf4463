use serde::{Deserialize, Serialize};

/// A source supervisor's lifecycle state (spec §3 "Supervisor state").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl SupervisorState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input codec a source's capture device emits, per the config schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InputCodec {
    H264,
    Mjpeg,
    Raw,
}

impl InputCodec {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::H264 => "h264",
            Self::Mjpeg => "mjpeg",
            Self::Raw => "raw",
        }
    }
}

impl std::fmt::Display for InputCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Global output codec selector for capture children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputCodec {
    Copy,
    H264Target,
    H265Target,
}

impl OutputCodec {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::H264Target => "h264-target",
            Self::H265Target => "h265-target",
        }
    }
}

impl std::fmt::Display for OutputCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure taxonomy surfaced by a source supervisor (spec §4.3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SupervisorFailure {
    LaunchFailed { reason: String },
    UnexpectedExit { code: Option<i32> },
    Busy,
}

impl std::fmt::Display for SupervisorFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LaunchFailed { reason } => write!(f, "launch failed: {reason}"),
            Self::UnexpectedExit { code } => write!(f, "unexpected exit (code {code:?})"),
            Self::Busy => write!(f, "busy"),
        }
    }
}
