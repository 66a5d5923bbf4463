//! Configuration model and loader (component C1).
//!
//! Parses the TOML document described in the external interface spec into a
//! typed, validated snapshot. The snapshot is immutable for the process
//! lifetime; runtime toggles (transcoder enable/disable) live beside it as
//! atomics, not as config mutation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::{InputCodec, OutputCodec};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config field `{field}`: {reason}")]
    Invalid { field: String, reason: String },
}

/// Raw document shape, mirroring the TOML schema field-for-field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigDocument {
    pub recordings_base_directory: PathBuf,
    pub segment_duration_seconds: u32,
    pub output_codec: OutputCodecField,
    pub sources: BTreeMap<String, SourceDocument>,
    pub storage: StorageDocument,
    pub transcoder: TranscoderDocument,
    pub http: HttpDocument,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputCodecField {
    Copy,
    H264Target,
    H265Target,
}

impl Default for OutputCodecField {
    fn default() -> Self {
        Self::Copy
    }
}

impl From<OutputCodecField> for OutputCodec {
    fn from(v: OutputCodecField) -> Self {
        match v {
            OutputCodecField::Copy => OutputCodec::Copy,
            OutputCodecField::H264Target => OutputCodec::H264Target,
            OutputCodecField::H265Target => OutputCodec::H265Target,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceDocument {
    pub device: PathBuf,
    pub name: String,
    pub resolution: String,
    pub framerate: u32,
    pub input_codec: Option<InputCodecField>,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InputCodecField {
    H264,
    Mjpeg,
    Raw,
}

impl From<InputCodecField> for InputCodec {
    fn from(v: InputCodecField) -> Self {
        match v {
            InputCodecField::H264 => InputCodec::H264,
            InputCodecField::Mjpeg => InputCodec::Mjpeg,
            InputCodecField::Raw => InputCodec::Raw,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageDocument {
    pub cleanup_enabled: bool,
    pub max_age_days: u32,
    pub emergency_used_fraction: f64,
    pub emergency_target_fraction: f64,
}

impl Default for StorageDocument {
    fn default() -> Self {
        Self {
            cleanup_enabled: true,
            max_age_days: 30,
            emergency_used_fraction: 0.95,
            emergency_target_fraction: 0.85,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscoderDocument {
    pub enabled: bool,
    pub min_age_days: u32,
    pub schedule_start: String,
    pub schedule_end: String,
    pub max_cpu_percent: f64,
    pub max_io_wait: f64,
    pub output_codec: String,
    pub preset: String,
    pub quality: u32,
    pub keep_original_days: u32,
    pub min_free_gb: u32,
    pub min_savings_percent: f64,
}

impl Default for TranscoderDocument {
    fn default() -> Self {
        Self {
            enabled: true,
            min_age_days: 7,
            schedule_start: "22:00".to_string(),
            schedule_end: "06:00".to_string(),
            max_cpu_percent: 50.0,
            max_io_wait: 30.0,
            output_codec: "h265-target".to_string(),
            preset: "slow".to_string(),
            quality: 28,
            keep_original_days: 1,
            min_free_gb: 5,
            min_savings_percent: 20.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpDocument {
    pub host: String,
    pub port: u16,
}

impl Default for HttpDocument {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Validated, immutable source entry (spec §3 "Source").
#[derive(Debug, Clone)]
pub struct Source {
    pub id: String,
    pub name: String,
    pub device: PathBuf,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub input_codec: InputCodec,
    pub enabled: bool,
    pub segment_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ScheduleWindow {
    pub start_minutes: u32,
    pub end_minutes: u32,
}

impl ScheduleWindow {
    /// Whether `minutes_since_midnight` falls inside the window, honoring wrap-around
    /// (e.g. start=22:00, end=06:00 means 23:00 and 04:30 are in-window, 07:00 is not).
    pub fn contains(&self, minutes_since_midnight: u32) -> bool {
        if self.start_minutes <= self.end_minutes {
            minutes_since_midnight >= self.start_minutes && minutes_since_midnight < self.end_minutes
        } else {
            minutes_since_midnight >= self.start_minutes || minutes_since_midnight < self.end_minutes
        }
    }
}

fn parse_hhmm(field: &str, s: &str) -> Result<u32, ConfigError> {
    let (h, m) = s.split_once(':').ok_or_else(|| ConfigError::Invalid {
        field: field.to_string(),
        reason: format!("`{s}` is not HH:MM"),
    })?;
    let h: u32 = h.parse().map_err(|_| ConfigError::Invalid {
        field: field.to_string(),
        reason: format!("`{s}` has a non-numeric hour"),
    })?;
    let m: u32 = m.parse().map_err(|_| ConfigError::Invalid {
        field: field.to_string(),
        reason: format!("`{s}` has a non-numeric minute"),
    })?;
    if h > 23 || m > 59 {
        return Err(ConfigError::Invalid {
            field: field.to_string(),
            reason: format!("`{s}` is out of range"),
        });
    }
    Ok(h * 60 + m)
}

/// Fully validated configuration snapshot, passed by reference to every component.
#[derive(Debug, Clone)]
pub struct Config {
    pub recordings_base_directory: PathBuf,
    pub segment_duration_seconds: u32,
    pub output_codec: OutputCodec,
    pub sources: Vec<Source>,
    pub storage: StorageConfig,
    pub transcoder: TranscoderConfig,
    pub http: HttpDocument,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub cleanup_enabled: bool,
    pub max_age_days: u32,
    pub emergency_used_fraction: f64,
    pub emergency_target_fraction: f64,
}

#[derive(Debug, Clone)]
pub struct TranscoderConfig {
    pub min_age_days: u32,
    pub schedule: ScheduleWindow,
    pub max_cpu_percent: f64,
    pub max_io_wait: f64,
    pub output_codec: String,
    pub preset: String,
    pub quality: u32,
    pub keep_original_days: u32,
    pub min_free_gb: u32,
    pub min_savings_percent: f64,
}

static ID_PATTERN: std::sync::LazyLock<regex::Regex> =
    std::sync::LazyLock::new(|| regex::Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());

impl Config {
    /// Load and validate the config document at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let doc: ConfigDocument = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_document(doc)
    }

    /// Validate a parsed document into an immutable snapshot (spec §4.1).
    pub fn from_document(doc: ConfigDocument) -> Result<Self, ConfigError> {
        if !doc.recordings_base_directory.is_absolute() {
            return Err(ConfigError::Invalid {
                field: "recordings_base_directory".into(),
                reason: "must be an absolute path".into(),
            });
        }
        let meta = std::fs::metadata(&doc.recordings_base_directory).map_err(|_| {
            ConfigError::Invalid {
                field: "recordings_base_directory".into(),
                reason: "does not exist or is not accessible".into(),
            }
        })?;
        if meta.permissions().readonly() {
            return Err(ConfigError::Invalid {
                field: "recordings_base_directory".into(),
                reason: "is not writable".into(),
            });
        }

        if doc.segment_duration_seconds < 10 {
            return Err(ConfigError::Invalid {
                field: "segment_duration_seconds".into(),
                reason: "must be >= 10".into(),
            });
        }

        if doc.sources.is_empty() {
            return Err(ConfigError::Invalid {
                field: "sources".into(),
                reason: "at least one source must be configured".into(),
            });
        }

        let mut sources = Vec::with_capacity(doc.sources.len());
        let mut any_enabled = false;
        for (id, s) in &doc.sources {
            if id.is_empty() || !ID_PATTERN.is_match(id) {
                return Err(ConfigError::Invalid {
                    field: format!("sources.{id}"),
                    reason: "identifier must be non-empty and filename-safe".into(),
                });
            }
            let (w, h) = parse_resolution(id, &s.resolution)?;
            if s.framerate < 1 {
                return Err(ConfigError::Invalid {
                    field: format!("sources.{id}.framerate"),
                    reason: "must be >= 1".into(),
                });
            }
            if s.enabled {
                any_enabled = true;
            }
            sources.push(Source {
                id: id.clone(),
                name: s.name.clone(),
                device: s.device.clone(),
                width: w,
                height: h,
                framerate: s.framerate,
                input_codec: s.input_codec.map(Into::into).unwrap_or(InputCodec::H264),
                enabled: s.enabled,
                segment_dir: doc.recordings_base_directory.join(id),
            });
        }

        if !any_enabled {
            return Err(ConfigError::Invalid {
                field: "sources".into(),
                reason: "at least one source must have enabled = true".into(),
            });
        }

        let ids: std::collections::HashSet<_> = sources.iter().map(|s| &s.id).collect();
        if ids.len() != sources.len() {
            return Err(ConfigError::Invalid {
                field: "sources".into(),
                reason: "source identifiers must be unique".into(),
            });
        }

        let start = parse_hhmm("transcoder.schedule_start", &doc.transcoder.schedule_start)?;
        let end = parse_hhmm("transcoder.schedule_end", &doc.transcoder.schedule_end)?;
        if start == end {
            return Err(ConfigError::Invalid {
                field: "transcoder.schedule_end".into(),
                reason: "schedule_start must differ from schedule_end".into(),
            });
        }
        if doc.transcoder.quality > 51 {
            return Err(ConfigError::Invalid {
                field: "transcoder.quality".into(),
                reason: "must be in 0..=51".into(),
            });
        }
        for (field, v) in [
            ("transcoder.max_cpu_percent", doc.transcoder.max_cpu_percent),
            ("transcoder.max_io_wait", doc.transcoder.max_io_wait),
            (
                "transcoder.min_savings_percent",
                doc.transcoder.min_savings_percent,
            ),
        ] {
            if v < 0.0 {
                return Err(ConfigError::Invalid {
                    field: field.into(),
                    reason: "must be non-negative".into(),
                });
            }
        }

        Ok(Config {
            recordings_base_directory: doc.recordings_base_directory,
            segment_duration_seconds: doc.segment_duration_seconds,
            output_codec: doc.output_codec.into(),
            sources,
            storage: StorageConfig {
                cleanup_enabled: doc.storage.cleanup_enabled,
                max_age_days: doc.storage.max_age_days,
                emergency_used_fraction: doc.storage.emergency_used_fraction,
                emergency_target_fraction: doc.storage.emergency_target_fraction,
            },
            transcoder: TranscoderConfig {
                min_age_days: doc.transcoder.min_age_days,
                schedule: ScheduleWindow {
                    start_minutes: start,
                    end_minutes: end,
                },
                max_cpu_percent: doc.transcoder.max_cpu_percent,
                max_io_wait: doc.transcoder.max_io_wait,
                output_codec: doc.transcoder.output_codec,
                preset: doc.transcoder.preset,
                quality: doc.transcoder.quality,
                keep_original_days: doc.transcoder.keep_original_days,
                min_free_gb: doc.transcoder.min_free_gb,
                min_savings_percent: doc.transcoder.min_savings_percent,
            },
            http: doc.http,
        })
    }

    pub fn source(&self, id: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.id == id)
    }

    pub fn enabled_sources(&self) -> impl Iterator<Item = &Source> {
        self.sources.iter().filter(|s| s.enabled)
    }
}

fn parse_resolution(source_id: &str, s: &str) -> Result<(u32, u32), ConfigError> {
    let (w, h) = s.split_once('x').ok_or_else(|| ConfigError::Invalid {
        field: format!("sources.{source_id}.resolution"),
        reason: format!("`{s}` is not WxH"),
    })?;
    let w: u32 = w.parse().map_err(|_| ConfigError::Invalid {
        field: format!("sources.{source_id}.resolution"),
        reason: "width is not a positive integer".into(),
    })?;
    let h: u32 = h.parse().map_err(|_| ConfigError::Invalid {
        field: format!("sources.{source_id}.resolution"),
        reason: "height is not a positive integer".into(),
    })?;
    if w == 0 || h == 0 {
        return Err(ConfigError::Invalid {
            field: format!("sources.{source_id}.resolution"),
            reason: "width and height must be positive".into(),
        });
    }
    Ok((w, h))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_doc(base: &Path) -> ConfigDocument {
        let mut sources = BTreeMap::new();
        sources.insert(
            "cam1".to_string(),
            SourceDocument {
                device: "/dev/video0".into(),
                name: "Front door".into(),
                resolution: "1920x1080".into(),
                framerate: 30,
                input_codec: Some(InputCodecField::H264),
                enabled: true,
            },
        );
        ConfigDocument {
            recordings_base_directory: base.to_path_buf(),
            segment_duration_seconds: 60,
            output_codec: OutputCodecField::Copy,
            sources,
            storage: StorageDocument::default(),
            transcoder: TranscoderDocument::default(),
            http: HttpDocument::default(),
        }
    }

    #[test]
    fn validates_clean_document() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::from_document(valid_doc(dir.path())).unwrap();
        assert_eq!(cfg.sources.len(), 1);
        assert_eq!(cfg.sources[0].width, 1920);
        assert_eq!(cfg.sources[0].height, 1080);
        assert_eq!(
            cfg.sources[0].segment_dir,
            dir.path().join("cam1")
        );
    }

    #[test]
    fn rejects_no_enabled_sources() {
        let dir = tempfile::tempdir().unwrap();
        let mut doc = valid_doc(dir.path());
        doc.sources.get_mut("cam1").unwrap().enabled = false;
        let err = Config::from_document(doc).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field, .. } if field == "sources"));
    }

    #[test]
    fn rejects_bad_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let mut doc = valid_doc(dir.path());
        doc.sources.get_mut("cam1").unwrap().resolution = "bogus".into();
        assert!(Config::from_document(doc).is_err());
    }

    #[test]
    fn rejects_equal_schedule_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let mut doc = valid_doc(dir.path());
        doc.transcoder.schedule_start = "10:00".into();
        doc.transcoder.schedule_end = "10:00".into();
        assert!(Config::from_document(doc).is_err());
    }

    #[test]
    fn schedule_window_wraps() {
        let w = ScheduleWindow {
            start_minutes: 22 * 60,
            end_minutes: 6 * 60,
        };
        assert!(w.contains(23 * 60));
        assert!(w.contains(4 * 60 + 30));
        assert!(!w.contains(7 * 60));
        assert!(w.contains(22 * 60));
        assert!(!w.contains(6 * 60));
    }

    #[test]
    fn round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let doc = valid_doc(dir.path());
        let serialized = toml::to_string(&doc).unwrap();
        let reparsed: ConfigDocument = toml::from_str(&serialized).unwrap();
        let cfg_a = Config::from_document(doc).unwrap();
        let cfg_b = Config::from_document(reparsed).unwrap();
        assert_eq!(cfg_a.sources.len(), cfg_b.sources.len());
        assert_eq!(cfg_a.sources[0].id, cfg_b.sources[0].id);
    }
}
