use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Error;
use crate::recorder::EncoderKind;

const DEFAULT_CAMERA_ID: &str = "CAM-001";
const DEFAULT_SOURCE: &str = "stub://front_camera";
const DEFAULT_TARGET_FPS: u32 = 30;
const DEFAULT_ANALYSIS_FPS: u32 = 5;
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_RECONNECT_BACKOFF_MS: u64 = 1000;
const DEFAULT_STOP_TIMEOUT_MS: u64 = 2000;
const DEFAULT_WINDOW_SECS: u64 = 5;
const DEFAULT_OUTPUT_DIR: &str = "recordings";
const DEFAULT_QUIESCENCE_SECS: f64 = 5.0;
const MAX_QUIESCENCE_SECS: u64 = 60 * 60;
const DEFAULT_SETTLE_MS: u64 = 500;
const DEFAULT_MIN_FRAMES: usize = 10;
const DEFAULT_THRESHOLD: f32 = 0.6;
const DEFAULT_DETECTION_WINDOW: usize = 5;
const DEFAULT_DETECTION_OVERLAP: usize = 2;
const DEFAULT_DETECTION_LABEL: &str = "motion";
const DEFAULT_RETENTION_SECS: u64 = 60 * 60 * 24 * 7;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct IncidentdConfigFile {
    camera_id: Option<String>,
    source: Option<SourceConfigFile>,
    buffer: Option<BufferConfigFile>,
    recorder: Option<RecorderConfigFile>,
    detection: Option<DetectionConfigFile>,
    retention: Option<RetentionConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SourceConfigFile {
    spec: Option<String>,
    target_fps: Option<u32>,
    analysis_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    reconnect_backoff_ms: Option<u64>,
    stop_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct BufferConfigFile {
    window_seconds: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RecorderConfigFile {
    output_dir: Option<PathBuf>,
    quiescence_secs: Option<f64>,
    settle_ms: Option<u64>,
    min_frames: Option<usize>,
    fps: Option<u32>,
    encoder: Option<EncoderKind>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectionConfigFile {
    threshold: Option<f32>,
    window: Option<usize>,
    overlap: Option<usize>,
    label: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RetentionConfigFile {
    seconds: Option<u64>,
}

/// Fully resolved `incidentd` configuration.
#[derive(Debug, Clone)]
pub struct IncidentdConfig {
    pub camera_id: String,
    pub source: SourceSettings,
    pub buffer_window: Duration,
    pub recorder: RecorderSettings,
    pub detection: DetectionSettings,
    pub retention: Duration,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub spec: String,
    pub target_fps: u32,
    pub analysis_fps: u32,
    /// Synthetic feed resolution.
    pub width: u32,
    pub height: u32,
    pub reconnect_backoff: Duration,
    pub stop_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RecorderSettings {
    pub output_dir: PathBuf,
    pub quiescence: Duration,
    pub settle: Duration,
    pub min_frames: usize,
    /// Artifact frame rate; `None` follows the source's effective rate.
    pub fps: Option<u32>,
    pub encoder: EncoderKind,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub threshold: f32,
    pub window: usize,
    pub overlap: usize,
    pub label: String,
}

impl Default for IncidentdConfig {
    fn default() -> Self {
        Self::from_file(IncidentdConfigFile::default())
    }
}

impl IncidentdConfig {
    /// File named by `INCIDENTD_CONFIG` (if any), then environment
    /// overrides, then validation.
    pub fn load() -> Result<Self> {
        let path = std::env::var("INCIDENTD_CONFIG").ok().map(PathBuf::from);
        Self::load_from(path.as_deref())
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => IncidentdConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: IncidentdConfigFile) -> Self {
        let source = file.source.unwrap_or_default();
        let recorder = file.recorder.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();

        Self {
            camera_id: file
                .camera_id
                .unwrap_or_else(|| DEFAULT_CAMERA_ID.to_string()),
            source: SourceSettings {
                spec: source.spec.unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
                target_fps: source.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
                analysis_fps: source.analysis_fps.unwrap_or(DEFAULT_ANALYSIS_FPS),
                width: source.width.unwrap_or(DEFAULT_WIDTH),
                height: source.height.unwrap_or(DEFAULT_HEIGHT),
                reconnect_backoff: Duration::from_millis(
                    source
                        .reconnect_backoff_ms
                        .unwrap_or(DEFAULT_RECONNECT_BACKOFF_MS),
                ),
                stop_timeout: Duration::from_millis(
                    source.stop_timeout_ms.unwrap_or(DEFAULT_STOP_TIMEOUT_MS),
                ),
            },
            buffer_window: Duration::from_secs(
                file.buffer
                    .and_then(|buffer| buffer.window_seconds)
                    .unwrap_or(DEFAULT_WINDOW_SECS),
            ),
            recorder: RecorderSettings {
                output_dir: recorder
                    .output_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
                quiescence: Duration::try_from_secs_f64(
                    recorder.quiescence_secs.unwrap_or(DEFAULT_QUIESCENCE_SECS),
                )
                .unwrap_or_default(),
                settle: Duration::from_millis(recorder.settle_ms.unwrap_or(DEFAULT_SETTLE_MS)),
                min_frames: recorder.min_frames.unwrap_or(DEFAULT_MIN_FRAMES),
                fps: recorder.fps,
                encoder: recorder.encoder.unwrap_or_default(),
            },
            detection: DetectionSettings {
                threshold: detection.threshold.unwrap_or(DEFAULT_THRESHOLD),
                window: detection.window.unwrap_or(DEFAULT_DETECTION_WINDOW),
                overlap: detection.overlap.unwrap_or(DEFAULT_DETECTION_OVERLAP),
                label: detection
                    .label
                    .unwrap_or_else(|| DEFAULT_DETECTION_LABEL.to_string()),
            },
            retention: Duration::from_secs(
                file.retention
                    .and_then(|retention| retention.seconds)
                    .unwrap_or(DEFAULT_RETENTION_SECS),
            ),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(camera_id) = non_empty_env("INCIDENTD_CAMERA_ID") {
            self.camera_id = camera_id;
        }
        if let Some(spec) = non_empty_env("INCIDENTD_SOURCE") {
            self.source.spec = spec;
        }
        if let Some(dir) = non_empty_env("INCIDENTD_OUTPUT_DIR") {
            self.recorder.output_dir = PathBuf::from(dir);
        }
        if let Some(threshold) = non_empty_env("INCIDENTD_THRESHOLD") {
            self.detection.threshold = threshold
                .trim()
                .parse()
                .map_err(|_| anyhow!("INCIDENTD_THRESHOLD must be a number between 0 and 1"))?;
        }
        if let Some(retention) = non_empty_env("INCIDENTD_RETENTION_SECS") {
            let seconds: u64 = retention.trim().parse().map_err(|_| {
                anyhow!("INCIDENTD_RETENTION_SECS must be an integer number of seconds")
            })?;
            self.retention = Duration::from_secs(seconds);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.camera_id.trim().is_empty() {
            return invalid("camera_id must not be empty");
        }
        if self.source.target_fps == 0 {
            return invalid("source.target_fps must be greater than zero");
        }
        if self.source.analysis_fps == 0 {
            return invalid("source.analysis_fps must be greater than zero");
        }
        if self.source.width == 0 || self.source.height == 0 {
            return invalid("source.width and source.height must be greater than zero");
        }
        if self.buffer_window.is_zero() {
            return invalid("buffer.window_seconds must be greater than zero");
        }
        if self.recorder.quiescence.is_zero() {
            return invalid("recorder.quiescence_secs must be greater than zero");
        }
        if self.recorder.quiescence > Duration::from_secs(MAX_QUIESCENCE_SECS) {
            return invalid("recorder.quiescence_secs must be at most 3600");
        }
        if self.recorder.fps == Some(0) {
            return invalid("recorder.fps must be greater than zero");
        }
        if !(0.0..=1.0).contains(&self.detection.threshold) {
            return invalid("detection.threshold must be within [0, 1]");
        }
        if self.detection.window == 0 {
            return invalid("detection.window must be greater than zero");
        }
        if self.detection.overlap >= self.detection.window {
            return invalid("detection.overlap must be smaller than detection.window");
        }
        if self.retention.is_zero() {
            return invalid("retention must be greater than zero");
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> Result<()> {
    Err(Error::InvalidConfig(msg.to_string()).into())
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<IncidentdConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
