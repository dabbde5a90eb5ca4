//! Frame ingestion.
//!
//! A `SourceSpec` names where frames come from:
//! - `0`, `1`, ... : local capture device (live, feature: rtsp-gstreamer)
//! - `rtsp://`, `rtsps://`, `http(s)://` : network stream (live, feature: rtsp-gstreamer)
//! - `stub://name` : synthetic live feed (testing)
//! - `stub://name?frames=N` : synthetic finite clip of N frames (testing)
//! - anything else : local video file (feature: ingest-file-ffmpeg)
//!
//! Backends only decode images. The `FrameSource` capture loop owns pacing,
//! sequence numbering, timestamps, reconnects and fan-out to consumers.
//!
//! The ingestion layer MUST NOT:
//! - Store decoded frames to disk
//! - Log raw frame content

#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
#[cfg(feature = "rtsp-gstreamer")]
pub(crate) mod gst_live;
pub mod source;
pub mod synthetic;

use anyhow::{anyhow, Result};
use std::fmt;
use std::path::PathBuf;

pub use source::{FrameSource, SourceConfig, SourceStats};
pub use synthetic::{SyntheticConfig, SyntheticSource};

/// Where frames are read from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Device(u32),
    Stream(String),
    Synthetic { name: String, frames: Option<u64> },
    File(PathBuf),
}

/// Parsed video source specification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceSpec {
    raw: String,
    kind: SourceKind,
}

impl SourceSpec {
    pub fn parse(spec: &str) -> Result<Self> {
        let raw = spec.trim();
        if raw.is_empty() {
            return Err(anyhow!("video source cannot be empty"));
        }

        let kind = if raw.chars().all(|c| c.is_ascii_digit()) {
            SourceKind::Device(
                raw.parse()
                    .map_err(|_| anyhow!("device index '{}' out of range", raw))?,
            )
        } else if let Some(rest) = raw.strip_prefix("stub://") {
            parse_synthetic(rest)?
        } else if ["rtsp://", "rtsps://", "http://", "https://"]
            .iter()
            .any(|scheme| raw.starts_with(scheme))
        {
            SourceKind::Stream(raw.to_string())
        } else if raw.contains("://") {
            return Err(anyhow!("unsupported video source scheme in '{}'", raw));
        } else {
            SourceKind::File(PathBuf::from(raw))
        };

        Ok(Self {
            raw: raw.to_string(),
            kind,
        })
    }

    pub fn kind(&self) -> &SourceKind {
        &self.kind
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Live feeds reconnect on read failure; finite assets loop instead.
    pub fn is_live(&self) -> bool {
        match &self.kind {
            SourceKind::Device(_) | SourceKind::Stream(_) => true,
            SourceKind::Synthetic { frames, .. } => frames.is_none(),
            SourceKind::File(_) => false,
        }
    }
}

impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn parse_synthetic(rest: &str) -> Result<SourceKind> {
    let (name, query) = match rest.split_once('?') {
        Some((name, query)) => (name, Some(query)),
        None => (rest, None),
    };
    if name.is_empty() {
        return Err(anyhow!("stub:// source needs a name"));
    }
    let mut frames = None;
    if let Some(query) = query {
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            match pair.split_once('=') {
                Some(("frames", value)) => {
                    let count: u64 = value
                        .parse()
                        .map_err(|_| anyhow!("stub:// frames must be an integer"))?;
                    frames = Some(count);
                }
                _ => return Err(anyhow!("unknown stub:// parameter '{}'", pair)),
            }
        }
    }
    Ok(SourceKind::Synthetic {
        name: name.to_string(),
        frames,
    })
}

/// One decoded RGB24 image before the capture loop stamps it.
pub struct CapturedImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// An opened capture resource.
pub trait CaptureBackend: Send {
    /// Decode the next image. An error means end-of-stream for finite assets
    /// and a transient fault for live feeds.
    fn read_frame(&mut self) -> Result<CapturedImage>;

    /// Seek back to the first frame (finite assets only).
    fn rewind(&mut self) -> Result<()>;

    /// Frame rate advertised by the source, if known.
    fn reported_fps(&self) -> Option<f64>;

    /// Current (width, height), (0, 0) before the first frame when unknown.
    fn resolution(&self) -> (u32, u32);

    /// Release the underlying resource. Reads after release fail.
    fn release(&mut self) {}
}

/// Opens backends. The capture loop reopens through the same factory when a
/// live feed drops.
pub trait BackendFactory: Send + Sync {
    fn open(&self, spec: &SourceSpec) -> Result<Box<dyn CaptureBackend>>;
}

/// Picks the backend for a spec from the compiled-in features.
#[derive(Clone, Debug, Default)]
pub struct DefaultBackendFactory {
    pub synthetic: SyntheticConfig,
}

impl DefaultBackendFactory {
    pub fn new(synthetic: SyntheticConfig) -> Self {
        Self { synthetic }
    }
}

impl BackendFactory for DefaultBackendFactory {
    fn open(&self, spec: &SourceSpec) -> Result<Box<dyn CaptureBackend>> {
        match spec.kind() {
            SourceKind::Synthetic { name, frames } => Ok(Box::new(SyntheticSource::open(
                name,
                *frames,
                self.synthetic.clone(),
            )?)),
            #[cfg(feature = "rtsp-gstreamer")]
            SourceKind::Device(_) | SourceKind::Stream(_) => {
                Ok(Box::new(gst_live::GstreamerSource::open(spec)?))
            }
            #[cfg(not(feature = "rtsp-gstreamer"))]
            SourceKind::Device(_) | SourceKind::Stream(_) => Err(anyhow!(
                "live capture of '{}' requires the rtsp-gstreamer feature",
                spec
            )),
            #[cfg(feature = "ingest-file-ffmpeg")]
            SourceKind::File(path) => Ok(Box::new(file_ffmpeg::FfmpegFileSource::open(path)?)),
            #[cfg(not(feature = "ingest-file-ffmpeg"))]
            SourceKind::File(path) => {
                if !path.exists() {
                    return Err(anyhow!("video file {} does not exist", path.display()));
                }
                Err(anyhow!(
                    "file ingestion of {} requires the ingest-file-ffmpeg feature",
                    path.display()
                ))
            }
        }
    }
}
