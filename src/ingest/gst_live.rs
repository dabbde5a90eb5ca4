//! Live capture backend using GStreamer.
//!
//! Handles network streams (`rtspsrc` / `uridecodebin`) and local capture
//! devices (`v4l2src`). Stalls, bus errors and EOS all surface as read errors
//! so the capture loop can back off and reopen.

use anyhow::{anyhow, Context, Result};
use gstreamer::prelude::*;
use std::time::Duration;

use super::{CaptureBackend, CapturedImage, SourceKind, SourceSpec};

/// How long a read waits for a sample before reporting a stall.
const SAMPLE_TIMEOUT: Duration = Duration::from_secs(2);
/// How long opening waits for the first negotiated sample.
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) struct GstreamerSource {
    spec: String,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    resolution: (u32, u32),
    fps: Option<f64>,
    pending: Option<CapturedImage>,
    last_error: Option<String>,
}

impl GstreamerSource {
    pub(crate) fn open(spec: &SourceSpec) -> Result<Self> {
        let head = match spec.kind() {
            SourceKind::Device(index) => format!("v4l2src device=/dev/video{}", index),
            SourceKind::Stream(url) if url.starts_with("rtsp") => {
                format!("rtspsrc location={} latency=0 ! decodebin", url)
            }
            SourceKind::Stream(url) => format!("uridecodebin uri={}", url),
            other => return Err(anyhow!("gstreamer cannot capture {:?}", other)),
        };
        Self::launch(spec.as_str(), &head)
    }

    /// Build `head ! videoconvert ! appsink`, start it and wait for the first
    /// sample so rate and resolution are known before the capture loop paces
    /// itself. That sample is handed out by the first `read_frame`.
    fn launch(label: &str, head: &str) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let pipeline_description = format!(
            "{} ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            head
        );
        let pipeline = gstreamer::parse::launch(&pipeline_description)
            .context("build capture pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("capture pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));

        pipeline
            .set_state(gstreamer::State::Playing)
            .with_context(|| format!("start capture pipeline for {}", label))?;

        let Some(sample) = appsink.try_pull_sample(clock_time(OPEN_TIMEOUT)) else {
            let _ = pipeline.set_state(gstreamer::State::Null);
            return Err(anyhow!(
                "{} produced no frame within {:?}",
                label,
                OPEN_TIMEOUT
            ));
        };
        let (first, fps) = match sample_to_image(&sample) {
            Ok(decoded) => decoded,
            Err(e) => {
                let _ = pipeline.set_state(gstreamer::State::Null);
                return Err(e);
            }
        };
        log::info!(
            "GstreamerSource: connected to {} ({}x{}, fps={:?})",
            label,
            first.width,
            first.height,
            fps
        );

        Ok(Self {
            spec: label.to_string(),
            pipeline,
            appsink,
            resolution: (first.width, first.height),
            fps,
            pending: Some(first),
            last_error: None,
        })
    }

    fn poll_bus(&mut self) {
        let Some(bus) = self.pipeline.bus() else {
            return;
        };
        while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    self.last_error = Some(format!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => {
                    self.last_error = Some("gstreamer reached EOS".to_string());
                }
                _ => {}
            }
        }
    }
}

impl CaptureBackend for GstreamerSource {
    fn read_frame(&mut self) -> Result<CapturedImage> {
        if let Some(first) = self.pending.take() {
            return Ok(first);
        }
        self.poll_bus();
        if let Some(err) = self.last_error.take() {
            return Err(anyhow!("{}: {}", self.spec, err));
        }

        let sample = self
            .appsink
            .try_pull_sample(clock_time(SAMPLE_TIMEOUT))
            .ok_or_else(|| anyhow!("{} stalled", self.spec))?;

        let (image, fps) = sample_to_image(&sample)?;
        self.resolution = (image.width, image.height);
        if fps.is_some() {
            self.fps = fps;
        }
        Ok(image)
    }

    fn rewind(&mut self) -> Result<()> {
        Err(anyhow!("{} is a live feed", self.spec))
    }

    fn reported_fps(&self) -> Option<f64> {
        self.fps
    }

    fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    fn release(&mut self) {
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            log::warn!("GstreamerSource: failed to stop {}: {}", self.spec, e);
        }
    }
}

impl Drop for GstreamerSource {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gstreamer::State::Null);
    }
}

fn clock_time(duration: Duration) -> gstreamer::ClockTime {
    gstreamer::ClockTime::from_mseconds(duration.as_millis() as u64)
}

fn sample_to_image(sample: &gstreamer::Sample) -> Result<(CapturedImage, Option<f64>)> {
    let buffer = sample.buffer().context("sample missing buffer")?;
    let caps = sample.caps().context("sample missing caps")?;
    let info = gstreamer_video::VideoInfo::from_caps(caps).context("parse caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;
    let fps = info.fps();
    let fps = (fps.denom() != 0 && fps.numer() > 0).then(|| fps.numer() as f64 / fps.denom() as f64);

    let map = buffer.map_readable().context("map sample buffer")?;
    let data = map.as_slice();

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(data.get(start..end).context("buffer row is out of bounds")?);
    }

    Ok((
        CapturedImage {
            width,
            height,
            data: pixels,
        },
        fps,
    ))
}
