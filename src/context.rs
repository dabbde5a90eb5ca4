//! Application context.
//!
//! Built once at startup and handed to whatever drives the pipeline (the
//! daemon, an API layer, tests). Holds the single rolling buffer, recorder,
//! detection stage and frame source; there is no process-wide state.

use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;

use crate::config::IncidentdConfig;
use crate::consumer::FrameConsumers;
use crate::detect::{DetectionStage, MotionDetector, StageConfig};
use crate::error::Error;
use crate::frame::RollingBuffer;
use crate::ingest::{
    BackendFactory, DefaultBackendFactory, FrameSource, SourceConfig, SyntheticConfig,
};
use crate::recorder::{CompletionHandler, IncidentRecorder, Phase, RecorderConfig};
use crate::retention::{self, SweepReport};
use crate::status::StatusSnapshot;

pub struct IncidentContext {
    config: IncidentdConfig,
    buffer: Arc<RollingBuffer>,
    recorder: IncidentRecorder,
    detection: Arc<DetectionStage>,
    source: FrameSource,
}

impl IncidentContext {
    pub fn new(config: IncidentdConfig, handler: Arc<dyn CompletionHandler>) -> Self {
        let factory = DefaultBackendFactory::new(SyntheticConfig {
            width: config.source.width,
            height: config.source.height,
            fps: config.source.target_fps as f64,
            ..SyntheticConfig::default()
        });
        Self::with_factory(config, handler, Arc::new(factory))
    }

    pub fn with_factory(
        config: IncidentdConfig,
        handler: Arc<dyn CompletionHandler>,
        factory: Arc<dyn BackendFactory>,
    ) -> Self {
        let buffer = Arc::new(RollingBuffer::new(
            config.buffer_window,
            config.source.target_fps,
        ));

        let recorder = IncidentRecorder::new(
            RecorderConfig {
                output_dir: config.recorder.output_dir.clone(),
                camera_id: config.camera_id.clone(),
                quiescence: config.recorder.quiescence,
                settle: config.recorder.settle,
                min_frames: config.recorder.min_frames,
                fps: config.recorder.fps.unwrap_or(config.source.target_fps),
                encoder: config.recorder.encoder,
            },
            buffer.clone(),
            handler,
        );

        let detection = Arc::new(DetectionStage::new(
            StageConfig {
                window: config.detection.window,
                overlap: config.detection.overlap,
            },
            Box::new(MotionDetector::new(
                config.detection.threshold,
                config.detection.label.clone(),
            )),
            recorder.clone(),
        ));

        // Buffer before recorder: a frame is in the pre-roll window before the
        // recorder can see it.
        let consumers = FrameConsumers::new()
            .every_frame(buffer.clone())
            .every_frame(Arc::new(recorder.clone()))
            .analysis(detection.clone());

        let source = FrameSource::with_factory(
            SourceConfig {
                target_fps: config.source.target_fps,
                analysis_fps: config.source.analysis_fps,
                reconnect_backoff: config.source.reconnect_backoff,
                stop_timeout: config.source.stop_timeout,
            },
            consumers,
            factory,
        );

        Self {
            config,
            buffer,
            recorder,
            detection,
            source,
        }
    }

    /// Start capturing from the configured source.
    pub fn start(&self) -> Result<(), Error> {
        self.source.start(&self.config.source.spec)?;
        if self.config.recorder.fps.is_none() {
            let effective = self.source.stats().effective_fps;
            self.recorder.set_fps(effective);
        }
        Ok(())
    }

    /// Stop capturing. An event in progress still finalizes on its own
    /// timer; use `shutdown` to wait for it.
    pub fn stop(&self) {
        self.source.stop();
    }

    /// Stop capturing and wait up to `grace` for an in-flight incident.
    /// Returns whether the recorder reached Idle.
    pub fn shutdown(&self, grace: Duration) -> bool {
        self.stop();
        self.recorder.wait_idle(grace)
    }

    /// Fire the manual test event. Needs at least `min_frames` buffered;
    /// returns `false` when an event is already in progress.
    pub fn trigger_test(&self) -> Result<bool> {
        let buffered = self.buffer.len();
        let needed = self.config.recorder.min_frames;
        if buffered < needed {
            return Err(anyhow!(
                "buffer holds {} frames, need at least {} for a test recording",
                buffered,
                needed
            ));
        }
        Ok(self.recorder.trigger_manual())
    }

    pub fn set_detection_enabled(&self, enabled: bool) {
        self.detection.set_enabled(enabled);
    }

    pub fn sweep_retention(&self) -> Result<SweepReport> {
        retention::sweep(&self.config.recorder.output_dir, self.config.retention)
    }

    pub fn status(&self) -> StatusSnapshot {
        let phase = self.recorder.phase();
        StatusSnapshot {
            camera_id: self.config.camera_id.clone(),
            source: self.source.stats(),
            buffer: self.buffer.stats(),
            phase,
            recording: phase != Phase::Idle,
            event_active: phase == Phase::Capturing,
            detection_enabled: self.detection.is_enabled(),
            last_verdict: self.detection.last_verdict(),
        }
    }

    pub fn config(&self) -> &IncidentdConfig {
        &self.config
    }

    pub fn buffer(&self) -> &Arc<RollingBuffer> {
        &self.buffer
    }

    pub fn recorder(&self) -> &IncidentRecorder {
        &self.recorder
    }

    pub fn detection(&self) -> &Arc<DetectionStage> {
        &self.detection
    }

    pub fn source(&self) -> &FrameSource {
        &self.source
    }
}
