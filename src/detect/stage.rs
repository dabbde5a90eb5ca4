use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::consumer::{ConsumerError, FrameConsumer};
use crate::detect::detector::{Detector, Verdict};
use crate::frame::Frame;
use crate::recorder::{IncidentRecorder, Phase};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StageConfig {
    /// Analysis frames per evaluation.
    pub window: usize,
    /// Frames carried into the next window.
    pub overlap: usize,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            window: 5,
            overlap: 2,
        }
    }
}

struct Inner {
    detector: Box<dyn Detector>,
    pending: Vec<Frame>,
    last_verdict: Option<Verdict>,
}

/// Analysis-frame consumer that drives the recorder from detector verdicts.
pub struct DetectionStage {
    config: StageConfig,
    recorder: IncidentRecorder,
    enabled: AtomicBool,
    inner: Mutex<Inner>,
}

impl DetectionStage {
    pub fn new(
        config: StageConfig,
        detector: Box<dyn Detector>,
        recorder: IncidentRecorder,
    ) -> Self {
        let window = config.window.max(1);
        let config = StageConfig {
            window,
            overlap: config.overlap.min(window - 1),
        };
        Self {
            config,
            recorder,
            enabled: AtomicBool::new(true),
            inner: Mutex::new(Inner {
                detector,
                pending: Vec::with_capacity(window),
                last_verdict: None,
            }),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn config(&self) -> StageConfig {
        self.config
    }

    /// Pause or resume detection. Either way the pending window and the
    /// detector's carried state are dropped.
    pub fn set_enabled(&self, enabled: bool) {
        let was = self.enabled.swap(enabled, Ordering::SeqCst);
        if was != enabled {
            let mut inner = self.inner();
            inner.pending.clear();
            inner.detector.reset();
            log::info!(
                "detection {}",
                if enabled { "enabled" } else { "disabled" }
            );
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn last_verdict(&self) -> Option<Verdict> {
        self.inner().last_verdict.clone()
    }

    fn dispatch(&self, verdict: &Verdict) {
        if !verdict.is_event {
            return;
        }
        if self.recorder.phase() == Phase::Idle {
            self.recorder.signal_start(&verdict.label, verdict.confidence);
        } else {
            self.recorder.signal_continue(verdict.confidence);
        }
    }
}

impl FrameConsumer for DetectionStage {
    fn name(&self) -> &str {
        "detection-stage"
    }

    fn on_frame(&self, frame: &Frame) -> Result<(), ConsumerError> {
        if !self.is_enabled() {
            return Ok(());
        }

        let verdict = {
            let mut inner = self.inner();
            inner.pending.push(frame.clone());
            if inner.pending.len() < self.config.window {
                return Ok(());
            }
            let window = std::mem::take(&mut inner.pending);
            inner.pending = window[window.len() - self.config.overlap..].to_vec();

            let verdict = inner.detector.evaluate(&window)?;
            inner.last_verdict = Some(verdict.clone());
            verdict
        };

        if verdict.is_event {
            log::debug!(
                "detector flagged '{}' at #{} (confidence {:.2})",
                verdict.label,
                frame.sequence,
                verdict.confidence
            );
        }
        self.dispatch(&verdict);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::RollingBuffer;
    use crate::recorder::{ChannelHandler, IncidentArtifact, RecorderConfig};
    use anyhow::{anyhow, Result};
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};

    /// Replays scripted verdicts and records window sizes.
    struct Scripted {
        verdicts: Vec<Verdict>,
        windows: Arc<Mutex<Vec<Vec<u64>>>>,
    }

    impl Detector for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn evaluate(&mut self, frames: &[Frame]) -> Result<Verdict> {
            self.windows
                .lock()
                .unwrap()
                .push(frames.iter().map(|f| f.sequence).collect());
            if self.verdicts.is_empty() {
                return Err(anyhow!("script exhausted"));
            }
            Ok(self.verdicts.remove(0))
        }
    }

    fn hit(confidence: f32) -> Verdict {
        Verdict {
            is_event: true,
            confidence,
            label: "fight".to_string(),
        }
    }

    fn frame(sequence: u64) -> Frame {
        Frame::new(sequence, SystemTime::now(), 2, 2, vec![0; 12]).unwrap()
    }

    fn recorder(dir: &std::path::Path) -> (IncidentRecorder, mpsc::Receiver<IncidentArtifact>) {
        let (tx, rx) = mpsc::channel();
        let config = RecorderConfig {
            output_dir: dir.to_path_buf(),
            quiescence: Duration::from_millis(200),
            settle: Duration::from_millis(10),
            min_frames: 1,
            fps: 5,
            ..RecorderConfig::default()
        };
        let buffer = Arc::new(RollingBuffer::with_capacity(Duration::from_secs(5), 10));
        buffer.push(frame(0)).unwrap();
        (
            IncidentRecorder::new(config, buffer, Arc::new(ChannelHandler(tx))),
            rx,
        )
    }

    #[test]
    fn windows_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let (rec, _rx) = recorder(dir.path());
        let windows = Arc::new(Mutex::new(Vec::new()));
        let stage = DetectionStage::new(
            StageConfig::default(),
            Box::new(Scripted {
                verdicts: vec![Verdict::quiet(), Verdict::quiet()],
                windows: windows.clone(),
            }),
            rec.clone(),
        );

        for seq in 1..=8 {
            stage.on_frame(&frame(seq)).unwrap();
        }
        assert_eq!(
            *windows.lock().unwrap(),
            vec![vec![1, 2, 3, 4, 5], vec![4, 5, 6, 7, 8]]
        );
        assert_eq!(stage.last_verdict(), Some(Verdict::quiet()));
        assert_eq!(rec.phase(), Phase::Idle);
    }

    #[test]
    fn positive_verdicts_start_then_continue() {
        let dir = tempfile::tempdir().unwrap();
        let (rec, rx) = recorder(dir.path());
        let stage = DetectionStage::new(
            StageConfig { window: 1, overlap: 0 },
            Box::new(Scripted {
                verdicts: vec![hit(0.7), hit(0.9), Verdict::quiet()],
                windows: Arc::new(Mutex::new(Vec::new())),
            }),
            rec.clone(),
        );

        stage.on_frame(&frame(1)).unwrap();
        assert!(rec.is_event_active());
        stage.on_frame(&frame(2)).unwrap();
        stage.on_frame(&frame(3)).unwrap();

        let artifact = rx.recv_timeout(Duration::from_secs(5)).expect("artifact");
        assert_eq!(artifact.label, "fight");
        assert_eq!(artifact.confidence, 0.9);
        assert!(rec.wait_idle(Duration::from_secs(5)));
    }

    #[test]
    fn disabled_stage_ignores_frames() {
        let dir = tempfile::tempdir().unwrap();
        let (rec, _rx) = recorder(dir.path());
        let windows = Arc::new(Mutex::new(Vec::new()));
        let stage = DetectionStage::new(
            StageConfig { window: 2, overlap: 0 },
            Box::new(Scripted {
                verdicts: vec![hit(1.0)],
                windows: windows.clone(),
            }),
            rec.clone(),
        );

        stage.on_frame(&frame(1)).unwrap();
        stage.set_enabled(false);
        assert!(!stage.is_enabled());
        stage.on_frame(&frame(2)).unwrap();
        stage.on_frame(&frame(3)).unwrap();
        assert!(windows.lock().unwrap().is_empty());

        // Pending frame from before the pause was dropped.
        stage.set_enabled(true);
        stage.on_frame(&frame(4)).unwrap();
        stage.on_frame(&frame(5)).unwrap();
        assert_eq!(*windows.lock().unwrap(), vec![vec![4, 5]]);
        assert!(rec.wait_idle(Duration::from_secs(5)));
    }

    #[test]
    fn detector_errors_surface_as_consumer_errors() {
        let dir = tempfile::tempdir().unwrap();
        let (rec, _rx) = recorder(dir.path());
        let stage = DetectionStage::new(
            StageConfig { window: 1, overlap: 0 },
            Box::new(Scripted {
                verdicts: Vec::new(),
                windows: Arc::new(Mutex::new(Vec::new())),
            }),
            rec,
        );
        assert!(matches!(
            stage.on_frame(&frame(1)),
            Err(ConsumerError::Failed(_))
        ));
    }

    #[test]
    fn overlap_is_clamped_below_window() {
        let dir = tempfile::tempdir().unwrap();
        let (rec, _rx) = recorder(dir.path());
        let stage = DetectionStage::new(
            StageConfig { window: 3, overlap: 7 },
            Box::new(Scripted {
                verdicts: Vec::new(),
                windows: Arc::new(Mutex::new(Vec::new())),
            }),
            rec,
        );
        assert_eq!(stage.config(), StageConfig { window: 3, overlap: 2 });
    }
}
