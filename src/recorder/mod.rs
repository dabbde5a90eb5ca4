//! Event-driven incident recorder.
//!
//! Phases: `Idle -> Capturing -> Finalizing -> Idle`.
//!
//! - `signal_start` freezes a copy of the rolling buffer as pre-roll and arms
//!   the quiescence timer.
//! - `signal_continue` (and repeated starts) re-arm the timer and keep the
//!   highest confidence seen.
//! - `on_frame` appends to the event list while Capturing; frames seen in any
//!   other phase are dropped.
//! - When the timer expires the watcher thread finalizes: settle, encode
//!   pre-roll + event frames, hash, hand the artifact to the completion
//!   handler, reset.
//!
//! Lock order is recorder state, then buffer. The state lock is never held
//! across encoding, hashing, file I/O or the completion handler.

pub mod artifact;
pub mod writer;

use anyhow::{anyhow, Context, Result};
use chrono::{Local, Utc};
use serde::Serialize;
use std::fs;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crate::consumer::{ConsumerError, FrameConsumer};
use crate::frame::{Frame, RollingBuffer};

pub use artifact::IncidentArtifact;
pub use writer::{EncoderKind, FfmpegMp4Writer, IncidentWriter, MjpegAviWriter};

/// Label used by `trigger_manual`.
pub const MANUAL_TEST_LABEL: &str = "manual_test";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Capturing,
    Finalizing,
}

#[derive(Clone, Debug)]
pub struct RecorderConfig {
    pub output_dir: PathBuf,
    pub camera_id: String,
    /// Idle time after the last signal before an event is over.
    pub quiescence: Duration,
    /// Wait between the end of capture and reading the frozen lists.
    pub settle: Duration,
    /// Events with fewer frames (pre-roll included) are discarded.
    pub min_frames: usize,
    /// Playback rate of the written artifact.
    pub fps: u32,
    pub encoder: EncoderKind,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("recordings"),
            camera_id: "CAM-001".to_string(),
            quiescence: Duration::from_secs(5),
            settle: Duration::from_millis(500),
            min_frames: 10,
            fps: 30,
            encoder: EncoderKind::default(),
        }
    }
}

// ----------------------------------------------------------------------------
// Completion handlers
// ----------------------------------------------------------------------------

/// Receives each finalized artifact exactly once. Errors and panics are
/// logged by the recorder and never retried.
pub trait CompletionHandler: Send + Sync {
    fn on_incident(&self, artifact: &IncidentArtifact) -> Result<()>;
}

impl<F> CompletionHandler for F
where
    F: Fn(&IncidentArtifact) -> Result<()> + Send + Sync,
{
    fn on_incident(&self, artifact: &IncidentArtifact) -> Result<()> {
        self(artifact)
    }
}

/// Forwards artifacts into a channel.
pub struct ChannelHandler(pub Sender<IncidentArtifact>);

impl CompletionHandler for ChannelHandler {
    fn on_incident(&self, artifact: &IncidentArtifact) -> Result<()> {
        self.0
            .send(artifact.clone())
            .map_err(|_| anyhow!("incident channel receiver dropped"))
    }
}

// ----------------------------------------------------------------------------
// Recorder
// ----------------------------------------------------------------------------

struct EventState {
    phase: Phase,
    /// Bumped on every new event; stale watchers and late frames compare it.
    generation: u64,
    label: String,
    confidence: f32,
    last_signal: Instant,
    pre_roll: Vec<Frame>,
    frames: Vec<Frame>,
    /// Highest sequence already held (pre-roll or event list).
    high_water: Option<u64>,
}

impl EventState {
    fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.label.clear();
        self.confidence = 0.0;
        self.pre_roll.clear();
        self.frames.clear();
        self.high_water = None;
    }

    fn accepts(&self, sequence: u64) -> bool {
        self.phase == Phase::Capturing && self.high_water.map_or(true, |high| sequence > high)
    }
}

struct Shared {
    config: RecorderConfig,
    buffer: Arc<RollingBuffer>,
    handler: Arc<dyn CompletionHandler>,
    writer: Box<dyn IncidentWriter>,
    /// Artifact frame rate; starts at `config.fps`.
    fps: AtomicU32,
    state: Mutex<EventState>,
    /// Signalled on re-arm and on return to Idle.
    changed: Condvar,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, EventState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Incident state machine. Cheap to clone; clones share one recorder.
#[derive(Clone)]
pub struct IncidentRecorder {
    shared: Arc<Shared>,
}

impl IncidentRecorder {
    pub fn new(
        config: RecorderConfig,
        buffer: Arc<RollingBuffer>,
        handler: Arc<dyn CompletionHandler>,
    ) -> Self {
        let writer = config.encoder.build();
        Self::with_writer(config, buffer, handler, writer)
    }

    pub fn with_writer(
        config: RecorderConfig,
        buffer: Arc<RollingBuffer>,
        handler: Arc<dyn CompletionHandler>,
        writer: Box<dyn IncidentWriter>,
    ) -> Self {
        let fps = AtomicU32::new(config.fps.max(1));
        Self {
            shared: Arc::new(Shared {
                config,
                fps,
                buffer,
                handler,
                writer,
                state: Mutex::new(EventState {
                    phase: Phase::Idle,
                    generation: 0,
                    label: String::new(),
                    confidence: 0.0,
                    last_signal: Instant::now(),
                    pre_roll: Vec::new(),
                    frames: Vec::new(),
                    high_water: None,
                }),
                changed: Condvar::new(),
            }),
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.shared.config
    }

    /// Frame rate used for the next artifact.
    pub fn fps(&self) -> u32 {
        self.shared.fps.load(Ordering::Relaxed)
    }

    /// Follow the source's effective rate once it is known.
    pub fn set_fps(&self, fps: u32) {
        self.shared.fps.store(fps.max(1), Ordering::Relaxed);
    }

    /// Begin an event. Returns `true` only when a new event started; while
    /// Capturing this acts as a continue, while Finalizing it is ignored.
    pub fn signal_start(&self, label: &str, confidence: f32) -> bool {
        self.start_event(label, confidence, false)
    }

    /// Extend the current event. No-op unless Capturing.
    pub fn signal_continue(&self, confidence: f32) {
        let mut state = self.shared.state();
        if state.phase == Phase::Capturing {
            state.last_signal = Instant::now();
            state.confidence = state.confidence.max(confidence);
            log::debug!(
                "event '{}' continued (confidence {:.2})",
                state.label,
                state.confidence
            );
        }
    }

    /// Start a test event that only the quiescence timer ends. Returns
    /// `false` when the recorder is not idle.
    pub fn trigger_manual(&self) -> bool {
        self.start_event(MANUAL_TEST_LABEL, 1.0, true)
    }

    fn start_event(&self, label: &str, confidence: f32, only_if_idle: bool) -> bool {
        let mut state = self.shared.state();
        match state.phase {
            Phase::Idle => {}
            Phase::Capturing if !only_if_idle => {
                state.last_signal = Instant::now();
                state.confidence = state.confidence.max(confidence);
                return false;
            }
            _ => return false,
        }

        // Snapshot under the state lock: no frame can be accepted until the
        // pre-roll is frozen.
        let pre_roll = self.shared.buffer.snapshot();
        state.high_water = pre_roll.last().map(|f| f.sequence);
        state.pre_roll = pre_roll;
        state.frames.clear();
        state.label = label.to_string();
        state.confidence = confidence;
        state.last_signal = Instant::now();
        state.generation += 1;
        state.phase = Phase::Capturing;
        let generation = state.generation;

        log::info!(
            "event '{}' started (confidence {:.2}, {} pre-roll frames)",
            label,
            confidence,
            state.pre_roll.len()
        );
        drop(state);

        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name("incident-watcher".to_string())
            .spawn(move || watch(shared, generation));
        if let Err(e) = spawned {
            log::error!("failed to spawn incident watcher: {}", e);
            let mut state = self.shared.state();
            if state.generation == generation {
                state.reset();
            }
            self.shared.changed.notify_all();
            return false;
        }
        true
    }

    /// Append a copy of `frame` to the current event. Returns whether the
    /// frame was kept.
    pub fn on_frame(&self, frame: &Frame) -> bool {
        let generation = {
            let state = self.shared.state();
            if !state.accepts(frame.sequence) {
                return false;
            }
            state.generation
        };

        let copy = frame.clone();

        let mut state = self.shared.state();
        if state.generation != generation || !state.accepts(copy.sequence) {
            return false;
        }
        state.high_water = Some(copy.sequence);
        state.frames.push(copy);
        true
    }

    pub fn phase(&self) -> Phase {
        self.shared.state().phase
    }

    /// Capturing or Finalizing.
    pub fn is_recording(&self) -> bool {
        self.phase() != Phase::Idle
    }

    /// Capturing only.
    pub fn is_event_active(&self) -> bool {
        self.phase() == Phase::Capturing
    }

    /// Block until the recorder is Idle or `timeout` passes. Returns whether
    /// it is Idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let state = self.shared.state();
        let (state, _) = self
            .shared
            .changed
            .wait_timeout_while(state, timeout, |s| s.phase != Phase::Idle)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.phase == Phase::Idle
    }
}

impl FrameConsumer for IncidentRecorder {
    fn name(&self) -> &str {
        "incident-recorder"
    }

    fn on_frame(&self, frame: &Frame) -> Result<(), ConsumerError> {
        IncidentRecorder::on_frame(self, frame);
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Watcher and finalize
// ----------------------------------------------------------------------------

/// Quiescence timer for one event. Exits without finalizing if the event it
/// was armed for is gone.
fn watch(shared: Arc<Shared>, generation: u64) {
    let mut state = shared.state();
    loop {
        if state.generation != generation || state.phase != Phase::Capturing {
            return;
        }
        let Some(deadline) = state.last_signal.checked_add(shared.config.quiescence) else {
            // Past what `Instant` can hold: only a new generation ends the wait.
            state = shared
                .changed
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            continue;
        };
        let now = Instant::now();
        if now >= deadline {
            state.phase = Phase::Finalizing;
            log::info!(
                "event '{}' quiet for {:?}; finalizing",
                state.label,
                shared.config.quiescence
            );
            break;
        }
        state = shared
            .changed
            .wait_timeout(state, deadline - now)
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .0;
    }
    drop(state);

    let outcome = catch_unwind(AssertUnwindSafe(|| finalize(&shared)));
    if outcome.is_err() {
        log::error!("incident finalize panicked; discarding event");
    }

    let mut state = shared.state();
    state.reset();
    drop(state);
    shared.changed.notify_all();
}

struct FrozenEvent {
    label: String,
    confidence: f32,
    pre_roll: Vec<Frame>,
    frames: Vec<Frame>,
}

fn finalize(shared: &Shared) {
    thread::sleep(shared.config.settle);

    let event = {
        let mut state = shared.state();
        FrozenEvent {
            label: std::mem::take(&mut state.label),
            confidence: state.confidence,
            pre_roll: std::mem::take(&mut state.pre_roll),
            frames: std::mem::take(&mut state.frames),
        }
    };

    let total = event.pre_roll.len() + event.frames.len();
    if total < shared.config.min_frames {
        log::warn!(
            "event '{}' aborted: {} frames, need at least {}",
            event.label,
            total,
            shared.config.min_frames
        );
        return;
    }

    let artifact = match write_artifact(shared, event) {
        Ok(artifact) => artifact,
        Err(e) => {
            log::error!("incident artifact not produced: {:#}", e);
            return;
        }
    };

    log::info!(
        "incident written: {} ({} frames, {:.1}s, {})",
        artifact.path.display(),
        artifact.frame_count,
        artifact.duration_secs,
        artifact.content_hash
    );

    match catch_unwind(AssertUnwindSafe(|| shared.handler.on_incident(&artifact))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::error!(
            "completion handler failed for {}: {:#}",
            artifact.path.display(),
            e
        ),
        Err(_) => log::error!(
            "completion handler panicked for {}",
            artifact.path.display()
        ),
    }
}

fn write_artifact(shared: &Shared, event: FrozenEvent) -> Result<IncidentArtifact> {
    let config = &shared.config;
    fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("create {}", config.output_dir.display()))?;

    let path = artifact::artifact_path(
        &config.output_dir,
        &event.label,
        Local::now(),
        shared.writer.extension(),
    );
    let partial = artifact::partial_path(&path);

    let pre_roll_frames = event.pre_roll.len();
    let mut frames = event.pre_roll;
    frames.extend(event.frames);

    let fps = shared.fps.load(Ordering::Relaxed);
    let written = match shared.writer.write(&frames, fps, &partial) {
        Ok(written) => written,
        Err(e) => {
            let _ = fs::remove_file(&partial);
            return Err(e.context(format!("encode {}", path.display())));
        }
    };
    drop(frames);

    if let Err(e) = fs::rename(&partial, &path) {
        let _ = fs::remove_file(&partial);
        return Err(anyhow!(
            "rename {} -> {}: {}",
            partial.display(),
            path.display(),
            e
        ));
    }

    let content_hash = artifact::hash_file(&path)?;

    Ok(IncidentArtifact {
        path,
        content_hash,
        frame_count: written,
        pre_roll_frames: pre_roll_frames.min(written),
        duration_secs: written as f64 / fps as f64,
        camera_id: config.camera_id.clone(),
        label: event.label,
        confidence: event.confidence,
        created_at: Utc::now(),
    })
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::mpsc;
    use std::time::{SystemTime, UNIX_EPOCH};

    const QUIET: Duration = Duration::from_millis(150);
    const SETTLE: Duration = Duration::from_millis(20);
    const PATIENCE: Duration = Duration::from_secs(5);

    fn frame(sequence: u64) -> Frame {
        let at = UNIX_EPOCH
            + Duration::from_secs(1_700_000_000)
            + Duration::from_millis(sequence * 100);
        Frame::new(sequence, at, 4, 4, vec![(sequence * 7) as u8; 4 * 4 * 3]).unwrap()
    }

    fn config(dir: &Path, min_frames: usize) -> RecorderConfig {
        RecorderConfig {
            output_dir: dir.to_path_buf(),
            camera_id: "CAM-TEST".to_string(),
            quiescence: QUIET,
            settle: SETTLE,
            min_frames,
            fps: 10,
            encoder: EncoderKind::MjpegAvi,
        }
    }

    fn filled_buffer(frames: u64) -> Arc<RollingBuffer> {
        let buffer = Arc::new(RollingBuffer::with_capacity(Duration::from_secs(60), 50));
        for seq in 1..=frames {
            buffer.push(frame(seq)).unwrap();
        }
        buffer
    }

    fn recorder(
        dir: &Path,
        min_frames: usize,
        buffer: Arc<RollingBuffer>,
    ) -> (IncidentRecorder, mpsc::Receiver<IncidentArtifact>) {
        let (tx, rx) = mpsc::channel();
        let rec = IncidentRecorder::new(
            config(dir, min_frames),
            buffer,
            Arc::new(ChannelHandler(tx)),
        );
        (rec, rx)
    }

    struct FailingWriter;

    impl IncidentWriter for FailingWriter {
        fn extension(&self) -> &'static str {
            "avi"
        }

        fn write(&self, _frames: &[Frame], _fps: u32, path: &Path) -> Result<usize> {
            fs::write(path, b"half")?;
            Err(anyhow!("disk full"))
        }
    }

    #[test]
    fn start_in_idle_freezes_buffer_as_pre_roll() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = filled_buffer(5);
        let (rec, _rx) = recorder(dir.path(), 1, buffer.clone());

        assert_eq!(rec.phase(), Phase::Idle);
        assert!(rec.signal_start("x", 0.5));
        assert!(rec.is_event_active());

        let pre: Vec<u64> = rec.shared.state().pre_roll.iter().map(|f| f.sequence).collect();
        let snap: Vec<u64> = buffer.snapshot().iter().map(|f| f.sequence).collect();
        assert_eq!(pre, snap);
        assert!(rec.wait_idle(PATIENCE));
    }

    #[test]
    fn start_while_capturing_is_a_continue() {
        let dir = tempfile::tempdir().unwrap();
        let (rec, _rx) = recorder(dir.path(), 1, filled_buffer(3));

        assert!(rec.signal_start("first", 0.4));
        let generation = rec.shared.state().generation;

        assert!(!rec.signal_start("second", 0.8));
        assert!(!rec.signal_start("third", 0.2));

        {
            let state = rec.shared.state();
            assert_eq!(state.generation, generation);
            assert_eq!(state.label, "first");
            assert_eq!(state.confidence, 0.8);
        }
        assert!(rec.wait_idle(PATIENCE));
    }

    #[test]
    fn frames_outside_capturing_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let (rec, _rx) = recorder(dir.path(), 1, filled_buffer(3));

        assert!(!rec.on_frame(&frame(10)));
        rec.signal_continue(0.9);
        assert_eq!(rec.phase(), Phase::Idle);

        assert!(rec.signal_start("x", 0.5));
        // already part of the pre-roll
        assert!(!rec.on_frame(&frame(3)));
        assert!(rec.on_frame(&frame(4)));
        assert!(!rec.on_frame(&frame(4)));
        assert_eq!(rec.shared.state().frames.len(), 1);
        assert!(rec.wait_idle(PATIENCE));
    }

    #[test]
    fn quiet_event_produces_one_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let (rec, rx) = recorder(dir.path(), 1, filled_buffer(5));

        assert!(rec.signal_start("x", 0.9));
        for seq in 6..=8 {
            assert!(rec.on_frame(&frame(seq)));
        }

        let artifact = rx.recv_timeout(PATIENCE).expect("artifact");
        assert_eq!(artifact.pre_roll_frames, 5);
        assert_eq!(artifact.frame_count, 5 + 3);
        assert_eq!(artifact.confidence, 0.9);
        assert_eq!(artifact.label, "x");
        assert_eq!(artifact.camera_id, "CAM-TEST");
        assert!((artifact.duration_secs - 0.8).abs() < 1e-9);
        assert!(artifact.path.exists());
        assert_eq!(artifact.content_hash, artifact::hash_file(&artifact.path).unwrap());
        assert!(!artifact::partial_path(&artifact.path).exists());

        assert!(rec.wait_idle(PATIENCE));
        assert!(rx.recv_timeout(QUIET * 3).is_err());
    }

    #[test]
    fn continue_extends_event_and_raises_confidence() {
        let dir = tempfile::tempdir().unwrap();
        let (rec, rx) = recorder(dir.path(), 1, filled_buffer(5));

        let started = Instant::now();
        assert!(rec.signal_start("x", 0.7));
        thread::sleep(QUIET / 2);
        let continued = Instant::now();
        rec.signal_continue(0.95);

        let artifact = rx.recv_timeout(PATIENCE).expect("artifact");
        assert!(continued.elapsed() >= QUIET);
        assert!(started.elapsed() >= QUIET + QUIET / 2);
        assert_eq!(artifact.confidence, 0.95);
    }

    #[test]
    fn short_event_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let (rec, rx) = recorder(dir.path(), 10, filled_buffer(2));

        assert!(rec.signal_start("x", 0.9));
        rec.on_frame(&frame(3));

        assert!(rx.recv_timeout(QUIET * 4).is_err());
        assert!(rec.wait_idle(PATIENCE));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn signals_during_finalize_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::channel();
        let mut cfg = config(dir.path(), 1);
        cfg.settle = Duration::from_millis(300);
        let rec = IncidentRecorder::new(cfg, filled_buffer(3), Arc::new(ChannelHandler(tx)));

        assert!(rec.signal_start("x", 0.5));
        let deadline = Instant::now() + PATIENCE;
        while rec.phase() != Phase::Finalizing && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(rec.phase(), Phase::Finalizing);
        assert!(rec.is_recording());
        assert!(!rec.is_event_active());

        assert!(!rec.signal_start("y", 1.0));
        rec.signal_continue(1.0);
        assert!(!rec.on_frame(&frame(4)));

        let artifact = rx.recv_timeout(PATIENCE).expect("artifact");
        assert_eq!(artifact.label, "x");
        assert_eq!(artifact.confidence, 0.5);
        assert_eq!(artifact.frame_count, 3);
    }

    #[test]
    fn handler_failure_still_resets() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(Mutex::new(0usize));
        let counter = calls.clone();
        let handler = move |_: &IncidentArtifact| -> Result<()> {
            *counter.lock().unwrap() += 1;
            Err(anyhow!("upload service down"))
        };
        let rec = IncidentRecorder::new(config(dir.path(), 1), filled_buffer(3), Arc::new(handler));

        assert!(rec.signal_start("x", 0.5));
        thread::sleep(QUIET);
        assert!(rec.wait_idle(PATIENCE));
        assert_eq!(*calls.lock().unwrap(), 1);

        // A fresh event can start afterwards.
        assert!(rec.signal_start("y", 0.5));
        assert!(rec.wait_idle(PATIENCE));
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[test]
    fn handler_panic_still_resets() {
        let dir = tempfile::tempdir().unwrap();
        let handler = |_: &IncidentArtifact| -> Result<()> { panic!("handler bug") };
        let rec = IncidentRecorder::new(config(dir.path(), 1), filled_buffer(3), Arc::new(handler));

        assert!(rec.signal_start("x", 0.5));
        thread::sleep(QUIET);
        assert!(rec.wait_idle(PATIENCE));
        assert_eq!(rec.phase(), Phase::Idle);
    }

    #[test]
    fn encode_failure_leaves_no_file_and_skips_handler() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::channel();
        let rec = IncidentRecorder::with_writer(
            config(dir.path(), 1),
            filled_buffer(3),
            Arc::new(ChannelHandler(tx)),
            Box::new(FailingWriter),
        );

        assert!(rec.signal_start("x", 0.5));
        assert!(rx.recv_timeout(QUIET * 4).is_err());
        assert!(rec.wait_idle(PATIENCE));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn manual_trigger_uses_test_label() {
        let dir = tempfile::tempdir().unwrap();
        let (rec, rx) = recorder(dir.path(), 1, filled_buffer(4));

        assert!(rec.trigger_manual());
        assert!(!rec.trigger_manual());

        let artifact = rx.recv_timeout(PATIENCE).expect("artifact");
        assert_eq!(artifact.label, MANUAL_TEST_LABEL);
        assert_eq!(artifact.confidence, 1.0);
        assert!(artifact
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("manual_test_") && n.ends_with(".avi")));
    }

    #[test]
    fn pre_roll_precedes_event_frames() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = Arc::new(RollingBuffer::with_capacity(Duration::from_secs(60), 50));
        let (rec, _rx) = recorder(dir.path(), 1, buffer.clone());

        let now = SystemTime::now();
        for seq in 1..=4u64 {
            let f = Frame::new(seq, now, 2, 2, vec![0; 12]).unwrap();
            buffer.push(f.clone()).unwrap();
            rec.on_frame(&f);
        }
        assert!(rec.signal_start("x", 0.5));
        for seq in 5..=7u64 {
            let f = Frame::new(seq, now, 2, 2, vec![0; 12]).unwrap();
            buffer.push(f.clone()).unwrap();
            rec.on_frame(&f);
        }

        {
            let state = rec.shared.state();
            let order: Vec<u64> = state
                .pre_roll
                .iter()
                .chain(state.frames.iter())
                .map(|f| f.sequence)
                .collect();
            assert_eq!(order, vec![1, 2, 3, 4, 5, 6, 7]);
        }
        assert!(rec.wait_idle(PATIENCE));
    }
}
