//! The capture loop.
//!
//! `FrameSource` owns the capture resource on a dedicated thread. Every frame
//! goes to the every-frame consumers; a down-sampled subset goes to the
//! analysis consumers. Finite assets loop, live feeds reconnect with backoff.
//! Nothing inside the loop surfaces to the caller after `start()` returns.

use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

use super::{BackendFactory, CaptureBackend, DefaultBackendFactory, SourceSpec};
use crate::consumer::FrameConsumers;
use crate::error::Error;
use crate::frame::Frame;

/// Window over which measured throughput is recomputed.
const THROUGHPUT_WINDOW: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
pub struct SourceConfig {
    /// Upper bound on ingestion rate; the source's own rate caps it further.
    pub target_fps: u32,
    /// Rate at which analysis consumers receive frames.
    pub analysis_fps: u32,
    /// Wait between a live-feed read failure and the reopen attempt.
    pub reconnect_backoff: Duration,
    /// Bound on how long `stop()` waits for the loop to exit.
    pub stop_timeout: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            target_fps: 30,
            analysis_fps: 5,
            reconnect_backoff: Duration::from_secs(1),
            stop_timeout: Duration::from_secs(2),
        }
    }
}

/// Wall-clock source for frame capture times.
pub type Clock = Arc<dyn Fn() -> SystemTime + Send + Sync>;

/// Live counters for the status surface.
#[derive(Clone, Debug, Default, Serialize)]
pub struct SourceStats {
    pub running: bool,
    pub spec: Option<String>,
    pub frame_count: u64,
    pub measured_fps: f64,
    pub effective_fps: u32,
    pub resolution: (u32, u32),
    pub reconnects: u64,
    pub rewinds: u64,
}

struct Shared {
    running: AtomicBool,
    next_sequence: AtomicU64,
    stats: Mutex<SourceStats>,
    last_frame: Mutex<Option<Frame>>,
}

impl Shared {
    fn stats(&self) -> MutexGuard<'_, SourceStats> {
        self.stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn last_frame(&self) -> MutexGuard<'_, Option<Frame>> {
        self.last_frame
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct Worker {
    stop_tx: Sender<()>,
    done_rx: Receiver<()>,
    join: JoinHandle<()>,
}

pub struct FrameSource {
    config: SourceConfig,
    consumers: FrameConsumers,
    factory: Arc<dyn BackendFactory>,
    clock: Clock,
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl FrameSource {
    pub fn new(config: SourceConfig, consumers: FrameConsumers) -> Self {
        Self::with_factory(config, consumers, Arc::new(DefaultBackendFactory::default()))
    }

    pub fn with_factory(
        config: SourceConfig,
        consumers: FrameConsumers,
        factory: Arc<dyn BackendFactory>,
    ) -> Self {
        Self {
            config,
            consumers,
            factory,
            clock: Arc::new(SystemTime::now),
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                next_sequence: AtomicU64::new(0),
                stats: Mutex::new(SourceStats::default()),
                last_frame: Mutex::new(None),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Replace the capture-time clock. Takes effect on the next `start()`.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn worker(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open `spec` and spawn the capture loop. Fails fast, without retry,
    /// when the resource cannot be opened.
    pub fn start(&self, spec: &str) -> Result<(), Error> {
        let mut worker = self.worker();
        if worker.is_some() {
            return Err(Error::AlreadyRunning);
        }
        if self.config.target_fps == 0 || self.config.analysis_fps == 0 {
            return Err(Error::InvalidConfig(
                "target_fps and analysis_fps must be > 0".into(),
            ));
        }

        let parsed = SourceSpec::parse(spec).map_err(|e| Error::SourceUnavailable {
            spec: spec.to_string(),
            reason: format!("{:#}", e),
        })?;
        let backend = self
            .factory
            .open(&parsed)
            .map_err(|e| Error::SourceUnavailable {
                spec: parsed.to_string(),
                reason: format!("{:#}", e),
            })?;

        let effective_fps = effective_fps(self.config.target_fps, backend.reported_fps());
        {
            let mut stats = self.shared.stats();
            stats.running = true;
            stats.spec = Some(parsed.to_string());
            stats.effective_fps = effective_fps;
            stats.resolution = backend.resolution();
            stats.measured_fps = 0.0;
        }
        self.shared.running.store(true, Ordering::SeqCst);

        let (stop_tx, stop_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let capture = CaptureLoop {
            spec: parsed,
            backend: Some(backend),
            factory: self.factory.clone(),
            consumers: self.consumers.clone(),
            shared: self.shared.clone(),
            frame_interval: Duration::from_secs_f64(1.0 / effective_fps as f64),
            analysis_interval: Duration::from_secs_f64(1.0 / self.config.analysis_fps as f64),
            reconnect_backoff: self.config.reconnect_backoff,
            clock: self.clock.clone(),
            stop_rx,
        };

        log::info!(
            "frame source started: {} @ {} fps (analysis {} fps)",
            capture.spec,
            effective_fps,
            self.config.analysis_fps
        );

        let spawned = std::thread::Builder::new()
            .name("frame-source".into())
            .spawn(move || {
                capture.run();
                let _ = done_tx.send(());
            });
        let join = match spawned {
            Ok(join) => join,
            Err(e) => {
                self.mark_stopped();
                return Err(Error::SourceUnavailable {
                    spec: spec.to_string(),
                    reason: format!("failed to spawn capture thread: {}", e),
                });
            }
        };

        *worker = Some(Worker {
            stop_tx,
            done_rx,
            join,
        });
        Ok(())
    }

    /// Signal the loop to exit and wait up to `stop_timeout` for it.
    /// Idempotent. A loop stuck mid-read past the timeout is detached; it
    /// releases the resource itself when the read returns.
    pub fn stop(&self) {
        let Some(worker) = self.worker().take() else {
            return;
        };
        self.shared.running.store(false, Ordering::SeqCst);
        let Worker {
            stop_tx,
            done_rx,
            join,
        } = worker;
        drop(stop_tx);

        match done_rx.recv_timeout(self.config.stop_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if join.join().is_err() {
                    log::error!("frame source thread panicked");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "frame source did not stop within {:?}; detaching capture thread",
                    self.config.stop_timeout
                );
            }
        }
        self.mark_stopped();
        log::info!("frame source stopped");
    }

    fn mark_stopped(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        let mut stats = self.shared.stats();
        stats.running = false;
        stats.measured_fps = 0.0;
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> SourceStats {
        self.shared.stats().clone()
    }

    /// Copy of the most recent frame.
    pub fn last_frame(&self) -> Option<Frame> {
        self.shared.last_frame().clone()
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// `min(target, reported)`; the reported rate is ignored when unknown or zero.
pub(crate) fn effective_fps(target: u32, reported: Option<f64>) -> u32 {
    match reported {
        Some(fps) if fps >= 1.0 => target.min(fps.floor() as u32).max(1),
        _ => target.max(1),
    }
}

// ----------------------------------------------------------------------------
// Capture loop
// ----------------------------------------------------------------------------

struct CaptureLoop {
    spec: SourceSpec,
    backend: Option<Box<dyn CaptureBackend>>,
    factory: Arc<dyn BackendFactory>,
    consumers: FrameConsumers,
    shared: Arc<Shared>,
    frame_interval: Duration,
    analysis_interval: Duration,
    reconnect_backoff: Duration,
    clock: Clock,
    stop_rx: Receiver<()>,
}

enum Wait {
    Elapsed,
    Stop,
}

impl CaptureLoop {
    fn run(mut self) {
        let mut last_analysis: Option<Instant> = None;
        let mut window_start = Instant::now();
        let mut window_frames = 0u64;
        let mut frames_since_rewind = 0u64;

        loop {
            if self.stop_requested() {
                break;
            }
            let loop_start = Instant::now();

            let Some(backend) = self.backend.as_mut() else {
                if let Wait::Stop = self.wait(self.reconnect_backoff) {
                    break;
                }
                self.reopen();
                continue;
            };

            let image = match backend.read_frame() {
                Ok(image) => image,
                Err(e) if !self.spec.is_live() && frames_since_rewind > 0 => {
                    log::debug!("{}: end of stream ({:#}); looping", self.spec, e);
                    frames_since_rewind = 0;
                    match backend.rewind() {
                        Ok(()) => self.shared.stats().rewinds += 1,
                        Err(e) => {
                            log::warn!("{}: rewind failed: {:#}", self.spec, e);
                            self.drop_backend();
                        }
                    }
                    continue;
                }
                Err(e) => {
                    log::warn!(
                        "{}: read failed ({:#}); reconnecting in {:?}",
                        self.spec,
                        e,
                        self.reconnect_backoff
                    );
                    frames_since_rewind = 0;
                    window_frames = 0;
                    window_start = Instant::now();
                    self.shared.stats().measured_fps = 0.0;
                    if let Wait::Stop = self.wait(self.reconnect_backoff) {
                        break;
                    }
                    self.drop_backend();
                    self.reopen();
                    continue;
                }
            };

            let sequence = self.shared.next_sequence.fetch_add(1, Ordering::SeqCst);
            let captured_at = self.stamp();
            match Frame::new(sequence, captured_at, image.width, image.height, image.data) {
                Ok(frame) => {
                    frames_since_rewind += 1;
                    window_frames += 1;
                    {
                        let mut stats = self.shared.stats();
                        stats.frame_count += 1;
                        stats.resolution = (frame.width, frame.height);
                        let elapsed = window_start.elapsed();
                        if elapsed >= THROUGHPUT_WINDOW {
                            stats.measured_fps = window_frames as f64 / elapsed.as_secs_f64();
                            window_frames = 0;
                            window_start = Instant::now();
                        }
                    }
                    *self.shared.last_frame() = Some(frame.clone());

                    guarded("every-frame", || self.consumers.deliver_every_frame(&frame));

                    let now = Instant::now();
                    let analysis_due = last_analysis
                        .map_or(true, |last| now.duration_since(last) >= self.analysis_interval);
                    if analysis_due {
                        guarded("analysis", || self.consumers.deliver_analysis(&frame));
                        last_analysis = Some(now);
                    }
                }
                // Still paced below, so a backend stuck on bad sizes cannot spin.
                Err(e) => log::warn!("{}: discarding malformed frame: {:#}", self.spec, e),
            }

            let elapsed = loop_start.elapsed();
            if elapsed < self.frame_interval {
                if let Wait::Stop = self.wait(self.frame_interval - elapsed) {
                    break;
                }
            }
        }

        self.drop_backend();
        log::debug!("{}: capture loop exited", self.spec);
    }

    /// Wall-clock stamp, held at the previous frame's time while the clock
    /// runs behind it. The rolling buffer rejects regressions.
    fn stamp(&self) -> SystemTime {
        let now = (self.clock)();
        match self.shared.last_frame().as_ref() {
            Some(last) if last.captured_at > now => last.captured_at,
            _ => now,
        }
    }

    fn stop_requested(&self) -> bool {
        !matches!(self.stop_rx.try_recv(), Err(TryRecvError::Empty))
    }

    /// Sleep that returns early when `stop()` drops the stop sender.
    fn wait(&self, duration: Duration) -> Wait {
        match self.stop_rx.recv_timeout(duration) {
            Err(RecvTimeoutError::Timeout) => Wait::Elapsed,
            _ => Wait::Stop,
        }
    }

    fn drop_backend(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            backend.release();
        }
    }

    fn reopen(&mut self) {
        match self.factory.open(&self.spec) {
            Ok(backend) => {
                log::info!("{}: reconnected", self.spec);
                self.shared.stats().reconnects += 1;
                self.backend = Some(backend);
            }
            Err(e) => log::warn!("{}: reconnect failed: {:#}", self.spec, e),
        }
    }
}

/// Consumers report failures as values; a panic is also contained here so the
/// loop keeps running.
fn guarded(stage: &str, deliver: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(deliver)).is_err() {
        log::error!("{} consumer panicked; frame dropped for that stage", stage);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
