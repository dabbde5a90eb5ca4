//! Incident Recorder
//!
//! Continuous video ingestion with a rolling pre-roll window and an
//! event-driven recorder that turns detector signals into self-contained,
//! content-hashed incident videos.
//!
//! # Architecture
//!
//! ```text
//! FrameSource ──every frame──► RollingBuffer
//!      │        └────────────► IncidentRecorder ──► IncidentWriter ──► CompletionHandler
//!      └──analysis cadence───► DetectionStage ──signal_start / signal_continue──┘
//! ```
//!
//! Guarantees:
//!
//! 1. **Bounded memory**: the rolling buffer never exceeds its capacity or
//!    its time window.
//! 2. **Pre-roll first**: frames from before the event always precede the
//!    event's own frames in the artifact.
//! 3. **One artifact per event**: the completion handler runs exactly once
//!    per finalized incident, never for aborted ones.
//! 4. **No escaping errors**: consumer, encoder and handler failures are
//!    logged at their boundary; the capture loop and the state machine keep
//!    running.
//!
//! # Module Structure
//!
//! - `frame`: `Frame`, `RollingBuffer`
//! - `ingest`: source specs, capture backends, the `FrameSource` loop
//! - `consumer`: typed frame listener registrations
//! - `detect`: `Detector` capability and the `DetectionStage` wiring
//! - `recorder`: the incident state machine, writers, artifacts
//! - `retention`, `status`, `context`, `config`: daemon plumbing

pub mod config;
pub mod consumer;
pub mod context;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod recorder;
pub mod retention;
pub mod status;

pub use config::IncidentdConfig;
pub use consumer::{ConsumerError, FrameConsumer, FrameConsumers};
pub use context::IncidentContext;
pub use detect::{DetectionStage, Detector, MotionDetector, StageConfig, Verdict};
pub use error::Error;
pub use frame::{BufferStats, Frame, RollingBuffer};
pub use ingest::{
    BackendFactory, CaptureBackend, CapturedImage, DefaultBackendFactory, FrameSource,
    SourceConfig, SourceKind, SourceSpec, SourceStats,
};
pub use recorder::{
    ChannelHandler, CompletionHandler, EncoderKind, IncidentArtifact, IncidentRecorder,
    IncidentWriter, Phase, RecorderConfig,
};
pub use retention::SweepReport;
pub use status::StatusSnapshot;
