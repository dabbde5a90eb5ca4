//! Read-only status surface.

use serde::Serialize;

use crate::detect::Verdict;
use crate::frame::BufferStats;
use crate::ingest::SourceStats;
use crate::recorder::Phase;

/// Point-in-time view of the pipeline, for API/CLI layers and health logs.
#[derive(Clone, Debug, Serialize)]
pub struct StatusSnapshot {
    pub camera_id: String,
    pub source: SourceStats,
    pub buffer: BufferStats,
    pub phase: Phase,
    /// Capturing or Finalizing.
    pub recording: bool,
    /// Capturing only.
    pub event_active: bool,
    pub detection_enabled: bool,
    pub last_verdict: Option<Verdict>,
}

impl StatusSnapshot {
    /// One-line summary for periodic health logging.
    pub fn summary(&self) -> String {
        format!(
            "camera={} running={} frames={} fps={:.1} buffer={}/{} ({:.1}s) phase={:?}",
            self.camera_id,
            self.source.running,
            self.source.frame_count,
            self.source.measured_fps,
            self.buffer.len,
            self.buffer.capacity,
            self.buffer.duration_secs,
            self.phase,
        )
    }
}
