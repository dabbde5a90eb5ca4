use anyhow::Result;
use serde::Serialize;

use crate::frame::Frame;

/// Outcome of one detector evaluation.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Verdict {
    pub is_event: bool,
    /// 0.0 ..= 1.0
    pub confidence: f32,
    pub label: String,
}

impl Verdict {
    pub fn quiet() -> Self {
        Self::default()
    }
}

/// Event detector.
///
/// Implementations see borrowed frames only for the duration of the call and
/// keep at most what they need for the next call (e.g. a previous frame).
pub trait Detector: Send {
    fn name(&self) -> &'static str;

    /// Score a window of consecutive analysis frames, oldest first.
    fn evaluate(&mut self, frames: &[Frame]) -> Result<Verdict>;

    /// Forget any state carried between calls.
    fn reset(&mut self) {}
}
