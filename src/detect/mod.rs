//! Detection capability and its wiring into the recorder.
//!
//! The recorder does not care how events are detected. A `Detector` scores a
//! short window of analysis frames; `DetectionStage` feeds it and turns
//! positive verdicts into `signal_start` / `signal_continue`.

mod detector;
mod motion;
mod stage;

pub use detector::{Detector, Verdict};
pub use motion::MotionDetector;
pub use stage::{DetectionStage, StageConfig};
