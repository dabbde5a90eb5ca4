use thiserror::Error;

/// Caller-visible failures.
///
/// Everything else inside the capture and finalize paths is logged and
/// absorbed; these are the only kinds that reach a caller.
#[derive(Debug, Error)]
pub enum Error {
    /// The capture resource could not be opened at `start()`.
    #[error("video source '{spec}' unavailable: {reason}")]
    SourceUnavailable { spec: String, reason: String },

    #[error("frame source already running")]
    AlreadyRunning,

    /// A frame violated the buffer ordering invariant.
    #[error("frame out of order (last sequence {last}, got {got})")]
    OutOfOrder { last: u64, got: u64 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
