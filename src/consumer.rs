//! Typed frame listeners.
//!
//! The frame source hands frames to two registration lists that are fixed at
//! construction: every-frame consumers (the rolling buffer, the incident
//! recorder) and analysis consumers (the detection stage), which only see the
//! down-sampled cadence. A consumer receives a borrowed frame and copies what
//! it keeps.

use std::sync::Arc;

use thiserror::Error;

use crate::frame::Frame;

/// Error returned by a consumer. Logged at the capture loop boundary, never
/// propagated into it.
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("frame rejected: {0}")]
    Rejected(String),
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

pub trait FrameConsumer: Send + Sync {
    /// Name used in log lines.
    fn name(&self) -> &str;

    fn on_frame(&self, frame: &Frame) -> Result<(), ConsumerError>;
}

/// Consumer registrations injected into a `FrameSource`.
#[derive(Clone, Default)]
pub struct FrameConsumers {
    every_frame: Vec<Arc<dyn FrameConsumer>>,
    analysis: Vec<Arc<dyn FrameConsumer>>,
}

impl FrameConsumers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a consumer that receives every captured frame, in
    /// registration order.
    pub fn every_frame(mut self, consumer: Arc<dyn FrameConsumer>) -> Self {
        self.every_frame.push(consumer);
        self
    }

    /// Register a consumer that receives frames at the analysis cadence.
    pub fn analysis(mut self, consumer: Arc<dyn FrameConsumer>) -> Self {
        self.analysis.push(consumer);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.every_frame.is_empty() && self.analysis.is_empty()
    }

    pub(crate) fn deliver_every_frame(&self, frame: &Frame) {
        deliver(&self.every_frame, frame);
    }

    pub(crate) fn deliver_analysis(&self, frame: &Frame) {
        deliver(&self.analysis, frame);
    }
}

fn deliver(consumers: &[Arc<dyn FrameConsumer>], frame: &Frame) {
    for consumer in consumers {
        if let Err(e) = consumer.on_frame(frame) {
            log::warn!(
                "consumer {} failed on frame #{}: {}",
                consumer.name(),
                frame.sequence,
                e
            );
        }
    }
}

impl<F> FrameConsumer for (&'static str, F)
where
    F: Fn(&Frame) -> Result<(), ConsumerError> + Send + Sync,
{
    fn name(&self) -> &str {
        self.0
    }

    fn on_frame(&self, frame: &Frame) -> Result<(), ConsumerError> {
        (self.1)(frame)
    }
}
