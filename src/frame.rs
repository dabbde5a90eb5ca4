//! Frames and the rolling pre-roll window.
//!
//! - `Frame`: one captured RGB24 image with capture time and sequence number.
//! - `RollingBuffer`: bounded, time-windowed store of the most recent frames.
//!
//! Frames are deep-copied at every hand-off (buffer, snapshot, event list), so
//! no two threads ever share a mutable pixel buffer.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime};
use zeroize::Zeroize;

use crate::consumer::{ConsumerError, FrameConsumer};
use crate::error::Error;

/// Bytes per pixel of frame storage (RGB24).
pub const BYTES_PER_PIXEL: usize = 3;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One captured image. `Clone` is a deep copy of the pixel data.
#[derive(Clone)]
pub struct Frame {
    /// Monotonic per-source sequence number.
    pub sequence: u64,
    /// Wall-clock capture time.
    pub captured_at: SystemTime,
    pub width: u32,
    pub height: u32,
    /// Packed RGB24 rows, no padding.
    data: Vec<u8>,
}

impl Frame {
    pub fn new(
        sequence: u64,
        captured_at: SystemTime,
        width: u32,
        height: u32,
        data: Vec<u8>,
    ) -> Result<Self> {
        let expected = width as usize * height as usize * BYTES_PER_PIXEL;
        if data.len() != expected {
            return Err(anyhow!(
                "frame #{} payload is {} bytes, expected {} for {}x{} RGB24",
                sequence,
                data.len(),
                expected,
                width,
                height
            ));
        }
        Ok(Self {
            sequence,
            captured_at,
            width,
            height,
            data,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Pixel content never goes to logs.
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("captured_at", &self.captured_at)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.data.zeroize();
    }
}

// ----------------------------------------------------------------------------
// RollingBuffer
// ----------------------------------------------------------------------------

/// Point-in-time counters for the status surface.
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct BufferStats {
    pub len: usize,
    pub capacity: usize,
    /// Span between oldest and newest retained frame, in seconds.
    pub duration_secs: f64,
    pub total_pushed: u64,
    pub evicted: u64,
}

struct Inner {
    frames: VecDeque<Frame>,
    last_sequence: Option<u64>,
    total_pushed: u64,
    evicted: u64,
}

/// Bounded rolling window of recent frames.
///
/// Single writer (the capture thread), any number of readers. One mutex guards
/// the container; it is held for the push/evict or the copy, never for decode
/// or I/O.
///
/// Invariants:
/// - `len() <= capacity()`
/// - sequence numbers strictly increase, timestamps never decrease
/// - frames older than the window (relative to the newest push) are evicted
pub struct RollingBuffer {
    inner: Mutex<Inner>,
    capacity: usize,
    window: Duration,
}

impl RollingBuffer {
    /// Window of `window` at `fps` frames per second; capacity is
    /// `window_secs * fps`, at least one frame.
    pub fn new(window: Duration, fps: u32) -> Self {
        let capacity = ((window.as_secs_f64() * fps as f64).round() as usize).max(1);
        Self::with_capacity(window, capacity)
    }

    pub fn with_capacity(window: Duration, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                frames: VecDeque::with_capacity(capacity),
                last_sequence: None,
                total_pushed: 0,
                evicted: 0,
            }),
            capacity,
            window,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // The deque stays structurally valid even if a holder panicked.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a frame, then evict from the front while over capacity or older
    /// than the window. The pushed frame's capture time is "now".
    pub fn push(&self, frame: Frame) -> Result<(), Error> {
        let mut inner = self.lock();

        if let Some(last) = inner.last_sequence {
            if frame.sequence <= last {
                return Err(Error::OutOfOrder {
                    last,
                    got: frame.sequence,
                });
            }
        }
        if let Some(newest) = inner.frames.back() {
            if frame.captured_at < newest.captured_at {
                return Err(Error::OutOfOrder {
                    last: newest.sequence,
                    got: frame.sequence,
                });
            }
        }

        let cutoff = frame.captured_at.checked_sub(self.window);
        inner.last_sequence = Some(frame.sequence);
        inner.total_pushed += 1;
        inner.frames.push_back(frame);

        while inner.frames.len() > self.capacity {
            inner.frames.pop_front();
            inner.evicted += 1;
        }
        if let Some(cutoff) = cutoff {
            while inner
                .frames
                .front()
                .is_some_and(|oldest| oldest.captured_at < cutoff)
            {
                inner.frames.pop_front();
                inner.evicted += 1;
            }
        }
        Ok(())
    }

    /// Independent copy of every retained frame, oldest first.
    pub fn snapshot(&self) -> Vec<Frame> {
        let inner = self.lock();
        inner.frames.iter().cloned().collect()
    }

    /// Frames captured at or after `since`, oldest first.
    pub fn range(&self, since: SystemTime) -> Vec<Frame> {
        let inner = self.lock();
        inner
            .frames
            .iter()
            .filter(|f| f.captured_at >= since)
            .cloned()
            .collect()
    }

    /// The `count` most recent frames, oldest first.
    pub fn recent(&self, count: usize) -> Vec<Frame> {
        let inner = self.lock();
        let skip = inner.frames.len().saturating_sub(count);
        inner.frames.iter().skip(skip).cloned().collect()
    }

    pub fn latest(&self) -> Option<Frame> {
        self.lock().frames.back().cloned()
    }

    /// Drop every frame and reset counters, including the sequence guard.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.frames.clear();
        inner.last_sequence = None;
        inner.total_pushed = 0;
        inner.evicted = 0;
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().frames.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Newest minus oldest capture time; zero with fewer than two frames.
    pub fn duration(&self) -> Duration {
        span(&self.lock().frames)
    }

    pub fn stats(&self) -> BufferStats {
        let inner = self.lock();
        BufferStats {
            len: inner.frames.len(),
            capacity: self.capacity,
            duration_secs: span(&inner.frames).as_secs_f64(),
            total_pushed: inner.total_pushed,
            evicted: inner.evicted,
        }
    }

    /// Approximate pixel memory held by the window.
    pub fn memory_bytes(&self) -> usize {
        self.lock().frames.iter().map(Frame::byte_len).sum()
    }
}

fn span(frames: &VecDeque<Frame>) -> Duration {
    match (frames.front(), frames.back()) {
        (Some(oldest), Some(newest)) if frames.len() >= 2 => newest
            .captured_at
            .duration_since(oldest.captured_at)
            .unwrap_or_default(),
        _ => Duration::ZERO,
    }
}

impl FrameConsumer for RollingBuffer {
    fn name(&self) -> &str {
        "rolling-buffer"
    }

    fn on_frame(&self, frame: &Frame) -> Result<(), ConsumerError> {
        self.push(frame.clone())
            .map_err(|e| ConsumerError::Rejected(e.to_string()))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
