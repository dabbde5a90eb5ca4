use anyhow::Result;

use crate::detect::detector::{Detector, Verdict};
use crate::frame::Frame;

/// Per-pixel grayscale difference that counts as motion.
const PIXEL_DELTA: u8 = 50;

/// Frame-difference motion detector.
///
/// For each consecutive pair: `score = min(1, 5 * moving_area) * intensity`,
/// where `moving_area` is the fraction of pixels whose grayscale difference
/// exceeds `PIXEL_DELTA` and `intensity` is their mean difference / 255. The
/// window score is the mean over pairs. The last frame is kept so that the
/// next window is compared against it.
pub struct MotionDetector {
    threshold: f32,
    label: String,
    previous: Option<Gray>,
}

struct Gray {
    width: u32,
    height: u32,
    luma: Vec<u8>,
}

impl Gray {
    fn from_frame(frame: &Frame) -> Self {
        let luma = frame
            .pixels()
            .chunks_exact(3)
            .map(|px| {
                let y = 299 * px[0] as u32 + 587 * px[1] as u32 + 114 * px[2] as u32;
                (y / 1000) as u8
            })
            .collect();
        Self {
            width: frame.width,
            height: frame.height,
            luma,
        }
    }

    fn motion_against(&self, previous: &Gray) -> f32 {
        if (self.width, self.height) != (previous.width, previous.height) || self.luma.is_empty()
        {
            return 0.0;
        }
        let mut moving = 0u64;
        let mut delta_sum = 0u64;
        for (a, b) in self.luma.iter().zip(&previous.luma) {
            let delta = a.abs_diff(*b);
            if delta > PIXEL_DELTA {
                moving += 1;
                delta_sum += delta as u64;
            }
        }
        if moving == 0 {
            return 0.0;
        }
        let area = moving as f32 / self.luma.len() as f32;
        let intensity = delta_sum as f32 / moving as f32 / 255.0;
        (area * 5.0).min(1.0) * intensity
    }
}

impl MotionDetector {
    pub fn new(threshold: f32, label: impl Into<String>) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
            label: label.into(),
            previous: None,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold.clamp(0.0, 1.0);
    }
}

impl Detector for MotionDetector {
    fn name(&self) -> &'static str {
        "motion"
    }

    fn evaluate(&mut self, frames: &[Frame]) -> Result<Verdict> {
        let Some(last) = frames.last() else {
            return Ok(Verdict::quiet());
        };

        let mut scores = Vec::with_capacity(frames.len());
        let mut previous = self.previous.take();
        for frame in frames {
            let gray = Gray::from_frame(frame);
            if let Some(prev) = &previous {
                scores.push(gray.motion_against(prev));
            }
            previous = Some(gray);
        }
        self.previous = previous;
        log::trace!("motion window ending #{}: {:?}", last.sequence, scores);

        if scores.is_empty() {
            return Ok(Verdict::quiet());
        }
        let confidence = (scores.iter().sum::<f32>() / scores.len() as f32).min(1.0);
        Ok(Verdict {
            is_event: confidence >= self.threshold,
            confidence,
            label: self.label.clone(),
        })
    }

    fn reset(&mut self) {
        self.previous = None;
    }
}
