//! Synthetic `stub://` backend.
//!
//! Produces a deterministic test pattern. The scene shifts every
//! `scene_period` frames so frame-difference detectors see periodic motion.
//! With a frame limit it behaves like a finite file: reads fail after the
//! last frame until `rewind()`.

use anyhow::{anyhow, Result};

use super::{CaptureBackend, CapturedImage};
use crate::frame::BYTES_PER_PIXEL;

#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub width: u32,
    pub height: u32,
    /// Advertised frame rate.
    pub fps: f64,
    /// Frames between scene changes; 0 disables them.
    pub scene_period: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30.0,
            scene_period: 50,
        }
    }
}

pub struct SyntheticSource {
    name: String,
    config: SyntheticConfig,
    limit: Option<u64>,
    position: u64,
    scene_state: u8,
    released: bool,
}

impl SyntheticSource {
    pub fn open(name: &str, limit: Option<u64>, config: SyntheticConfig) -> Result<Self> {
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!("synthetic source needs a non-zero resolution"));
        }
        log::info!("SyntheticSource: connected to stub://{}", name);
        Ok(Self {
            name: name.to_string(),
            config,
            limit,
            position: 0,
            scene_state: 0,
            released: false,
        })
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        let pixel_count =
            self.config.width as usize * self.config.height as usize * BYTES_PER_PIXEL;

        if self.config.scene_period > 0 && self.position % self.config.scene_period == 0 {
            self.scene_state = self.scene_state.wrapping_add(97);
        }

        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 / BYTES_PER_PIXEL as u64 + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }
}

impl CaptureBackend for SyntheticSource {
    fn read_frame(&mut self) -> Result<CapturedImage> {
        if self.released {
            return Err(anyhow!("stub://{} released", self.name));
        }
        if let Some(limit) = self.limit {
            if self.position >= limit {
                return Err(anyhow!("stub://{} reached end of clip", self.name));
            }
        }
        let data = self.generate_pixels();
        self.position += 1;
        Ok(CapturedImage {
            width: self.config.width,
            height: self.config.height,
            data,
        })
    }

    fn rewind(&mut self) -> Result<()> {
        if self.limit.is_none() {
            return Err(anyhow!("stub://{} is a live feed", self.name));
        }
        self.position = 0;
        Ok(())
    }

    fn reported_fps(&self) -> Option<f64> {
        Some(self.config.fps)
    }

    fn resolution(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    fn release(&mut self) {
        self.released = true;
    }
}
