use anyhow::Result;
use image::{Rgb, RgbImage};
use std::time::Instant;

use super::camera::{CaptureConfig, CaptureDevice, CapturedFrames};
use crate::frame::{Frame, FrameShape};

/// Color of the moving target in synthetic scenes.
pub const SYNTHETIC_TARGET: [u8; 3] = [230, 40, 40];

/// Camera device that renders a synthetic scene: a blue-green gradient with a
/// red square bouncing across it. Both streams show the same scene, rendered
/// at their own sizes.
pub struct SyntheticDevice {
    /// Square center in normalized scene coordinates.
    pos: (f32, f32),
    vel: (f32, f32),
    /// Square side as a fraction of the scene height.
    size: f32,
    frames: u64,
}

impl Default for SyntheticDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticDevice {
    pub fn new() -> Self {
        Self {
            pos: (0.3, 0.4),
            vel: (0.013, 0.009),
            size: 0.25,
            frames: 0,
        }
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames
    }

    fn advance(&mut self) {
        let half = self.size / 2.0;
        for (p, v) in [
            (&mut self.pos.0, &mut self.vel.0),
            (&mut self.pos.1, &mut self.vel.1),
        ] {
            *p += *v;
            if *p < half || *p > 1.0 - half {
                *v = -*v;
                *p = (*p).clamp(half, 1.0 - half);
            }
        }
    }

    /// Render the current scene at `shape`.
    pub fn render(&self, shape: FrameShape) -> RgbImage {
        let (w, h) = (shape.width, shape.height);
        let mut image = RgbImage::from_fn(w, h, |x, y| {
            let g = (x * 200 / w.max(1)) as u8;
            let b = (y * 200 / h.max(1)) as u8;
            Rgb([20, g / 2 + 30, b / 2 + 60])
        });

        let side = (self.size * h as f32).round().max(1.0) as u32;
        let cx = (self.pos.0 * w as f32).round() as i64;
        let cy = (self.pos.1 * h as f32).round() as i64;
        let x0 = (cx - side as i64 / 2).max(0) as u32;
        let y0 = (cy - side as i64 / 2).max(0) as u32;
        for y in y0..(y0 + side).min(h) {
            for x in x0..(x0 + side).min(w) {
                image.put_pixel(x, y, Rgb(SYNTHETIC_TARGET));
            }
        }
        image
    }
}

impl CaptureDevice for SyntheticDevice {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn capture(&mut self, config: &CaptureConfig) -> Result<CapturedFrames> {
        self.advance();
        self.frames += 1;
        let now = Instant::now();
        Ok(CapturedFrames {
            preview: config
                .enable_preview
                .then(|| Frame::with_timestamp(self.render(config.preview), now)),
            video: config
                .enable_video
                .then(|| Frame::with_timestamp(self.render(config.video), now)),
        })
    }
}
