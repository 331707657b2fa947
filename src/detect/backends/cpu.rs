use anyhow::Result;

use crate::detect::backend::Detector;
use crate::detect::result::{BoundingBox, Detection, DetectionSet};
use crate::frame::Frame;

/// CPU backend that boxes every pixel close to a target color.
///
/// Produces at most one detection. The score is the fraction of sampled
/// pixels inside the box that matched, so a solid target scores near 1.0.
pub struct ColorTargetDetector {
    target: [u8; 3],
    tolerance: u8,
    min_pixels: usize,
    step: u32,
    label: String,
}

impl ColorTargetDetector {
    pub fn new(target: [u8; 3], label: impl Into<String>) -> Self {
        Self {
            target,
            tolerance: 40,
            min_pixels: 4,
            step: 1,
            label: label.into(),
        }
    }

    pub fn with_tolerance(mut self, tolerance: u8) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Sample every `step`th pixel on both axes.
    pub fn with_step(mut self, step: u32) -> Self {
        self.step = step.max(1);
        self
    }

    pub fn with_min_pixels(mut self, min_pixels: usize) -> Self {
        self.min_pixels = min_pixels.max(1);
        self
    }

    fn matches(&self, pixel: &[u8; 3]) -> bool {
        pixel
            .iter()
            .zip(self.target.iter())
            .all(|(&p, &t)| p.abs_diff(t) <= self.tolerance)
    }
}

impl Detector for ColorTargetDetector {
    fn name(&self) -> &'static str {
        "color"
    }

    fn detect(&mut self, frame: &Frame) -> Result<DetectionSet> {
        let image = frame.image();
        let mut matched = 0usize;
        let mut bounds: Option<(u32, u32, u32, u32)> = None;

        for y in (0..image.height()).step_by(self.step as usize) {
            for x in (0..image.width()).step_by(self.step as usize) {
                if !self.matches(&image.get_pixel(x, y).0) {
                    continue;
                }
                matched += 1;
                bounds = Some(match bounds {
                    None => (x, y, x, y),
                    Some((x1, y1, x2, y2)) => (x1.min(x), y1.min(y), x2.max(x), y2.max(y)),
                });
            }
        }

        let Some((x1, y1, x2, y2)) = bounds else {
            return Ok(DetectionSet::empty(frame.shape()));
        };
        if matched < self.min_pixels {
            return Ok(DetectionSet::empty(frame.shape()));
        }

        let sampled = ((x2 - x1) / self.step + 1) as usize * ((y2 - y1) / self.step + 1) as usize;
        let score = (matched as f32 / sampled as f32).min(1.0);
        let bbox = BoundingBox::new(x1 as i32, y1 as i32, x2 as i32, y2 as i32);
        Ok(DetectionSet::new(
            vec![Detection::new(bbox, self.label.clone(), score)],
            frame.shape(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameShape;
    use image::Rgb;

    fn frame_with_square(x: u32, y: u32, size: u32) -> Frame {
        let shape = FrameShape::new(60, 80);
        let mut image = Frame::filled(shape, [20, 20, 20]).into_image();
        for yy in y..y + size {
            for xx in x..x + size {
                image.put_pixel(xx, yy, Rgb([230, 40, 40]));
            }
        }
        Frame::new(image)
    }

    #[test]
    fn boxes_the_target_square() {
        let mut detector = ColorTargetDetector::new([230, 40, 40], "target");
        let set = detector.detect(&frame_with_square(10, 20, 15)).unwrap();
        assert_eq!(set.source_shape, FrameShape::new(60, 80));
        assert_eq!(set.len(), 1);
        let det = &set.detections[0];
        assert_eq!(det.bbox, BoundingBox::new(10, 20, 24, 34));
        assert_eq!(det.label, "target");
        assert!((det.score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn no_target_means_no_detections() {
        let mut detector = ColorTargetDetector::new([0, 255, 0], "target");
        let set = detector.detect(&frame_with_square(10, 20, 15)).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn tiny_blobs_are_ignored() {
        let mut detector = ColorTargetDetector::new([230, 40, 40], "target").with_min_pixels(10);
        let set = detector.detect(&frame_with_square(5, 5, 3)).unwrap();
        assert!(set.is_empty());
    }
}
