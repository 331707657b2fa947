use anyhow::Result;

use crate::detect::backend::Detector;
use crate::detect::result::{Detection, DetectionSet};
use crate::frame::Frame;

/// Stub backend. Returns a fixed list of detections for every frame.
#[derive(Default)]
pub struct StubDetector {
    detections: Vec<Detection>,
    calls: u64,
}

impl StubDetector {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            calls: 0,
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl Detector for StubDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &Frame) -> Result<DetectionSet> {
        self.calls += 1;
        Ok(DetectionSet::new(self.detections.clone(), frame.shape()))
    }
}
