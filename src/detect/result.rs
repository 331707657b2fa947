use serde::Serialize;

use crate::frame::FrameShape;

/// Axis-aligned pixel box, inclusive corners.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub const fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Swap corners so that x1 <= x2 and y1 <= y2.
    pub fn normalized(self) -> Self {
        Self {
            x1: self.x1.min(self.x2),
            y1: self.y1.min(self.y2),
            x2: self.x1.max(self.x2),
            y2: self.y1.max(self.y2),
        }
    }

    /// Clamp both corners into a frame of the given shape.
    pub fn clamped_to(self, shape: FrameShape) -> Self {
        let max_x = shape.width.saturating_sub(1) as i32;
        let max_y = shape.height.saturating_sub(1) as i32;
        Self {
            x1: self.x1.clamp(0, max_x),
            y1: self.y1.clamp(0, max_y),
            x2: self.x2.clamp(0, max_x),
            y2: self.y2.clamp(0, max_y),
        }
    }

    /// A box with no extent on either axis is not drawable.
    pub fn is_degenerate(&self) -> bool {
        self.x2 <= self.x1 || self.y2 <= self.y1
    }

    pub fn width(&self) -> u32 {
        (self.x2 - self.x1).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.y2 - self.y1).max(0) as u32
    }
}

/// One detected object: box, label and confidence.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub label: String,
    pub score: f32,
}

impl Detection {
    pub fn new(bbox: BoundingBox, label: impl Into<String>, score: f32) -> Self {
        Self {
            bbox,
            label: label.into(),
            score,
        }
    }
}

/// Ordered detections plus the pixel shape they were computed against.
///
/// Boxes, labels and scores travel together in `Detection`, so they cannot
/// drift out of alignment.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectionSet {
    pub detections: Vec<Detection>,
    pub source_shape: FrameShape,
}

impl DetectionSet {
    pub fn new(detections: Vec<Detection>, source_shape: FrameShape) -> Self {
        Self {
            detections,
            source_shape,
        }
    }

    pub fn empty(source_shape: FrameShape) -> Self {
        Self::new(Vec::new(), source_shape)
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn boxes(&self) -> Vec<BoundingBox> {
        self.detections.iter().map(|d| d.bbox).collect()
    }
}
