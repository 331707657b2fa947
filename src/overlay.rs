//! Detection overlays: boxes, labels and scores drawn onto a copy of a frame.

use ab_glyph::{FontArc, PxScale};
use anyhow::{Context, Result};
use image::Rgb;
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::path::Path;

use crate::detect::{BoundingBox, Detection};
use crate::frame::{Frame, FrameShape};

const LABEL_GAP: i32 = 2;

/// How overlays look.
#[derive(Clone, Debug)]
pub struct OverlayStyle {
    pub color: [u8; 3],
    pub thickness: u32,
    /// Label glyph height in pixels.
    pub text_height: f32,
    /// Without a font, labels are drawn as solid tabs sized to the text.
    pub font: Option<FontArc>,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            color: [0, 255, 0],
            thickness: 2,
            text_height: 12.0,
            font: None,
        }
    }
}

impl OverlayStyle {
    pub fn with_font(mut self, font: FontArc) -> Self {
        self.font = Some(font);
        self
    }
}

/// Load a TTF/OTF font from disk.
pub fn load_font(path: &Path) -> Result<FontArc> {
    let bytes =
        std::fs::read(path).with_context(|| format!("read font file {}", path.display()))?;
    FontArc::try_from_vec(bytes).with_context(|| format!("parse font file {}", path.display()))
}

/// Draw detections onto a copy of `frame`. The input is never modified.
///
/// Detections scoring below `score_threshold` are skipped. Boxes are clamped
/// into the frame and skipped if nothing is left after clamping.
pub fn draw_overlays(
    frame: &Frame,
    detections: &[Detection],
    score_threshold: f32,
    style: &OverlayStyle,
) -> Frame {
    let shape = frame.shape();
    let mut canvas = frame.image().clone();
    if shape.is_empty() {
        return frame.with_image(canvas);
    }
    let color = Rgb(style.color);

    for det in detections {
        if det.score < score_threshold {
            continue;
        }
        let bbox = det.bbox.clamped_to(shape);
        if bbox.is_degenerate() {
            continue;
        }

        for inset in 0..style.thickness.max(1) as i32 {
            let w = bbox.width() as i32 + 1 - 2 * inset;
            let h = bbox.height() as i32 + 1 - 2 * inset;
            if w <= 0 || h <= 0 {
                break;
            }
            let rect = Rect::at(bbox.x1 + inset, bbox.y1 + inset).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(&mut canvas, rect, color);
        }

        let text = label_text(det);
        let scale = PxScale::from(style.text_height);
        let size = match &style.font {
            Some(font) => text_size(scale, font, &text),
            None => approx_text_size(&text, style.text_height),
        };
        let (x, y) = label_origin(bbox, size, shape);
        match &style.font {
            Some(font) => draw_text_mut(&mut canvas, color, x, y, scale, font, &text),
            None => {
                if size.0 > 0 && size.1 > 0 {
                    let bar = Rect::at(x, y).of_size(size.0, size.1);
                    draw_filled_rect_mut(&mut canvas, bar, color);
                }
            }
        }
    }

    frame.with_image(canvas)
}

fn label_text(det: &Detection) -> String {
    if det.label.is_empty() {
        format!("{:.2}", det.score)
    } else {
        format!("{} {:.2}", det.label, det.score)
    }
}

fn approx_text_size(text: &str, height: f32) -> (u32, u32) {
    let h = height.max(1.0);
    ((text.chars().count() as f32 * h * 0.55).ceil() as u32, h.ceil() as u32)
}

/// Top-left corner for a label of `size` attached to `bbox`.
///
/// Above the box when there is room, otherwise just inside its top edge; the
/// label is always kept on the canvas.
pub(crate) fn label_origin(bbox: BoundingBox, size: (u32, u32), shape: FrameShape) -> (i32, i32) {
    let (label_w, label_h) = (size.0 as i32, size.1 as i32);
    let above = bbox.y1 - LABEL_GAP - label_h;
    let y = if above >= 0 { above } else { bbox.y1 + LABEL_GAP };
    let y = y.min(shape.height as i32 - label_h).max(0);
    let x = bbox.x1.min(shape.width as i32 - label_w).max(0);
    (x, y)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank(w: u32, h: u32) -> Frame {
        Frame::filled(FrameShape::new(h, w), [0, 0, 0])
    }

    #[test]
    fn input_frame_is_not_modified() {
        let frame = blank(100, 100);
        let dets = vec![Detection::new(BoundingBox::new(20, 30, 60, 70), "a", 0.9)];
        let out = draw_overlays(&frame, &dets, 0.0, &OverlayStyle::default());
        assert!(frame.image().pixels().all(|p| p.0 == [0, 0, 0]));
        assert_eq!(out.image().get_pixel(20, 50).0, [0, 255, 0]);
        assert_eq!(out.image().get_pixel(60, 50).0, [0, 255, 0]);
        assert_eq!(out.image().get_pixel(40, 50).0, [0, 0, 0]);
        assert_eq!(out.captured_at(), frame.captured_at());
    }

    #[test]
    fn below_threshold_is_skipped() {
        let frame = blank(50, 50);
        let dets = vec![Detection::new(BoundingBox::new(5, 20, 40, 40), "a", 0.2)];
        let out = draw_overlays(&frame, &dets, 0.5, &OverlayStyle::default());
        assert!(out.same_pixels(&frame));
    }

    #[test]
    fn degenerate_after_clamp_is_skipped() {
        let frame = blank(50, 50);
        let dets = vec![
            Detection::new(BoundingBox::new(60, 10, 90, 30), "off", 0.9),
            Detection::new(BoundingBox::new(10, 10, 10, 30), "flat", 0.9),
        ];
        let out = draw_overlays(&frame, &dets, 0.0, &OverlayStyle::default());
        assert!(out.same_pixels(&frame));
    }

    #[test]
    fn oversized_box_is_clamped_onto_the_canvas() {
        let frame = blank(40, 40);
        let dets = vec![Detection::new(BoundingBox::new(-10, 20, 100, 100), "", 0.9)];
        let style = OverlayStyle {
            thickness: 1,
            ..OverlayStyle::default()
        };
        let out = draw_overlays(&frame, &dets, 0.0, &style);
        assert_eq!(out.image().get_pixel(0, 30).0, [0, 255, 0]);
        assert_eq!(out.image().get_pixel(39, 30).0, [0, 255, 0]);
        assert_eq!(out.image().get_pixel(20, 39).0, [0, 255, 0]);
    }

    #[test]
    fn fontless_label_is_a_bar_above_the_box() {
        let frame = blank(100, 100);
        let dets = vec![Detection::new(BoundingBox::new(10, 40, 50, 80), "a", 0.9)];
        let out = draw_overlays(&frame, &dets, 0.0, &OverlayStyle::default());
        // "a 0.90" at 12px is a 40x12 bar at (10, 26)
        assert_eq!(out.image().get_pixel(20, 30).0, [0, 255, 0]);
        assert_eq!(out.image().get_pixel(49, 37).0, [0, 255, 0]);
        assert_eq!(out.image().get_pixel(20, 38).0, [0, 0, 0]);
        assert_eq!(out.image().get_pixel(51, 30).0, [0, 0, 0]);
    }

    #[test]
    fn label_goes_above_when_there_is_margin() {
        let shape = FrameShape::new(100, 100);
        let (x, y) = label_origin(BoundingBox::new(10, 40, 50, 80), (30, 12), shape);
        assert_eq!((x, y), (10, 26));
    }

    #[test]
    fn label_goes_inside_near_top_edge() {
        let shape = FrameShape::new(100, 100);
        let (x, y) = label_origin(BoundingBox::new(10, 5, 50, 80), (30, 12), shape);
        assert_eq!((x, y), (10, 7));
    }

    #[test]
    fn label_never_leaves_canvas() {
        let shape = FrameShape::new(20, 40);
        let (x, y) = label_origin(BoundingBox::new(35, 15, 39, 19), (30, 12), shape);
        assert_eq!((x, y), (10, 1));
        assert!(x >= 0 && x + 30 <= 40);
        assert!(y >= 0 && y + 12 <= 20);

        let short = FrameShape::new(12, 40);
        let (x, y) = label_origin(BoundingBox::new(2, 5, 20, 11), (30, 12), short);
        assert_eq!((x, y), (2, 0));
    }
}
