//! Onboard display output.
//!
//! Sinks only know how to push a panel-sized RGB image. Text and camera
//! frames are turned into that image by `letterbox` and
//! `render_centered_text`.

use ab_glyph::{FontArc, PxScale};
use anyhow::{anyhow, Result};
use image::imageops::FilterType;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::frame::{Frame, FrameShape};

pub mod framebuffer;

pub use framebuffer::FramebufferDisplay;

/// What to put on the panel.
#[derive(Clone, Debug)]
pub enum DisplayContent {
    Frame(Frame),
    Text(String),
}

#[derive(Clone, Debug)]
pub struct TextStyle {
    pub background: [u8; 3],
    pub foreground: [u8; 3],
    pub height: f32,
    pub font: Option<FontArc>,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            background: [0, 170, 170],
            foreground: [255, 255, 255],
            height: 18.0,
            font: None,
        }
    }
}

pub trait DisplaySink: Send {
    fn name(&self) -> &'static str;

    /// Panel size in pixels.
    fn size(&self) -> FrameShape;

    /// Push a panel-sized image.
    fn present(&mut self, image: &RgbImage) -> Result<()>;

    fn show(&mut self, content: &DisplayContent, style: &TextStyle) -> Result<()> {
        let panel = self.size();
        let image = match content {
            DisplayContent::Frame(frame) => letterbox(frame, panel)?,
            DisplayContent::Text(text) => render_centered_text(text, panel, style),
        };
        self.present(&image)
    }

    fn clear(&mut self) -> Result<()> {
        let panel = self.size();
        self.present(&RgbImage::new(panel.width, panel.height))
    }
}

/// Scale `frame` to fit `panel` keeping its aspect ratio, centered on black.
pub fn letterbox(frame: &Frame, panel: FrameShape) -> Result<RgbImage> {
    let (w, h) = (frame.width(), frame.height());
    if w == 0 || h == 0 {
        return Err(anyhow!("cannot letterbox an empty {} frame", frame.shape()));
    }
    if panel.is_empty() {
        return Err(anyhow!("display size {} has zero area", panel));
    }
    let scale = f64::min(
        panel.width as f64 / w as f64,
        panel.height as f64 / h as f64,
    );
    let new_w = ((w as f64 * scale) as u32).clamp(1, panel.width);
    let new_h = ((h as f64 * scale) as u32).clamp(1, panel.height);
    let resized = if (new_w, new_h) == (w, h) {
        frame.image().clone()
    } else {
        image::imageops::resize(frame.image(), new_w, new_h, FilterType::Triangle)
    };

    let mut canvas = RgbImage::new(panel.width, panel.height);
    let x = (panel.width - new_w) / 2;
    let y = (panel.height - new_h) / 2;
    image::imageops::replace(&mut canvas, &resized, x as i64, y as i64);
    Ok(canvas)
}

/// Multi-line text centered on a solid background.
///
/// Without a font each line is drawn as a bar of roughly the text's size.
pub fn render_centered_text(text: &str, panel: FrameShape, style: &TextStyle) -> RgbImage {
    let mut canvas = RgbImage::from_pixel(panel.width, panel.height, Rgb(style.background));
    if panel.is_empty() {
        return canvas;
    }
    let fg = Rgb(style.foreground);
    let scale = PxScale::from(style.height);
    let lines: Vec<&str> = text.split('\n').collect();
    let sizes: Vec<(u32, u32)> = lines
        .iter()
        .map(|line| {
            let line = if line.is_empty() { " " } else { line };
            match &style.font {
                Some(font) => text_size(scale, font, line),
                None => approx_line_size(line, style.height),
            }
        })
        .collect();

    let total_h: i64 = sizes.iter().map(|(_, h)| *h as i64).sum();
    let mut y = (panel.height as i64 - total_h) / 2;
    for (line, (w, h)) in lines.iter().zip(&sizes) {
        let x = (panel.width as i64 - *w as i64) / 2;
        match &style.font {
            Some(font) => draw_text_mut(&mut canvas, fg, x as i32, y as i32, scale, font, line),
            None => {
                if !line.trim().is_empty() {
                    let bar_h = (*h * 2 / 3).max(1);
                    draw_filled_rect_mut(
                        &mut canvas,
                        Rect::at(x as i32, (y + (*h - bar_h) as i64 / 2) as i32).of_size(*w, bar_h),
                        fg,
                    );
                }
            }
        }
        y += *h as i64;
    }
    canvas
}

fn approx_line_size(line: &str, height: f32) -> (u32, u32) {
    let h = height.max(1.0);
    (
        (line.chars().count() as f32 * h * 0.5).ceil().max(1.0) as u32,
        h.ceil() as u32,
    )
}

/// Discards output. Keeps the last image for inspection.
pub struct NullDisplay {
    size: FrameShape,
    last: Option<RgbImage>,
    presented: u64,
}

impl NullDisplay {
    pub fn new(size: FrameShape) -> Self {
        Self {
            size,
            last: None,
            presented: 0,
        }
    }

    pub fn last(&self) -> Option<&RgbImage> {
        self.last.as_ref()
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }
}

impl DisplaySink for NullDisplay {
    fn name(&self) -> &'static str {
        "null"
    }

    fn size(&self) -> FrameShape {
        self.size
    }

    fn present(&mut self, image: &RgbImage) -> Result<()> {
        self.presented += 1;
        log::debug!("display[null]: {}x{} image", image.width(), image.height());
        self.last = Some(image.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letterbox_wide_frame_pads_top_and_bottom() {
        let frame = Frame::filled(FrameShape::new(100, 400), [255, 255, 255]);
        let out = letterbox(&frame, FrameShape::new(80, 160)).unwrap();
        assert_eq!(out.dimensions(), (160, 80));
        // 400x100 -> 160x40, centered vertically at y=20.
        assert_eq!(out.get_pixel(80, 10).0, [0, 0, 0]);
        assert_eq!(out.get_pixel(80, 40).0, [255, 255, 255]);
        assert_eq!(out.get_pixel(80, 70).0, [0, 0, 0]);
    }

    #[test]
    fn letterbox_tall_frame_pads_sides() {
        let frame = Frame::filled(FrameShape::new(160, 80), [9, 9, 9]);
        let out = letterbox(&frame, FrameShape::new(80, 160)).unwrap();
        // 80x160 -> 40x80 at x=60.
        assert_eq!(out.get_pixel(10, 40).0, [0, 0, 0]);
        assert_eq!(out.get_pixel(80, 40).0, [9, 9, 9]);
        assert_eq!(out.get_pixel(150, 40).0, [0, 0, 0]);
    }

    #[test]
    fn letterbox_rejects_empty_frame() {
        let frame = Frame::filled(FrameShape::new(0, 0), [0, 0, 0]);
        assert!(letterbox(&frame, FrameShape::new(80, 160)).is_err());
    }

    #[test]
    fn text_uses_background_and_draws_lines() {
        let style = TextStyle::default();
        let out = render_centered_text("IP: 10.0.0.7", FrameShape::new(80, 160), &style);
        assert_eq!(out.get_pixel(0, 0).0, style.background);
        assert_eq!(out.get_pixel(80, 40).0, style.foreground);
    }

    #[test]
    fn null_display_keeps_last_image() {
        let mut display = NullDisplay::new(FrameShape::new(8, 16));
        display
            .show(&DisplayContent::Text("hi".into()), &TextStyle::default())
            .unwrap();
        display.clear().unwrap();
        assert_eq!(display.presented(), 2);
        assert!(display.last().unwrap().pixels().all(|p| p.0 == [0, 0, 0]));
    }
}
