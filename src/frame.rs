//! Frame containers and the latest-value frame store.
//!
//! - `Frame`: an owned RGB pixel buffer plus its acquisition instant.
//! - `FrameStore`: thread-safe holder of the latest raw and composed frames.
//!
//! The store owns its frames exclusively. Readers always receive a copy, so a
//! reader can never observe a buffer that a writer is still filling, and a
//! publish replaces the whole slot under the lock.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{Rgb, RgbImage};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Pixel dimensions of a frame, in (height, width) order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct FrameShape {
    pub height: u32,
    pub width: u32,
}

impl FrameShape {
    pub const fn new(height: u32, width: u32) -> Self {
        Self { height, width }
    }

    /// True when either dimension is zero.
    pub fn is_empty(&self) -> bool {
        self.height == 0 || self.width == 0
    }

    pub fn area(&self) -> u64 {
        self.height as u64 * self.width as u64
    }
}

impl std::fmt::Display for FrameShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A single captured (or composed) 3-channel frame.
#[derive(Clone, Debug)]
pub struct Frame {
    image: RgbImage,
    captured_at: Instant,
}

impl Frame {
    /// Wrap an image captured now.
    pub fn new(image: RgbImage) -> Self {
        Self::with_timestamp(image, Instant::now())
    }

    pub fn with_timestamp(image: RgbImage, captured_at: Instant) -> Self {
        Self { image, captured_at }
    }

    /// Build a frame from packed RGB bytes.
    pub fn from_raw(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if pixels.len() != expected {
            return Err(anyhow!(
                "frame buffer is {} bytes, expected {} for {}x{}x3",
                pixels.len(),
                expected,
                width,
                height
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("invalid frame buffer for {}x{}", width, height))?;
        Ok(Self::new(image))
    }

    /// Solid-color frame, mostly useful for placeholders and tests.
    pub fn filled(shape: FrameShape, color: [u8; 3]) -> Self {
        Self::new(RgbImage::from_pixel(shape.width, shape.height, Rgb(color)))
    }

    pub fn shape(&self) -> FrameShape {
        FrameShape::new(self.image.height(), self.image.width())
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }

    /// Same acquisition instant, different pixels. Used by the overlay path so
    /// a composed frame keeps the timestamp of the capture it was drawn on.
    pub fn with_image(&self, image: RgbImage) -> Self {
        Self {
            image,
            captured_at: self.captured_at,
        }
    }

    pub fn same_pixels(&self, other: &Frame) -> bool {
        self.image.dimensions() == other.image.dimensions()
            && self.image.as_raw() == other.image.as_raw()
    }

    /// Encode the frame in the requested format. JPEG quality is clamped to 1..=100.
    pub fn encode(&self, format: EncodeFormat, quality: u8) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        match format {
            EncodeFormat::Jpeg => {
                let encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
                self.image
                    .write_with_encoder(encoder)
                    .context("encode jpeg")?;
            }
            EncodeFormat::Png => {
                let encoder = PngEncoder::new(&mut out);
                self.image.write_with_encoder(encoder).context("encode png")?;
            }
        }
        Ok(out)
    }
}

/// Output formats for `FrameStore::get_composed_encoded`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncodeFormat {
    Jpeg,
    Png,
}

impl EncodeFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            EncodeFormat::Jpeg => "image/jpeg",
            EncodeFormat::Png => "image/png",
        }
    }
}

// ----------------------------------------------------------------------------
// FrameStore
// ----------------------------------------------------------------------------

struct StoredFrame {
    frame: Frame,
    stored_at: Instant,
}

#[derive(Default)]
struct FrameSlots {
    raw: Option<StoredFrame>,
    composed: Option<StoredFrame>,
}

/// Latest-value store for the raw and composed frames of one stream.
///
/// Each slot is replaced whole under the lock; the lock is never held across
/// encoding or any other I/O.
#[derive(Default)]
pub struct FrameStore {
    slots: Mutex<FrameSlots>,
}

impl FrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave a half-written slot because
    // slots are only ever assigned whole, so a poisoned lock is still usable.
    fn slots(&self) -> MutexGuard<'_, FrameSlots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn update_raw(&self, frame: Frame) {
        let stored = StoredFrame {
            frame,
            stored_at: Instant::now(),
        };
        self.slots().raw = Some(stored);
    }

    pub fn update_composed(&self, frame: Frame) {
        let stored = StoredFrame {
            frame,
            stored_at: Instant::now(),
        };
        self.slots().composed = Some(stored);
    }

    /// Copy of the latest raw frame.
    pub fn get_raw(&self) -> Option<Frame> {
        self.slots().raw.as_ref().map(|s| s.frame.clone())
    }

    /// Copy of the latest composed frame.
    pub fn get_composed(&self) -> Option<Frame> {
        self.slots().composed.as_ref().map(|s| s.frame.clone())
    }

    pub fn raw_updated_at(&self) -> Option<Instant> {
        self.slots().raw.as_ref().map(|s| s.stored_at)
    }

    pub fn composed_updated_at(&self) -> Option<Instant> {
        self.slots().composed.as_ref().map(|s| s.stored_at)
    }

    /// Encode the current composed frame. `Ok(None)` when nothing has been
    /// published yet.
    pub fn get_composed_encoded(
        &self,
        format: EncodeFormat,
        quality: u8,
    ) -> Result<Option<Vec<u8>>> {
        let Some(frame) = self.get_composed() else {
            return Ok(None);
        };
        frame.encode(format, quality).map(Some)
    }
}
