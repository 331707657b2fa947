use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::DisplaySink;
use crate::frame::FrameShape;

/// Linux fbdev panel (e.g. an ST7735 driven by fbtft), 16bpp RGB565.
pub struct FramebufferDisplay {
    device: PathBuf,
    file: File,
    size: FrameShape,
}

impl FramebufferDisplay {
    /// Open `device` (e.g. `/dev/fb1`). The panel size comes from sysfs unless
    /// `size` is given.
    pub fn open(device: &Path, size: Option<FrameShape>) -> Result<Self> {
        let size = match size {
            Some(size) => size,
            None => probe_size(device)?,
        };
        if size.is_empty() {
            return Err(anyhow!("framebuffer size {} has zero area", size));
        }
        check_depth(device)?;
        let file = OpenOptions::new()
            .write(true)
            .open(device)
            .with_context(|| format!("open framebuffer {}", device.display()))?;
        log::info!("display: framebuffer {} ({})", device.display(), size);
        Ok(Self {
            device: device.to_path_buf(),
            file,
            size,
        })
    }
}

fn sysfs_dir(device: &Path) -> Result<PathBuf> {
    let name = device
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("invalid framebuffer path {}", device.display()))?;
    Ok(Path::new("/sys/class/graphics").join(name))
}

fn probe_size(device: &Path) -> Result<FrameShape> {
    let path = sysfs_dir(device)?.join("virtual_size");
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("read {}", path.display()))?;
    parse_virtual_size(&text)
}

fn check_depth(device: &Path) -> Result<()> {
    let Ok(dir) = sysfs_dir(device) else {
        return Ok(());
    };
    // Devices without sysfs entries (plain files in tests) are taken as 16bpp.
    let Ok(text) = std::fs::read_to_string(dir.join("bits_per_pixel")) else {
        return Ok(());
    };
    match text.trim() {
        "16" => Ok(()),
        other => Err(anyhow!(
            "framebuffer {} is {}bpp; only 16bpp RGB565 is supported",
            device.display(),
            other
        )),
    }
}

pub(crate) fn parse_virtual_size(text: &str) -> Result<FrameShape> {
    let (w, h) = text
        .trim()
        .split_once(',')
        .ok_or_else(|| anyhow!("malformed virtual_size '{}'", text.trim()))?;
    let width: u32 = w.trim().parse().context("parse framebuffer width")?;
    let height: u32 = h.trim().parse().context("parse framebuffer height")?;
    Ok(FrameShape::new(height, width))
}

pub(crate) fn to_rgb565_le(image: &RgbImage) -> Vec<u8> {
    let mut out = Vec::with_capacity(image.as_raw().len() / 3 * 2);
    for px in image.pixels() {
        let [r, g, b] = px.0;
        let v: u16 = ((r as u16 & 0xF8) << 8) | ((g as u16 & 0xFC) << 3) | (b as u16 >> 3);
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

impl DisplaySink for FramebufferDisplay {
    fn name(&self) -> &'static str {
        "framebuffer"
    }

    fn size(&self) -> FrameShape {
        self.size
    }

    fn present(&mut self, image: &RgbImage) -> Result<()> {
        if image.width() != self.size.width || image.height() != self.size.height {
            return Err(anyhow!(
                "image {}x{} does not match panel {}",
                image.width(),
                image.height(),
                self.size
            ));
        }
        let bytes = to_rgb565_le(image);
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.write_all(&bytes))
            .and_then(|_| self.file.flush())
            .with_context(|| format!("write framebuffer {}", self.device.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn packs_rgb565_little_endian() {
        let mut image = RgbImage::new(3, 1);
        image.put_pixel(0, 0, Rgb([255, 0, 0]));
        image.put_pixel(1, 0, Rgb([0, 255, 0]));
        image.put_pixel(2, 0, Rgb([0, 0, 255]));
        assert_eq!(to_rgb565_le(&image), vec![0x00, 0xF8, 0xE0, 0x07, 0x1F, 0x00]);
    }

    #[test]
    fn parses_sysfs_virtual_size() {
        assert_eq!(parse_virtual_size("160,80\n").unwrap(), FrameShape::new(80, 160));
        assert!(parse_virtual_size("160x80").is_err());
    }

    #[test]
    fn writes_whole_panel_to_device_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fb9");
        std::fs::write(&path, b"").unwrap();
        let mut display = FramebufferDisplay::open(&path, Some(FrameShape::new(2, 4))).unwrap();
        display.clear().unwrap();
        display
            .present(&RgbImage::from_pixel(4, 2, Rgb([255, 255, 255])))
            .unwrap();
        let written = std::fs::read(&path).unwrap();
        assert_eq!(written.len(), 16);
        assert!(written.iter().all(|b| *b == 0xFF));
        assert!(display.present(&RgbImage::new(3, 3)).is_err());
    }
}
