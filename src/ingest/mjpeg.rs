//! HTTP MJPEG camera device.
//!
//! Reads a `multipart/x-mixed-replace` JPEG stream (or repeated single-JPEG
//! snapshots when the endpoint is not multipart), decodes each frame in memory
//! and scales it to the configured preview and video sizes.
//!
//! Multipart parts are delimited by the boundary, never by JPEG markers: a
//! part's `Content-Length` is used when present, otherwise the body runs up to
//! the next boundary line.

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::RgbImage;
use std::io::Read;
use std::time::{Duration, Instant};
use url::Url;

use super::camera::{frame_interval, CaptureConfig, CaptureDevice, CapturedFrames};
use crate::frame::{Frame, FrameShape};

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const MAX_HEADER_LINE: usize = 1024;
const READ_CHUNK: usize = 16 * 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct MjpegDevice {
    url: String,
    agent: ureq::Agent,
    source: Option<JpegSource>,
    last_frame_at: Option<Instant>,
    frame_count: u64,
}

enum JpegSource {
    Multipart(MultipartReader),
    Snapshot,
}

impl MjpegDevice {
    pub fn new(url: &str) -> Result<Self> {
        let parsed = Url::parse(url).context("parse camera url")?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(anyhow!(
                "unsupported camera scheme '{}'; expected http(s)",
                parsed.scheme()
            ));
        }
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(CONNECT_TIMEOUT)
            .build();
        Ok(Self {
            url: url.to_string(),
            agent,
            source: None,
            last_frame_at: None,
            frame_count: 0,
        })
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn next_jpeg(&mut self) -> Result<Vec<u8>> {
        match self.source.as_mut() {
            Some(JpegSource::Multipart(reader)) => reader.next_part(),
            Some(JpegSource::Snapshot) => fetch_snapshot(&self.agent, &self.url),
            None => Err(anyhow!("mjpeg camera not connected")),
        }
    }
}

impl CaptureDevice for MjpegDevice {
    fn name(&self) -> &'static str {
        "mjpeg"
    }

    fn open(&mut self) -> Result<()> {
        let response = self
            .agent
            .get(&self.url)
            .call()
            .with_context(|| format!("connect to camera stream {}", self.url))?;
        let content_type = response.header("Content-Type").unwrap_or("").to_string();
        self.source = if content_type.to_ascii_lowercase().starts_with("multipart/") {
            let boundary = multipart_boundary(&content_type);
            if boundary.is_none() {
                log::warn!(
                    "camera: no multipart boundary in '{}'; learning it from the stream",
                    content_type
                );
            }
            Some(JpegSource::Multipart(MultipartReader::new(
                response.into_reader(),
                boundary.as_deref(),
            )))
        } else {
            Some(JpegSource::Snapshot)
        };
        log::info!("camera: connected to {} ({})", self.url, content_type);
        Ok(())
    }

    fn capture(&mut self, config: &CaptureConfig) -> Result<CapturedFrames> {
        let min_interval = frame_interval(config.fps);
        let jpeg = loop {
            let jpeg = self.next_jpeg()?;
            let due = self
                .last_frame_at
                .map_or(true, |last| last.elapsed() >= min_interval);
            if due {
                break jpeg;
            }
        };
        let now = Instant::now();
        self.last_frame_at = Some(now);
        self.frame_count += 1;
        frame_pair(&jpeg, config, now)
    }

    fn close(&mut self) {
        self.source = None;
    }
}

/// Decode once and scale the result to each enabled stream's shape.
fn frame_pair(jpeg: &[u8], config: &CaptureConfig, at: Instant) -> Result<CapturedFrames> {
    let image = decode_jpeg(jpeg)?;
    let scaled = |enabled: bool, shape: FrameShape| {
        enabled.then(|| Frame::with_timestamp(scale_to(&image, shape), at))
    };
    Ok(CapturedFrames {
        preview: scaled(config.enable_preview, config.preview),
        video: scaled(config.enable_video, config.video),
    })
}

fn scale_to(image: &RgbImage, shape: FrameShape) -> RgbImage {
    if image.dimensions() == (shape.width, shape.height) {
        return image.clone();
    }
    image::imageops::resize(image, shape.width, shape.height, FilterType::Triangle)
}

fn decode_jpeg(bytes: &[u8]) -> Result<RgbImage> {
    let image = image::load_from_memory_with_format(bytes, image::ImageFormat::Jpeg)
        .context("decode jpeg")?;
    Ok(image.into_rgb8())
}

/// `boundary` parameter of a multipart content type, without quotes.
fn multipart_boundary(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("boundary") {
            return None;
        }
        let value = value.trim().trim_matches('"');
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// Splits a multipart body into parts.
struct MultipartReader {
    reader: Box<dyn Read + Send + Sync>,
    /// Delimiter line including the leading `--`.
    delimiter: Option<Vec<u8>>,
    pending: Vec<u8>,
}

impl MultipartReader {
    fn new(reader: Box<dyn Read + Send + Sync>, boundary: Option<&str>) -> Self {
        Self {
            reader,
            delimiter: boundary.map(|b| format!("--{}", b.trim_start_matches("--")).into_bytes()),
            pending: Vec::with_capacity(64 * 1024),
        }
    }

    fn next_part(&mut self) -> Result<Vec<u8>> {
        let content_length = self.read_part_headers()?;
        let body = match content_length {
            Some(len) => self.take_exact(len)?,
            None => self.take_until_delimiter()?,
        };
        if !body.starts_with(&[0xFF, 0xD8]) {
            return Err(anyhow!("multipart part is not a jpeg ({} bytes)", body.len()));
        }
        Ok(body)
    }

    /// Skip to the next delimiter line and consume the part headers.
    /// Returns the part's `Content-Length`, if it sent one.
    fn read_part_headers(&mut self) -> Result<Option<usize>> {
        loop {
            let line = self.read_line()?;
            if let Some(delimiter) = &self.delimiter {
                if line.starts_with(delimiter) {
                    if line[delimiter.len()..].starts_with(b"--") {
                        return Err(anyhow!("mjpeg stream closed by final boundary"));
                    }
                    break;
                }
            } else if line.starts_with(b"--") && line.len() > 2 {
                self.delimiter = Some(line);
                break;
            }
        }

        let mut content_length = None;
        loop {
            let line = self.read_line()?;
            if line.is_empty() {
                return Ok(content_length);
            }
            let line = String::from_utf8_lossy(&line);
            if let Some((name, value)) = line.split_once(':') {
                if name.trim().eq_ignore_ascii_case("content-length") {
                    let len = value
                        .trim()
                        .parse::<usize>()
                        .with_context(|| format!("bad part Content-Length '{}'", value.trim()))?;
                    content_length = Some(len);
                }
            }
        }
    }

    /// One line without its terminator.
    fn read_line(&mut self) -> Result<Vec<u8>> {
        let mut scanned = 0;
        loop {
            if let Some(pos) = self.pending[scanned..].iter().position(|&b| b == b'\n') {
                let end = scanned + pos;
                let mut line: Vec<u8> = self.pending.drain(..=end).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(line);
            }
            if self.pending.len() > MAX_HEADER_LINE {
                // preamble or garbage: drop it and keep looking for a line
                self.pending.clear();
            }
            scanned = self.pending.len();
            self.fill()?;
        }
    }

    fn take_exact(&mut self, len: usize) -> Result<Vec<u8>> {
        if len > MAX_JPEG_BYTES {
            return Err(anyhow!("multipart part of {} bytes exceeds limit", len));
        }
        while self.pending.len() < len {
            self.fill()?;
        }
        Ok(self.pending.drain(..len).collect())
    }

    /// Body bytes up to the CRLF that precedes the next delimiter line. The
    /// delimiter itself stays pending for the next part.
    fn take_until_delimiter(&mut self) -> Result<Vec<u8>> {
        let delimiter = self
            .delimiter
            .clone()
            .ok_or_else(|| anyhow!("multipart boundary unknown"))?;
        let mut marker = b"\r\n".to_vec();
        marker.extend_from_slice(&delimiter);

        let mut scanned = 0;
        loop {
            if let Some(pos) = self.pending[scanned..]
                .windows(marker.len())
                .position(|w| w == marker.as_slice())
            {
                let end = scanned + pos;
                let body = self.pending[..end].to_vec();
                self.pending.drain(..end + 2);
                return Ok(body);
            }
            if self.pending.len() > MAX_JPEG_BYTES {
                self.pending.clear();
                return Err(anyhow!("no multipart boundary within {} bytes", MAX_JPEG_BYTES));
            }
            scanned = self.pending.len().saturating_sub(marker.len() - 1);
            self.fill()?;
        }
    }

    fn fill(&mut self) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK];
        let read = self.reader.read(&mut chunk).context("read mjpeg stream")?;
        if read == 0 {
            return Err(anyhow!("mjpeg stream ended"));
        }
        self.pending.extend_from_slice(&chunk[..read]);
        Ok(())
    }
}

fn fetch_snapshot(agent: &ureq::Agent, url: &str) -> Result<Vec<u8>> {
    let response = agent
        .get(url)
        .call()
        .with_context(|| format!("fetch jpeg snapshot from {}", url))?;
    let declared = response
        .header("Content-Length")
        .and_then(|len| len.parse::<usize>().ok());
    if declared.map_or(false, |len| len > MAX_JPEG_BYTES) {
        return Err(anyhow!("jpeg snapshot of {:?} bytes exceeds limit", declared));
    }
    let mut bytes = Vec::with_capacity(declared.unwrap_or(64 * 1024));
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64)
        .read_to_end(&mut bytes)
        .context("read jpeg snapshot")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg snapshot"));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::EncodeFormat;
    use std::io::Cursor;

    fn jpeg(color: [u8; 3]) -> Vec<u8> {
        Frame::filled(FrameShape::new(8, 8), color)
            .encode(EncodeFormat::Jpeg, 90)
            .unwrap()
    }

    /// A JPEG carrying an embedded thumbnail: its own SOI..EOI pair sits in
    /// an APP1 segment ahead of the main image data.
    fn jpeg_with_thumbnail(color: [u8; 3]) -> Vec<u8> {
        let main = jpeg(color);
        let thumb = jpeg([0, 0, 0]);
        let mut app1 = b"Exif\0\0".to_vec();
        app1.extend_from_slice(&thumb);
        let len = (app1.len() + 2) as u16;

        let mut out = main[..2].to_vec();
        out.extend_from_slice(&[0xFF, 0xE1]);
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&app1);
        out.extend_from_slice(&main[2..]);
        out
    }

    fn part(body: &mut Vec<u8>, jpeg: &[u8], with_length: bool) {
        body.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n");
        if with_length {
            body.extend_from_slice(format!("Content-Length: {}\r\n", jpeg.len()).as_bytes());
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(jpeg);
        body.extend_from_slice(b"\r\n");
    }

    #[test]
    fn rejects_non_http_urls() {
        assert!(MjpegDevice::new("rtsp://camera/stream").is_err());
        assert!(MjpegDevice::new("not a url").is_err());
        assert!(MjpegDevice::new("http://127.0.0.1:81/stream").is_ok());
    }

    #[test]
    fn boundary_parsed_from_content_type() {
        assert_eq!(
            multipart_boundary("multipart/x-mixed-replace; boundary=frame").as_deref(),
            Some("frame")
        );
        assert_eq!(
            multipart_boundary("multipart/x-mixed-replace;Boundary=\"123456789000\"").as_deref(),
            Some("123456789000")
        );
        assert_eq!(multipart_boundary("multipart/x-mixed-replace"), None);
    }

    #[test]
    fn parts_split_by_length_or_boundary() {
        let red = jpeg([200, 10, 10]);
        let blue = jpeg([10, 10, 200]);
        let mut body = b"preamble\r\n".to_vec();
        part(&mut body, &red, true);
        part(&mut body, &blue, false);
        body.extend_from_slice(b"--frame--\r\n");

        let mut reader = MultipartReader::new(Box::new(Cursor::new(body)), Some("frame"));
        assert_eq!(reader.next_part().unwrap(), red);
        assert_eq!(reader.next_part().unwrap(), blue);
        assert!(reader.next_part().is_err());
    }

    #[test]
    fn thumbnail_end_marker_does_not_cut_frame() {
        let full = jpeg_with_thumbnail([30, 160, 30]);
        for with_length in [true, false] {
            let mut body = Vec::new();
            part(&mut body, &full, with_length);
            part(&mut body, &full, with_length);

            // boundary learned from the first delimiter line
            let mut reader = MultipartReader::new(Box::new(Cursor::new(body)), None);
            let first = reader.next_part().unwrap();
            assert_eq!(first, full);
            let image = decode_jpeg(&first).unwrap();
            assert_eq!(image.dimensions(), (8, 8));
            assert!(image.get_pixel(4, 4).0[1] > 100);
        }
    }

    #[test]
    fn frame_pair_scales_each_enabled_stream() {
        let config = CaptureConfig {
            preview: FrameShape::new(4, 6),
            video: FrameShape::new(8, 8),
            enable_video: false,
            ..CaptureConfig::default()
        };
        let frames = frame_pair(&jpeg([1, 2, 3]), &config, Instant::now()).unwrap();
        assert_eq!(frames.preview.unwrap().shape(), FrameShape::new(4, 6));
        assert!(frames.video.is_none());
        assert!(frame_pair(b"not a jpeg", &config, Instant::now()).is_err());
    }
}
