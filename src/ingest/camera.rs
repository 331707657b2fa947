//! Dual-stream camera handle.
//!
//! One physical device feeds two independent streams: a small preview stream
//! (overlays, onboard display) and a full-size video stream (remote viewing).
//! A producer thread pulls frame pairs from the `CaptureDevice` and pushes them
//! into one bounded `FrameQueue` per enabled stream. Consumers only ever poll
//! those queues, so a slow or missing frame never blocks them.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::queue::FrameQueue;
use super::{CaptureSource, StreamKind};
use crate::frame::{Frame, FrameShape};

const DEVICE_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Configuration for the dual-stream camera.
#[derive(Clone, Debug)]
pub struct CaptureConfig {
    /// Device URL: `stub://...` for the synthetic device, `http(s)://...` for MJPEG.
    pub device: String,
    pub fps: u32,
    pub preview: FrameShape,
    pub video: FrameShape,
    pub enable_preview: bool,
    pub enable_video: bool,
    pub preview_queue: usize,
    pub video_queue: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: "stub://oak".to_string(),
            fps: 30,
            preview: FrameShape::new(160, 320),
            video: FrameShape::new(720, 1280),
            enable_preview: true,
            enable_video: true,
            preview_queue: 2,
            video_queue: 4,
        }
    }
}

impl CaptureConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.enable_preview && !self.enable_video {
            return Err(anyhow!(
                "at least one of the preview or video streams must be enabled"
            ));
        }
        if self.fps == 0 {
            return Err(anyhow!("capture fps must be >= 1"));
        }
        if self.enable_preview && self.preview.is_empty() {
            return Err(anyhow!("preview size {} has zero area", self.preview));
        }
        if self.enable_video && self.video.is_empty() {
            return Err(anyhow!("video size {} has zero area", self.video));
        }
        Ok(())
    }

    pub fn frame_interval(&self) -> Duration {
        frame_interval(self.fps)
    }

    pub fn is_enabled(&self, stream: StreamKind) -> bool {
        match stream {
            StreamKind::Preview => self.enable_preview,
            StreamKind::Video => self.enable_video,
        }
    }

    pub fn shape(&self, stream: StreamKind) -> FrameShape {
        match stream {
            StreamKind::Preview => self.preview,
            StreamKind::Video => self.video,
        }
    }
}

/// One capture cycle's output. Streams the device was not asked for are `None`.
#[derive(Debug, Default)]
pub struct CapturedFrames {
    pub preview: Option<Frame>,
    pub video: Option<Frame>,
}

/// A camera device able to produce preview and video frames together.
pub trait CaptureDevice: Send {
    fn name(&self) -> &'static str;

    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    /// Capture the next frame pair. May block for up to about one frame interval.
    fn capture(&mut self, config: &CaptureConfig) -> Result<CapturedFrames>;

    fn close(&mut self) {}
}

/// Frame counters per stream.
#[derive(Clone, Debug, Default)]
pub struct CaptureStats {
    pub preview_frames: u64,
    pub preview_dropped: u64,
    pub video_frames: u64,
    pub video_dropped: u64,
    pub device_errors: u64,
}

pub struct DualStreamCamera {
    config: CaptureConfig,
    preview: Option<Arc<FrameQueue>>,
    video: Option<Arc<FrameQueue>>,
    running: Arc<AtomicBool>,
    device_errors: Arc<AtomicU64>,
    producer: Mutex<Option<JoinHandle<()>>>,
}

impl DualStreamCamera {
    pub fn new(config: CaptureConfig) -> Result<Self> {
        config.validate()?;
        let preview = config
            .enable_preview
            .then(|| Arc::new(FrameQueue::new(config.preview_queue)));
        let video = config
            .enable_video
            .then(|| Arc::new(FrameQueue::new(config.video_queue)));
        Ok(Self {
            config,
            preview,
            video,
            running: Arc::new(AtomicBool::new(false)),
            device_errors: Arc::new(AtomicU64::new(0)),
            producer: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Start the producer thread for `device`.
    pub fn start(&self, mut device: Box<dyn CaptureDevice>) -> Result<()> {
        let mut producer = self
            .producer
            .lock()
            .map_err(|_| anyhow!("camera producer lock poisoned"))?;
        if producer.is_some() {
            return Err(anyhow!("camera already started"));
        }
        device.open()?;
        log::info!(
            "camera: {} started (preview={} video={} fps={})",
            device.name(),
            self.config.enable_preview,
            self.config.enable_video,
            self.config.fps
        );

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let errors = self.device_errors.clone();
        let config = self.config.clone();
        let preview = self.preview.clone();
        let video = self.video.clone();
        *producer = Some(std::thread::spawn(move || {
            run_producer(device, config, preview, video, running, errors)
        }));
        Ok(())
    }

    /// Stop the producer and release the device.
    pub fn close(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = match self.producer.lock() {
            Ok(mut producer) => producer.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("camera producer thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn queue(&self, stream: StreamKind) -> Result<&Arc<FrameQueue>> {
        let queue = match stream {
            StreamKind::Preview => self.preview.as_ref(),
            StreamKind::Video => self.video.as_ref(),
        };
        queue.ok_or_else(|| anyhow!("{} stream not enabled", stream.name()))
    }

    pub fn try_get_preview(&self) -> Result<Option<Frame>> {
        self.try_get(StreamKind::Preview)
    }

    pub fn try_get_video(&self) -> Result<Option<Frame>> {
        self.try_get(StreamKind::Video)
    }

    /// Wait up to `timeout` for a preview frame.
    pub fn get_preview(&self, timeout: Duration) -> Result<Option<Frame>> {
        self.get_within(StreamKind::Preview, timeout)
    }

    pub fn get_video(&self, timeout: Duration) -> Result<Option<Frame>> {
        self.get_within(StreamKind::Video, timeout)
    }

    pub fn stats(&self) -> CaptureStats {
        let (preview_frames, preview_dropped) = self
            .preview
            .as_ref()
            .map(|q| (q.pushed(), q.dropped()))
            .unwrap_or_default();
        let (video_frames, video_dropped) = self
            .video
            .as_ref()
            .map(|q| (q.pushed(), q.dropped()))
            .unwrap_or_default();
        CaptureStats {
            preview_frames,
            preview_dropped,
            video_frames,
            video_dropped,
            device_errors: self.device_errors.load(Ordering::Relaxed),
        }
    }
}

impl CaptureSource for DualStreamCamera {
    fn try_get(&self, stream: StreamKind) -> Result<Option<Frame>> {
        Ok(self.queue(stream)?.try_pop())
    }
}

impl Drop for DualStreamCamera {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_producer(
    mut device: Box<dyn CaptureDevice>,
    config: CaptureConfig,
    preview: Option<Arc<FrameQueue>>,
    video: Option<Arc<FrameQueue>>,
    running: Arc<AtomicBool>,
    errors: Arc<AtomicU64>,
) {
    let interval = config.frame_interval();
    let mut needs_reopen = false;
    while running.load(Ordering::SeqCst) {
        let started = Instant::now();
        if needs_reopen {
            match device.open() {
                Ok(()) => {
                    log::info!("camera: {} reopened", device.name());
                    needs_reopen = false;
                }
                Err(err) => {
                    log::warn!("camera: {} reopen failed: {:#}", device.name(), err);
                    std::thread::sleep(DEVICE_RETRY_DELAY);
                    continue;
                }
            }
        }

        match device.capture(&config) {
            Ok(frames) => {
                if let (Some(queue), Some(frame)) = (&preview, frames.preview) {
                    queue.push(frame);
                }
                if let (Some(queue), Some(frame)) = (&video, frames.video) {
                    queue.push(frame);
                }
            }
            Err(err) => {
                errors.fetch_add(1, Ordering::Relaxed);
                log::warn!("camera: {} capture failed: {:#}", device.name(), err);
                device.close();
                needs_reopen = true;
                std::thread::sleep(DEVICE_RETRY_DELAY);
                continue;
            }
        }

        if let Some(rest) = interval.checked_sub(started.elapsed()) {
            std::thread::sleep(rest);
        }
    }
    device.close();
    log::info!("camera: {} stopped", device.name());
}

pub(crate) fn frame_interval(fps: u32) -> Duration {
    if fps == 0 {
        Duration::from_millis(0)
    } else {
        Duration::from_millis((1000 / fps).max(1) as u64)
    }
}
