//! Frame acquisition.
//!
//! A `DualStreamCamera` owns one capture device and exposes two independent,
//! non-blocking streams (preview and video) through the `CaptureSource`
//! trait. Acquisition workers poll one stream each and hand frames to a
//! `FrameComposer`.
//!
//! Devices:
//! - `stub://...` renders a synthetic scene (testing, bench runs)
//! - `http(s)://...` reads an MJPEG or single-JPEG HTTP endpoint

use anyhow::{anyhow, Result};
use std::time::{Duration, Instant};

use crate::frame::Frame;

pub mod camera;
pub mod mjpeg;
mod queue;
pub mod synthetic;
pub mod worker;

pub use camera::{CaptureConfig, CaptureDevice, CaptureStats, CapturedFrames, DualStreamCamera};
pub use mjpeg::MjpegDevice;
pub use queue::FrameQueue;
pub use synthetic::{SyntheticDevice, SYNTHETIC_TARGET};
pub use worker::spawn_acquisition;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// One of the camera's two output streams.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Preview,
    Video,
}

impl StreamKind {
    pub fn name(&self) -> &'static str {
        match self {
            StreamKind::Preview => "preview",
            StreamKind::Video => "video",
        }
    }
}

/// Non-blocking access to captured frames.
pub trait CaptureSource: Send + Sync {
    /// Next queued frame of `stream`, or `None` if nothing is queued.
    ///
    /// Errors only when the stream cannot deliver at all (e.g. disabled).
    fn try_get(&self, stream: StreamKind) -> Result<Option<Frame>>;

    /// Poll `stream` until a frame arrives or `timeout` elapses.
    fn get_within(&self, stream: StreamKind, timeout: Duration) -> Result<Option<Frame>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(frame) = self.try_get(stream)? {
                return Ok(Some(frame));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            std::thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }
}

/// Open the capture device named by `url`.
pub fn open_device(url: &str) -> Result<Box<dyn CaptureDevice>> {
    if url.starts_with("stub://") {
        return Ok(Box::new(SyntheticDevice::new()));
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        return Ok(Box::new(MjpegDevice::new(url)?));
    }
    Err(anyhow!(
        "unsupported camera device '{}'; expected stub:// or http(s)://",
        url
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameShape;
    use std::sync::Mutex;

    struct Scripted(Mutex<Vec<Option<Frame>>>);

    impl CaptureSource for Scripted {
        fn try_get(&self, _stream: StreamKind) -> Result<Option<Frame>> {
            let mut script = self.0.lock().unwrap();
            Ok(if script.is_empty() { None } else { script.remove(0) })
        }
    }

    #[test]
    fn get_within_polls_until_a_frame_arrives() {
        let frame = Frame::filled(FrameShape::new(2, 2), [1, 2, 3]);
        let source = Scripted(Mutex::new(vec![None, None, Some(frame)]));
        let got = source
            .get_within(StreamKind::Preview, Duration::from_secs(1))
            .unwrap();
        assert!(got.is_some());
    }

    #[test]
    fn get_within_gives_up_after_timeout() {
        let source = Scripted(Mutex::new(Vec::new()));
        let started = Instant::now();
        let got = source
            .get_within(StreamKind::Video, Duration::from_millis(30))
            .unwrap();
        assert!(got.is_none());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn open_device_by_scheme() {
        assert_eq!(open_device("stub://oak").unwrap().name(), "synthetic");
        assert_eq!(open_device("http://10.0.0.2/stream").unwrap().name(), "mjpeg");
        assert!(open_device("/dev/video0").is_err());
    }
}
