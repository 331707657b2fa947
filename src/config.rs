use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::{LiveApiConfig, DEFAULT_LIVE_API_ADDR};
use crate::control::tick::{DEFAULT_CAPTURE_WAIT, DEFAULT_TEMP_FACTOR};
use crate::control::{HoldConfig, PageSequence, DEFAULT_MAX_SENSOR_FAILURES};
use crate::detect::DetectorKind;
use crate::frame::FrameShape;
use crate::ingest::{CaptureConfig, StreamKind, SYNTHETIC_TARGET};
use crate::sensors::sysfs::{DEFAULT_IIO_ROOT, DEFAULT_THERMAL_ZONE};
use crate::transport::telemetry::{DEFAULT_BACKEND_URL, DEFAULT_TIMEOUT};
use crate::transport::TelemetryConfig;

const DEFAULT_CAMERA_DEVICE: &str = "stub://oak";
const DEFAULT_FPS: u32 = 30;
const DEFAULT_PREVIEW_WIDTH: u32 = 320;
const DEFAULT_PREVIEW_HEIGHT: u32 = 160;
const DEFAULT_VIDEO_WIDTH: u32 = 1280;
const DEFAULT_VIDEO_HEIGHT: u32 = 720;
const DEFAULT_DETECTOR_BACKEND: &str = "color";
const DEFAULT_DETECTOR_LABEL: &str = "target";
const DEFAULT_DETECTOR_TOLERANCE: u8 = 40;
const DEFAULT_DETECTOR_STEP: u32 = 2;
const DEFAULT_CACHE_MAX_AGE_MS: u64 = 1000;
const DEFAULT_OVERLAY_THICKNESS: u32 = 2;
const DEFAULT_OVERLAY_TEXT_HEIGHT: f32 = 12.0;
const DEFAULT_DISPLAY_DEVICE: &str = "/dev/fb1";
const DEFAULT_DISPLAY_TEXT_HEIGHT: f32 = 18.0;
const DEFAULT_PROX_THRESHOLD: u32 = 1500;
const DEFAULT_UNLOCK_SECS: f64 = 2.0;
const DEFAULT_STEP_SECS: f64 = 0.5;
const DEFAULT_POLL_MS: u64 = 50;
const DEFAULT_BACKEND_USER: &str = "admin";
const DEFAULT_BACKEND_PASS: &str = "admin";
const DEFAULT_JPEG_QUALITY: u8 = 80;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ControllerConfigFile {
    camera: Option<CameraConfigFile>,
    detector: Option<DetectorConfigFile>,
    overlay: Option<OverlayConfigFile>,
    display: Option<DisplayConfigFile>,
    sensors: Option<SensorsConfigFile>,
    hold: Option<HoldConfigFile>,
    pages: Option<Vec<String>>,
    telemetry: Option<TelemetryConfigFile>,
    live_api: Option<LiveApiConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CameraConfigFile {
    device: Option<String>,
    fps: Option<u32>,
    preview_width: Option<u32>,
    preview_height: Option<u32>,
    video_width: Option<u32>,
    video_height: Option<u32>,
    enable_preview: Option<bool>,
    enable_video: Option<bool>,
    drive: Option<String>,
    capture_wait_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectorConfigFile {
    backend: Option<String>,
    stream: Option<String>,
    target_color: Option<[u8; 3]>,
    label: Option<String>,
    tolerance: Option<u8>,
    sample_step: Option<u32>,
    score_threshold: Option<f32>,
    cache_max_age_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct OverlayConfigFile {
    font_path: Option<PathBuf>,
    thickness: Option<u32>,
    text_height: Option<f32>,
    color: Option<[u8; 3]>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DisplayConfigFile {
    backend: Option<String>,
    device: Option<PathBuf>,
    width: Option<u32>,
    height: Option<u32>,
    font_path: Option<PathBuf>,
    text_height: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SensorsConfigFile {
    backend: Option<String>,
    iio_root: Option<PathBuf>,
    thermal_zone: Option<PathBuf>,
    temp_factor: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct HoldConfigFile {
    proximity_threshold: Option<u32>,
    unlock_secs: Option<f64>,
    step_secs: Option<f64>,
    poll_ms: Option<u64>,
    max_sensor_failures: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TelemetryConfigFile {
    enabled: Option<bool>,
    backend_url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct LiveApiConfigFile {
    enabled: Option<bool>,
    addr: Option<String>,
    jpeg_quality: Option<u8>,
}

/// Who pulls frames off the camera's preview stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureDrive {
    /// One acquisition thread per enabled stream.
    Threads,
    /// The controller tick pulls preview frames; video still has its own thread.
    Tick,
}

impl CaptureDrive {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "threads" => Ok(Self::Threads),
            "tick" => Ok(Self::Tick),
            other => Err(anyhow!(
                "unknown camera drive '{}'; expected threads or tick",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    /// Stream whose composer runs the detector and publishes to the cache.
    pub stream: StreamKind,
    pub target_color: [u8; 3],
    pub label: String,
    pub tolerance: u8,
    pub sample_step: u32,
    pub score_threshold: f32,
    pub cache_max_age: Duration,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_DETECTOR_BACKEND.to_string(),
            stream: StreamKind::Preview,
            target_color: SYNTHETIC_TARGET,
            label: DEFAULT_DETECTOR_LABEL.to_string(),
            tolerance: DEFAULT_DETECTOR_TOLERANCE,
            sample_step: DEFAULT_DETECTOR_STEP,
            score_threshold: 0.0,
            cache_max_age: Duration::from_millis(DEFAULT_CACHE_MAX_AGE_MS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OverlaySettings {
    pub font_path: Option<PathBuf>,
    pub thickness: u32,
    pub text_height: f32,
    pub color: [u8; 3],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayBackend {
    Framebuffer,
    Null,
}

#[derive(Debug, Clone)]
pub struct DisplaySettings {
    pub backend: DisplayBackend,
    pub device: PathBuf,
    /// Panel size; probed from sysfs when unset.
    pub size: Option<FrameShape>,
    pub font_path: Option<PathBuf>,
    pub text_height: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorBackend {
    Sysfs,
    Synthetic,
}

#[derive(Debug, Clone)]
pub struct SensorSettings {
    pub backend: SensorBackend,
    pub iio_root: PathBuf,
    pub thermal_zone: PathBuf,
    pub temp_factor: f64,
}

#[derive(Debug, Clone)]
pub struct HoldSettings {
    pub proximity_threshold: u32,
    pub unlock: Duration,
    pub step: Duration,
    pub poll: Duration,
    pub max_sensor_failures: u32,
}

impl HoldSettings {
    pub fn unlock_config(&self) -> HoldConfig {
        self.hold_config(self.unlock)
    }

    pub fn step_config(&self) -> HoldConfig {
        self.hold_config(self.step)
    }

    fn hold_config(&self, hold: Duration) -> HoldConfig {
        HoldConfig {
            threshold: self.proximity_threshold,
            hold,
            poll: self.poll,
            max_sensor_failures: self.max_sensor_failures,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub capture: CaptureConfig,
    pub capture_drive: CaptureDrive,
    pub capture_wait: Duration,
    pub detector: DetectorSettings,
    pub overlay: OverlaySettings,
    pub display: DisplaySettings,
    pub sensors: SensorSettings,
    pub hold: HoldSettings,
    pub pages: PageSequence,
    pub telemetry: Option<TelemetryConfig>,
    pub live_api: Option<LiveApiConfig>,
}

impl ControllerConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PAYLOAD_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Load from an explicit file (or defaults), then apply env overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ControllerConfigFile) -> Result<Self> {
        let camera = file.camera.unwrap_or_default();
        let capture = CaptureConfig {
            device: camera
                .device
                .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
            fps: camera.fps.unwrap_or(DEFAULT_FPS),
            preview: FrameShape::new(
                camera.preview_height.unwrap_or(DEFAULT_PREVIEW_HEIGHT),
                camera.preview_width.unwrap_or(DEFAULT_PREVIEW_WIDTH),
            ),
            video: FrameShape::new(
                camera.video_height.unwrap_or(DEFAULT_VIDEO_HEIGHT),
                camera.video_width.unwrap_or(DEFAULT_VIDEO_WIDTH),
            ),
            enable_preview: camera.enable_preview.unwrap_or(true),
            enable_video: camera.enable_video.unwrap_or(true),
            ..CaptureConfig::default()
        };
        let capture_drive = match camera.drive.as_deref() {
            Some(drive) => CaptureDrive::parse(drive)?,
            None => CaptureDrive::Threads,
        };
        let capture_wait = camera
            .capture_wait_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_CAPTURE_WAIT);

        let detector_file = file.detector.unwrap_or_default();
        let defaults = DetectorSettings::default();
        let detector = DetectorSettings {
            backend: detector_file.backend.unwrap_or(defaults.backend),
            stream: match detector_file.stream.as_deref() {
                Some(stream) => parse_stream(stream)?,
                None => defaults.stream,
            },
            target_color: detector_file.target_color.unwrap_or(defaults.target_color),
            label: detector_file.label.unwrap_or(defaults.label),
            tolerance: detector_file.tolerance.unwrap_or(defaults.tolerance),
            sample_step: detector_file.sample_step.unwrap_or(defaults.sample_step),
            score_threshold: detector_file
                .score_threshold
                .unwrap_or(defaults.score_threshold),
            cache_max_age: detector_file
                .cache_max_age_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.cache_max_age),
        };

        let overlay_file = file.overlay.unwrap_or_default();
        let overlay = OverlaySettings {
            font_path: overlay_file.font_path,
            thickness: overlay_file.thickness.unwrap_or(DEFAULT_OVERLAY_THICKNESS),
            text_height: overlay_file
                .text_height
                .unwrap_or(DEFAULT_OVERLAY_TEXT_HEIGHT),
            color: overlay_file.color.unwrap_or([0, 255, 0]),
        };

        let display_file = file.display.unwrap_or_default();
        let display = DisplaySettings {
            backend: match display_file.backend.as_deref() {
                None | Some("framebuffer") | Some("fb") => DisplayBackend::Framebuffer,
                Some("null") | Some("none") => DisplayBackend::Null,
                Some(other) => {
                    return Err(anyhow!(
                        "unknown display backend '{}'; expected framebuffer or null",
                        other
                    ))
                }
            },
            device: display_file
                .device
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DISPLAY_DEVICE)),
            size: match (display_file.width, display_file.height) {
                (Some(width), Some(height)) => Some(FrameShape::new(height, width)),
                (None, None) => None,
                _ => return Err(anyhow!("display width and height must be set together")),
            },
            font_path: display_file.font_path,
            text_height: display_file
                .text_height
                .unwrap_or(DEFAULT_DISPLAY_TEXT_HEIGHT),
        };

        let sensors_file = file.sensors.unwrap_or_default();
        let sensors = SensorSettings {
            backend: match sensors_file.backend.as_deref() {
                None | Some("sysfs") => SensorBackend::Sysfs,
                Some("synthetic") => SensorBackend::Synthetic,
                Some(other) => {
                    return Err(anyhow!(
                        "unknown sensor backend '{}'; expected sysfs or synthetic",
                        other
                    ))
                }
            },
            iio_root: sensors_file
                .iio_root
                .unwrap_or_else(|| PathBuf::from(DEFAULT_IIO_ROOT)),
            thermal_zone: sensors_file
                .thermal_zone
                .unwrap_or_else(|| PathBuf::from(DEFAULT_THERMAL_ZONE)),
            temp_factor: sensors_file.temp_factor.unwrap_or(DEFAULT_TEMP_FACTOR),
        };

        let hold_file = file.hold.unwrap_or_default();
        let hold = HoldSettings {
            proximity_threshold: hold_file
                .proximity_threshold
                .unwrap_or(DEFAULT_PROX_THRESHOLD),
            unlock: secs_to_duration(
                "hold.unlock_secs",
                hold_file.unlock_secs.unwrap_or(DEFAULT_UNLOCK_SECS),
            )?,
            step: secs_to_duration(
                "hold.step_secs",
                hold_file.step_secs.unwrap_or(DEFAULT_STEP_SECS),
            )?,
            poll: Duration::from_millis(hold_file.poll_ms.unwrap_or(DEFAULT_POLL_MS)),
            max_sensor_failures: hold_file
                .max_sensor_failures
                .unwrap_or(DEFAULT_MAX_SENSOR_FAILURES),
        };

        let pages = match file.pages {
            Some(names) => PageSequence::parse(&names).context("invalid pages")?,
            None => PageSequence::default(),
        };

        let telemetry_file = file.telemetry.unwrap_or_default();
        let telemetry = telemetry_file
            .enabled
            .unwrap_or(true)
            .then(|| TelemetryConfig {
                backend_url: telemetry_file
                    .backend_url
                    .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string()),
                username: telemetry_file
                    .username
                    .unwrap_or_else(|| DEFAULT_BACKEND_USER.to_string()),
                password: telemetry_file
                    .password
                    .unwrap_or_else(|| DEFAULT_BACKEND_PASS.to_string()),
                timeout: telemetry_file
                    .timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_TIMEOUT),
            });

        let live_file = file.live_api.unwrap_or_default();
        let live_api = live_file.enabled.unwrap_or(true).then(|| LiveApiConfig {
            addr: live_file
                .addr
                .unwrap_or_else(|| DEFAULT_LIVE_API_ADDR.to_string()),
            jpeg_quality: live_file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
        });

        Ok(Self {
            capture,
            capture_drive,
            capture_wait,
            detector,
            overlay,
            display,
            sensors,
            hold,
            pages,
            telemetry,
            live_api,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("PAYLOAD_BACKEND_URL") {
            if !url.trim().is_empty() {
                self.telemetry
                    .get_or_insert_with(TelemetryConfig::default)
                    .backend_url = url;
            }
        }
        if let Ok(user) = std::env::var("PAYLOAD_BACKEND_USER") {
            if let Some(telemetry) = self.telemetry.as_mut() {
                telemetry.username = user;
            }
        }
        if let Ok(pass) = std::env::var("PAYLOAD_BACKEND_PASS") {
            if let Some(telemetry) = self.telemetry.as_mut() {
                telemetry.password = pass;
            }
        }
        if let Ok(addr) = std::env::var("PAYLOAD_LIVE_API_ADDR") {
            if !addr.trim().is_empty() {
                self.live_api.get_or_insert_with(LiveApiConfig::default).addr = addr;
            }
        }
        if let Ok(threshold) = std::env::var("PAYLOAD_PROX_THRESHOLD") {
            self.hold.proximity_threshold = threshold
                .trim()
                .parse()
                .map_err(|_| anyhow!("PAYLOAD_PROX_THRESHOLD must be a non-negative integer"))?;
        }
        if let Ok(poll) = std::env::var("PAYLOAD_POLL_MS") {
            let ms: u64 = poll
                .trim()
                .parse()
                .map_err(|_| anyhow!("PAYLOAD_POLL_MS must be an integer number of milliseconds"))?;
            self.hold.poll = Duration::from_millis(ms);
        }
        Ok(())
    }

    /// Replace the page sequence (e.g. from the command line).
    pub fn set_pages<S: AsRef<str>>(&mut self, names: &[S]) -> Result<()> {
        self.pages = PageSequence::parse(names).context("invalid pages")?;
        Ok(())
    }

    /// Bench mode: synthetic camera and sensors, no panel.
    pub fn use_synthetic(&mut self) {
        self.capture.device = DEFAULT_CAMERA_DEVICE.to_string();
        self.sensors.backend = SensorBackend::Synthetic;
        self.display.backend = DisplayBackend::Null;
        if self.display.size.is_none() {
            self.display.size = Some(FrameShape::new(80, 160));
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.capture.validate()?;
        if self.pages.len() < 2 {
            return Err(anyhow!("at least two pages are required"));
        }
        if self.hold.poll.is_zero() {
            return Err(anyhow!("hold poll interval must be greater than zero"));
        }
        if self.hold.unlock.is_zero() || self.hold.step.is_zero() {
            return Err(anyhow!("hold durations must be greater than zero"));
        }
        if let Some(live_api) = &self.live_api {
            if !(1..=100).contains(&live_api.jpeg_quality) {
                return Err(anyhow!(
                    "live_api.jpeg_quality must be within 1..=100 (got {})",
                    live_api.jpeg_quality
                ));
            }
        }
        let kind = DetectorKind::parse(&self.detector.backend)?;
        if kind != DetectorKind::None && !self.capture.is_enabled(self.detector.stream) {
            return Err(anyhow!(
                "detector runs on the {} stream, which is disabled",
                self.detector.stream.name()
            ));
        }
        if !(0.0..=1.0).contains(&self.detector.score_threshold) {
            return Err(anyhow!("detector.score_threshold must be within 0..=1"));
        }
        if let Some(size) = self.display.size {
            if size.is_empty() {
                return Err(anyhow!("display size {} has zero area", size));
            }
        }
        if !(self.sensors.temp_factor.is_finite() && self.sensors.temp_factor > 0.0) {
            return Err(anyhow!("sensors.temp_factor must be a positive number"));
        }
        Ok(())
    }
}

fn parse_stream(value: &str) -> Result<StreamKind> {
    match value.trim().to_ascii_lowercase().as_str() {
        "preview" => Ok(StreamKind::Preview),
        "video" => Ok(StreamKind::Video),
        other => Err(anyhow!(
            "unknown stream '{}'; expected preview or video",
            other
        )),
    }
}

fn secs_to_duration(name: &str, secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(anyhow!("{} must be a positive number of seconds", name));
    }
    Ok(Duration::from_secs_f64(secs))
}

fn read_config_file(path: &Path) -> Result<ControllerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Result<ControllerConfig> {
        let file: ControllerConfigFile = toml::from_str(raw)?;
        let cfg = ControllerConfig::from_file(file)?;
        cfg.validate()?;
        Ok(cfg)
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = parse("").unwrap();
        assert_eq!(cfg.capture.preview, FrameShape::new(160, 320));
        assert_eq!(cfg.capture.video, FrameShape::new(720, 1280));
        assert_eq!(cfg.hold.proximity_threshold, 1500);
        assert_eq!(cfg.hold.unlock, Duration::from_secs(2));
        assert_eq!(cfg.hold.step, Duration::from_millis(500));
        assert_eq!(cfg.hold.poll, Duration::from_millis(50));
        assert_eq!(cfg.pages, PageSequence::default());
        assert_eq!(cfg.capture_drive, CaptureDrive::Threads);
        assert!(cfg.telemetry.is_some());
        assert!(cfg.live_api.is_some());
    }

    #[test]
    fn rejects_no_enabled_stream() {
        let err = parse("[camera]\nenable_preview = false\nenable_video = false\n").unwrap_err();
        assert!(err.to_string().contains("must be enabled"));
    }

    #[test]
    fn rejects_zero_area_stream() {
        assert!(parse("[camera]\npreview_width = 0\n").is_err());
    }

    #[test]
    fn rejects_zero_fps() {
        assert!(parse("[camera]\nfps = 0\n").is_err());
    }

    #[test]
    fn rejects_short_or_unknown_pages() {
        assert!(parse("pages = [\"ip_address\"]\n").is_err());
        assert!(parse("pages = []\n").is_err());
        assert!(parse("pages = [\"ip_address\", \"radar\"]\n").is_err());
    }

    #[test]
    fn rejects_bad_hold_timing() {
        assert!(parse("[hold]\npoll_ms = 0\n").is_err());
        assert!(parse("[hold]\nunlock_secs = 0.0\n").is_err());
        assert!(parse("[hold]\nstep_secs = -1.0\n").is_err());
    }

    #[test]
    fn rejects_quality_out_of_range() {
        assert!(parse("[live_api]\njpeg_quality = 0\n").is_err());
        assert!(parse("[live_api]\njpeg_quality = 101\n").is_err());
        assert!(parse("[live_api]\njpeg_quality = 100\n").is_ok());
    }

    #[test]
    fn rejects_detector_on_disabled_stream() {
        let raw = "[camera]\nenable_preview = false\n[detector]\nstream = \"preview\"\n";
        assert!(parse(raw).is_err());
        let raw = "[camera]\nenable_preview = false\n[detector]\nbackend = \"none\"\n";
        assert!(parse(raw).is_ok());
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(parse("[camera]\nframerate = 30\n").is_err());
    }

    #[test]
    fn synthetic_mode_swaps_hardware_backends() {
        let mut cfg = parse("[camera]\ndevice = \"http://10.0.0.3/stream\"\n").unwrap();
        cfg.use_synthetic();
        assert_eq!(cfg.capture.device, "stub://oak");
        assert_eq!(cfg.sensors.backend, SensorBackend::Synthetic);
        assert_eq!(cfg.display.backend, DisplayBackend::Null);
        assert!(cfg.validate().is_ok());
    }
}
