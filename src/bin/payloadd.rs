//! payloadd - onboard payload controller daemon
//!
//! This daemon:
//! 1. Starts the dual-stream camera and one composer per enabled stream
//! 2. Runs the detector on one stream and shares its boxes with the other
//! 3. Serves the latest frame, detections and telemetry on the live API
//! 4. Drives the proximity-gated page cycle on the onboard display, posting
//!    telemetry on every controller tick

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use payload_controller::api::{LiveApiServer, LiveState};
use payload_controller::config::{
    CaptureDrive, ControllerConfig, DisplayBackend, SensorBackend,
};
use payload_controller::control::{ControllerTick, PageCycle, SystemClock};
use payload_controller::detect::{build_detector, DetectorKind};
use payload_controller::display::{DisplaySink, FramebufferDisplay, NullDisplay, TextStyle};
use payload_controller::frame::FrameShape;
use payload_controller::ingest::{
    open_device, spawn_acquisition, CaptureSource, DualStreamCamera, StreamKind,
};
use payload_controller::overlay::{load_font, OverlayStyle};
use payload_controller::sensors::{
    EnvironmentSensors, ProximitySensor, ScriptedProximity, SharedProximity, SyntheticEnvironment,
    SysfsEnvironment, SysfsProximity,
};
use payload_controller::transport::{
    HttpTelemetryClient, LatestTelemetry, NullTelemetry, TelemetrySink,
};
use payload_controller::{
    ComposerConfig, ComposerStats, DetectionsCache, FrameComposer, FrameStore, Shutdown,
};

const BENCH_PANEL: FrameShape = FrameShape::new(80, 160);
const FIRST_FRAME_WAIT: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(author, version, about = "Onboard payload controller")]
struct Args {
    /// TOML configuration file.
    #[arg(long, env = "PAYLOAD_CONFIG")]
    config: Option<PathBuf>,

    /// Bench mode: synthetic camera and sensors, no panel.
    #[arg(long)]
    synthetic: bool,

    /// Page order, comma separated (e.g. ip_address,sensors,camera).
    #[arg(long, value_delimiter = ',')]
    pages: Option<Vec<String>>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = ControllerConfig::load_from(args.config.as_deref())?;
    if args.synthetic {
        cfg.use_synthetic();
    }
    if let Some(pages) = &args.pages {
        cfg.set_pages(pages)?;
    }
    cfg.validate()?;

    let shutdown = Shutdown::new();
    shutdown.install_signal_handler()?;

    let camera = Arc::new(DualStreamCamera::new(cfg.capture.clone())?);
    camera.start(open_device(&cfg.capture.device)?)?;

    let preview_store = Arc::new(FrameStore::new());
    let video_store = Arc::new(FrameStore::new());
    let cache = Arc::new(DetectionsCache::new());
    let overlay_style = overlay_style(&cfg)?;

    let mut preview_composer = cfg
        .capture
        .enable_preview
        .then(|| build_composer(&cfg, StreamKind::Preview, &preview_store, &cache, &overlay_style))
        .transpose()?;
    let video_composer = cfg
        .capture
        .enable_video
        .then(|| build_composer(&cfg, StreamKind::Video, &video_store, &cache, &overlay_style))
        .transpose()?;

    if let Some(composer) = preview_composer.as_mut() {
        match camera.get_preview(FIRST_FRAME_WAIT)? {
            Some(frame) => {
                composer.ingest(frame);
            }
            None => log::warn!("no preview frame within {:?}", FIRST_FRAME_WAIT),
        }
    }

    let source: Arc<dyn CaptureSource> = camera.clone();
    let mut workers: Vec<JoinHandle<ComposerStats>> = Vec::new();
    if let Some(composer) = video_composer {
        workers.push(spawn_acquisition(
            StreamKind::Video,
            source.clone(),
            composer,
            shutdown.clone(),
            cfg.capture_wait,
        ));
    }
    let mut tick_composer = None;
    if let Some(composer) = preview_composer {
        match cfg.capture_drive {
            CaptureDrive::Threads => workers.push(spawn_acquisition(
                StreamKind::Preview,
                source.clone(),
                composer,
                shutdown.clone(),
                cfg.capture_wait,
            )),
            CaptureDrive::Tick => tick_composer = Some(composer),
        }
    }

    let latest = Arc::new(LatestTelemetry::new());
    let api_handle = match &cfg.live_api {
        Some(api_cfg) => {
            let frames = if cfg.capture.enable_video {
                video_store.clone()
            } else {
                preview_store.clone()
            };
            let state = LiveState {
                frames,
                detections: cache.clone(),
                telemetry: latest.clone(),
            };
            Some(LiveApiServer::new(api_cfg.clone(), state).spawn()?)
        }
        None => None,
    };

    let (proximity, environment) = open_sensors(&cfg)?;
    let display = open_display(&cfg)?;
    let telemetry: Box<dyn TelemetrySink> = match &cfg.telemetry {
        Some(telemetry_cfg) => Box::new(HttpTelemetryClient::new(telemetry_cfg)?),
        None => Box::new(NullTelemetry),
    };

    let mut text_style = TextStyle {
        height: cfg.display.text_height,
        ..TextStyle::default()
    };
    if let Some(path) = &cfg.display.font_path {
        text_style.font = Some(load_font(path)?);
    }

    let mut tick = ControllerTick::new(
        display,
        preview_store.clone(),
        Box::new(proximity.clone()),
        environment,
        telemetry,
        latest,
    )
    .with_text_style(text_style)
    .with_temp_factor(cfg.sensors.temp_factor);
    if let Some(composer) = tick_composer {
        tick = tick.with_capture(source.clone(), composer, cfg.capture_wait);
    }

    let mut cycle = PageCycle::new(
        cfg.pages.clone(),
        cfg.hold.unlock_config(),
        cfg.hold.step_config(),
        Box::new(proximity),
        Arc::new(SystemClock),
        shutdown.clone(),
    );
    log::info!(
        "payloadd running: pages={:?} threshold={} poll={:?}",
        cfg.pages.pages(),
        cfg.hold.proximity_threshold,
        cfg.hold.poll
    );
    cycle.run(&mut tick);

    shutdown.trigger();
    for worker in workers {
        match worker.join() {
            Ok(stats) => log::info!(
                "worker done: frames={} detector_runs={} failures={}",
                stats.frames_ingested,
                stats.detector_runs,
                stats.detector_failures
            ),
            Err(_) => log::error!("acquisition worker panicked"),
        }
    }
    if let Some(handle) = api_handle {
        handle.stop()?;
    }
    camera.close();
    let stats = camera.stats();
    log::info!(
        "camera stopped: preview={} (dropped {}) video={} (dropped {}) errors={}",
        stats.preview_frames,
        stats.preview_dropped,
        stats.video_frames,
        stats.video_dropped,
        stats.device_errors
    );
    if let Err(err) = tick.display_mut().clear() {
        log::warn!("failed to clear display: {:#}", err);
    }
    log::info!("payloadd stopped after {} ticks", tick.ticks());
    Ok(())
}

fn overlay_style(cfg: &ControllerConfig) -> Result<OverlayStyle> {
    let style = OverlayStyle {
        color: cfg.overlay.color,
        thickness: cfg.overlay.thickness,
        text_height: cfg.overlay.text_height,
        font: None,
    };
    Ok(match &cfg.overlay.font_path {
        Some(path) => style.with_font(load_font(path)?),
        None => style,
    })
}

fn build_composer(
    cfg: &ControllerConfig,
    stream: StreamKind,
    store: &Arc<FrameStore>,
    cache: &Arc<DetectionsCache>,
    style: &OverlayStyle,
) -> Result<FrameComposer> {
    let runs_detector = stream == cfg.detector.stream;
    let detector = if runs_detector {
        build_detector(&cfg.detector)?
    } else {
        None
    };
    let detection_enabled = DetectorKind::parse(&cfg.detector.backend)? != DetectorKind::None;

    let config = ComposerConfig {
        publish_detections: detector.is_some(),
        cache_max_age: cfg.detector.cache_max_age,
        score_threshold: cfg.detector.score_threshold,
        style: style.clone(),
    };
    let mut composer = FrameComposer::new(stream.name(), store.clone()).with_config(config);
    if let Some(detector) = detector {
        composer = composer.with_detector(detector);
    }
    if detection_enabled {
        composer = composer.with_cache(cache.clone());
    }
    Ok(composer)
}

fn open_sensors(cfg: &ControllerConfig) -> Result<(SharedProximity, Box<dyn EnvironmentSensors>)> {
    match cfg.sensors.backend {
        SensorBackend::Sysfs => {
            let proximity: Box<dyn ProximitySensor> = Box::new(
                SysfsProximity::open(&cfg.sensors.iio_root).context("open proximity sensor")?,
            );
            let environment =
                SysfsEnvironment::open(&cfg.sensors.iio_root, &cfg.sensors.thermal_zone)
                    .context("open environment sensors")?;
            Ok((SharedProximity::new(proximity), Box::new(environment)))
        }
        SensorBackend::Synthetic => {
            let unlock_polls = polls_for(cfg.hold.unlock, cfg.hold.poll);
            let proximity = ScriptedProximity::wave(
                unlock_polls,
                unlock_polls + 10,
                cfg.hold.proximity_threshold,
            );
            log::info!("using synthetic sensors");
            Ok((
                SharedProximity::new(Box::new(proximity)),
                Box::new(SyntheticEnvironment::new(rand::random())),
            ))
        }
    }
}

fn polls_for(hold: Duration, poll: Duration) -> usize {
    (hold.as_millis() / poll.as_millis().max(1)) as usize + 1
}

fn open_display(cfg: &ControllerConfig) -> Result<Box<dyn DisplaySink>> {
    match cfg.display.backend {
        DisplayBackend::Framebuffer => {
            let display = FramebufferDisplay::open(&cfg.display.device, cfg.display.size)
                .with_context(|| format!("open display {}", cfg.display.device.display()))?;
            Ok(Box::new(display))
        }
        DisplayBackend::Null => Ok(Box::new(NullDisplay::new(
            cfg.display.size.unwrap_or(BENCH_PANEL),
        ))),
    }
}
