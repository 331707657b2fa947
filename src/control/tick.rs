//! The per-cycle work run while the controller waits on a hold.
//!
//! Three independent steps: pull a preview frame into the composer, redraw
//! the current page, then sample the sensors and push telemetry. A failing
//! step is logged and reported as degraded; it never stops the others or the
//! hold loop.

use anyhow::{anyhow, Result};
use std::net::{IpAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use super::hold::TickHandler;
use super::pages::Page;
use crate::compose::{ComposeOutcome, FrameComposer};
use crate::display::{DisplayContent, DisplaySink, TextStyle};
use crate::frame::FrameStore;
use crate::ingest::{CaptureSource, StreamKind};
use crate::sensors::{
    compensate_temperature, gas_concentrations, gated_light, CpuTempSmoother, EnvironmentSensors,
    GasBaselines, ProximitySensor,
};
use crate::transport::{LatestTelemetry, TelemetryPayload, TelemetrySink};

pub const DEFAULT_CAPTURE_WAIT: Duration = Duration::from_millis(100);
pub const DEFAULT_TEMP_FACTOR: f64 = 2.75;

pub const NO_FRAME_TEXT: &str = "No camera frame yet.";
pub const RENDER_FAILED_TEXT: &str = "Failed to render frame.";
pub const UNKNOWN_STATE_TEXT: &str = "UNKNOWN STATE.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Ok,
    /// Nothing to do this cycle.
    Skipped,
    Degraded(String),
}

impl StepOutcome {
    pub fn is_degraded(&self) -> bool {
        matches!(self, StepOutcome::Degraded(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TickReport {
    pub page: Page,
    pub capture: StepOutcome,
    pub display: StepOutcome,
    pub telemetry: StepOutcome,
}

impl TickReport {
    pub fn degraded(&self) -> bool {
        self.capture.is_degraded() || self.display.is_degraded() || self.telemetry.is_degraded()
    }
}

/// CPU temperature read once per tick: the raw sample and the smoothed mean.
#[derive(Clone, Copy, Debug, PartialEq)]
struct CpuReading {
    current: f64,
    average: f64,
}

struct TickCapture {
    source: Arc<dyn CaptureSource>,
    composer: FrameComposer,
    wait: Duration,
}

pub struct ControllerTick {
    capture: Option<TickCapture>,
    display: Box<dyn DisplaySink>,
    text_style: TextStyle,
    frames: Arc<FrameStore>,
    proximity: Box<dyn ProximitySensor>,
    environment: Box<dyn EnvironmentSensors>,
    telemetry: Box<dyn TelemetrySink>,
    latest: Arc<LatestTelemetry>,
    cpu_temps: Option<CpuTempSmoother>,
    temp_factor: f64,
    baselines: GasBaselines,
    local_ip: fn() -> Option<IpAddr>,
    ticks: u64,
    last_report: Option<TickReport>,
}

impl ControllerTick {
    pub fn new(
        display: Box<dyn DisplaySink>,
        frames: Arc<FrameStore>,
        proximity: Box<dyn ProximitySensor>,
        environment: Box<dyn EnvironmentSensors>,
        telemetry: Box<dyn TelemetrySink>,
        latest: Arc<LatestTelemetry>,
    ) -> Self {
        Self {
            capture: None,
            display,
            text_style: TextStyle::default(),
            frames,
            proximity,
            environment,
            telemetry,
            latest,
            cpu_temps: None,
            temp_factor: DEFAULT_TEMP_FACTOR,
            baselines: GasBaselines::default(),
            local_ip: local_ipv4,
            ticks: 0,
            last_report: None,
        }
    }

    /// Pull preview frames from `source` into `composer` on every tick.
    pub fn with_capture(
        mut self,
        source: Arc<dyn CaptureSource>,
        composer: FrameComposer,
        wait: Duration,
    ) -> Self {
        self.capture = Some(TickCapture {
            source,
            composer,
            wait,
        });
        self
    }

    pub fn with_text_style(mut self, style: TextStyle) -> Self {
        self.text_style = style;
        self
    }

    pub fn with_temp_factor(mut self, factor: f64) -> Self {
        self.temp_factor = factor;
        self
    }

    pub fn with_gas_baselines(mut self, baselines: GasBaselines) -> Self {
        self.baselines = baselines;
        self
    }

    pub fn with_ip_lookup(mut self, lookup: fn() -> Option<IpAddr>) -> Self {
        self.local_ip = lookup;
        self
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn last_report(&self) -> Option<&TickReport> {
        self.last_report.as_ref()
    }

    pub fn display_mut(&mut self) -> &mut dyn DisplaySink {
        self.display.as_mut()
    }

    pub fn run(&mut self, page: Page) -> TickReport {
        self.ticks += 1;
        let cpu = self.read_cpu();
        let report = TickReport {
            page,
            capture: self.capture_step(),
            display: self.display_step(page, &cpu),
            telemetry: self.telemetry_step(&cpu),
        };
        if report.degraded() {
            log::debug!("tick {} degraded: {:?}", self.ticks, report);
        }
        self.last_report = Some(report.clone());
        report
    }

    fn capture_step(&mut self) -> StepOutcome {
        let Some(capture) = self.capture.as_mut() else {
            return StepOutcome::Skipped;
        };
        match capture.source.get_within(StreamKind::Preview, capture.wait) {
            Ok(Some(frame)) => match capture.composer.ingest(frame) {
                ComposeOutcome::Failed(err) => StepOutcome::Degraded(err),
                _ => StepOutcome::Ok,
            },
            Ok(None) => StepOutcome::Skipped,
            Err(err) => {
                log::debug!("tick: capture failed: {:#}", err);
                StepOutcome::Degraded(format!("{err:#}"))
            }
        }
    }

    fn display_step(&mut self, page: Page, cpu: &Result<CpuReading, String>) -> StepOutcome {
        let (content, mut outcome) = match self.page_content(page, cpu) {
            Ok(Some(content)) => (content, StepOutcome::Ok),
            Ok(None) => (
                DisplayContent::Text(NO_FRAME_TEXT.to_string()),
                StepOutcome::Skipped,
            ),
            Err(err) => {
                log::warn!("tick: cannot render {} page: {:#}", page, err);
                (
                    DisplayContent::Text(UNKNOWN_STATE_TEXT.to_string()),
                    StepOutcome::Degraded(format!("{err:#}")),
                )
            }
        };

        if let Err(err) = self.display.show(&content, &self.text_style) {
            log::warn!("tick: display show failed: {:#}", err);
            outcome = StepOutcome::Degraded(format!("{err:#}"));
            if let DisplayContent::Frame(_) = content {
                let fallback = DisplayContent::Text(RENDER_FAILED_TEXT.to_string());
                if let Err(err) = self.display.show(&fallback, &self.text_style) {
                    log::warn!("tick: display fallback failed: {:#}", err);
                }
            }
        }
        outcome
    }

    /// `Ok(None)` when the camera page has no frame to show yet.
    fn page_content(
        &mut self,
        page: Page,
        cpu: &Result<CpuReading, String>,
    ) -> Result<Option<DisplayContent>> {
        match page {
            Page::IpAddress => {
                let ip = (self.local_ip)()
                    .map(|ip| ip.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                Ok(Some(DisplayContent::Text(format!("IP: {ip}"))))
            }
            Page::Sensors => {
                let cpu = cpu.clone().map_err(|err| anyhow!(err))?;
                let raw = self.environment.read_environment()?.temperature_c;
                let enviro = compensate_temperature(raw, cpu.average, self.temp_factor);
                Ok(Some(DisplayContent::Text(format!(
                    "Pi Temp: {:.1}°C\nEnviro Temp: {enviro:.1}°C",
                    cpu.current
                ))))
            }
            Page::Camera => Ok(self.frames.get_composed().map(DisplayContent::Frame)),
        }
    }

    /// The only place the smoother advances.
    fn read_cpu(&mut self) -> Result<CpuReading, String> {
        match self.environment.cpu_temp_c() {
            Ok(current) => Ok(CpuReading {
                current,
                average: self.push_cpu_temp(current),
            }),
            Err(err) => {
                log::debug!("tick: cpu temperature read failed: {:#}", err);
                Err(format!("{err:#}"))
            }
        }
    }

    fn push_cpu_temp(&mut self, sample: f64) -> f64 {
        match self.cpu_temps.as_mut() {
            Some(smoother) => smoother.push(sample),
            None => {
                let smoother = CpuTempSmoother::new(sample);
                let avg = smoother.average();
                self.cpu_temps = Some(smoother);
                avg
            }
        }
    }

    fn sample(&mut self, cpu: &Result<CpuReading, String>) -> Result<TelemetryPayload> {
        let proximity = self.proximity.read_proximity()?;
        let cpu = cpu.clone().map_err(|err| anyhow!(err))?;
        let reading = self.environment.read_environment()?;
        Ok(TelemetryPayload::new(
            compensate_temperature(reading.temperature_c, cpu.average, self.temp_factor),
            reading.pressure_hpa,
            reading.humidity_pct,
            gated_light(proximity, reading.lux),
            gas_concentrations(reading.gas, &self.baselines),
        ))
    }

    fn telemetry_step(&mut self, cpu: &Result<CpuReading, String>) -> StepOutcome {
        let payload = match self.sample(cpu) {
            Ok(payload) => payload,
            Err(err) => {
                log::debug!("tick: sensor read failed: {:#}", err);
                return StepOutcome::Degraded(format!("{err:#}"));
            }
        };
        self.latest.set(payload.clone());
        if self.telemetry.post(&payload) {
            StepOutcome::Ok
        } else {
            StepOutcome::Degraded("telemetry not accepted".to_string())
        }
    }
}

impl TickHandler for ControllerTick {
    fn tick(&mut self, page: Page) {
        self.run(page);
    }
}

/// Address of the interface that carries outbound traffic. Connecting a UDP
/// socket sends nothing; it only selects a route.
pub fn local_ipv4() -> Option<IpAddr> {
    let probe = || -> Result<IpAddr> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("8.8.8.8:80")?;
        let ip = socket.local_addr()?.ip();
        if ip.is_unspecified() {
            return Err(anyhow!("no route"));
        }
        Ok(ip)
    };
    probe().ok()
}
