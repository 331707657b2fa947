//! Proximity and environment sensors, plus the derived values reported as
//! telemetry (smoothed CPU temperature, compensated ambient temperature,
//! gated light level and gas concentrations).

use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub mod synthetic;
pub mod sysfs;

pub use synthetic::{ProximityScript, ScriptedProximity, SyntheticEnvironment};
pub use sysfs::{IioDevice, SysfsEnvironment, SysfsProximity};

/// Raw proximity counts from the light/proximity sensor.
pub trait ProximitySensor: Send {
    fn read_proximity(&mut self) -> Result<u32>;
}

impl<T: ProximitySensor + ?Sized> ProximitySensor for Box<T> {
    fn read_proximity(&mut self) -> Result<u32> {
        (**self).read_proximity()
    }
}

/// One proximity sensor read from several loops (page cycle and telemetry).
#[derive(Clone)]
pub struct SharedProximity {
    inner: Arc<Mutex<Box<dyn ProximitySensor>>>,
}

impl SharedProximity {
    pub fn new(sensor: Box<dyn ProximitySensor>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(sensor)),
        }
    }
}

impl ProximitySensor for SharedProximity {
    fn read_proximity(&mut self) -> Result<u32> {
        let mut sensor = self
            .inner
            .lock()
            .map_err(|_| anyhow!("proximity sensor lock poisoned"))?;
        sensor.read_proximity()
    }
}

/// Gas sensor resistances in ohms.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GasResistances {
    pub oxidising: f64,
    pub reducing: f64,
    pub nh3: f64,
}

/// One environment sample, uncompensated.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EnvironmentReading {
    pub temperature_c: f64,
    pub pressure_hpa: f64,
    pub humidity_pct: f64,
    pub lux: f64,
    pub gas: GasResistances,
}

pub trait EnvironmentSensors: Send {
    fn read_environment(&mut self) -> Result<EnvironmentReading>;
    fn cpu_temp_c(&mut self) -> Result<f64>;
}

/// Proximity counts below this mean nothing covers the sensor, so the
/// ambient light reading is meaningful.
pub const LIGHT_PROXIMITY_LIMIT: u32 = 10;

/// Light level reported when the sensor is covered.
pub const COVERED_LIGHT: f64 = 1.0;

const ZERO_RATIO: f64 = 0.001;

/// Clean-air gas resistances used to normalise readings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GasBaselines {
    pub oxidising: f64,
    pub reducing: f64,
    pub nh3: f64,
}

impl Default for GasBaselines {
    fn default() -> Self {
        Self {
            oxidising: 3863.945578231293,
            reducing: 354666.66666666686,
            nh3: 150020.06688963214,
        }
    }
}

/// Gas concentrations in ppm.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GasConcentrations {
    pub oxidising: f64,
    pub reducing: f64,
    pub nh3: f64,
}

pub fn gas_concentrations(gas: GasResistances, baselines: &GasBaselines) -> GasConcentrations {
    let ratio = |rs: f64, r0: f64| {
        let r = rs / r0;
        if r == 0.0 || !r.is_finite() {
            ZERO_RATIO
        } else {
            r
        }
    };
    let ox = ratio(gas.oxidising, baselines.oxidising);
    let red = ratio(gas.reducing, baselines.reducing);
    let nh3 = ratio(gas.nh3, baselines.nh3);
    GasConcentrations {
        oxidising: (ox / 6.49).powf(0.985),
        reducing: (red / 3.574).powf(-1.171),
        nh3: (nh3 / 0.787).powf(-1.859),
    }
}

/// Ambient temperature corrected for heat soaked up from the CPU.
pub fn compensate_temperature(raw_c: f64, avg_cpu_c: f64, factor: f64) -> f64 {
    raw_c - (avg_cpu_c - raw_c) / factor
}

pub fn gated_light(proximity: u32, lux: f64) -> f64 {
    if proximity < LIGHT_PROXIMITY_LIMIT {
        lux
    } else {
        COVERED_LIGHT
    }
}

/// Moving average over the last few CPU temperature samples.
#[derive(Clone, Debug)]
pub struct CpuTempSmoother {
    samples: VecDeque<f64>,
    window: usize,
}

impl CpuTempSmoother {
    pub const DEFAULT_WINDOW: usize = 5;

    /// Start with the window pre-filled with `initial`.
    pub fn new(initial: f64) -> Self {
        Self::with_window(initial, Self::DEFAULT_WINDOW)
    }

    pub fn with_window(initial: f64, window: usize) -> Self {
        let window = window.max(1);
        Self {
            samples: std::iter::repeat(initial).take(window).collect(),
            window,
        }
    }

    /// Add a sample and return the new average.
    pub fn push(&mut self, sample: f64) -> f64 {
        if self.samples.len() >= self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        self.average()
    }

    pub fn average(&self) -> f64 {
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_proximity_reads_one_device() {
        let shared = SharedProximity::new(Box::new(ScriptedProximity::new(vec![
            ProximityScript::Value(1),
            ProximityScript::Value(2),
            ProximityScript::Value(3),
        ])));
        let mut a = shared.clone();
        let mut b = shared;
        assert_eq!(a.read_proximity().unwrap(), 1);
        assert_eq!(b.read_proximity().unwrap(), 2);
        assert_eq!(a.read_proximity().unwrap(), 3);
    }

    #[test]
    fn smoother_averages_last_window() {
        let mut smoother = CpuTempSmoother::new(50.0);
        assert_eq!(smoother.average(), 50.0);
        assert_eq!(smoother.push(60.0), 52.0);
        for _ in 0..5 {
            smoother.push(40.0);
        }
        assert_eq!(smoother.average(), 40.0);
    }

    #[test]
    fn compensation_pulls_towards_ambient() {
        let t = compensate_temperature(30.0, 55.0, 2.5);
        assert!((t - 20.0).abs() < 1e-9);
    }

    #[test]
    fn light_only_reported_when_uncovered() {
        assert_eq!(gated_light(3, 120.5), 120.5);
        assert_eq!(gated_light(10, 120.5), COVERED_LIGHT);
        assert_eq!(gated_light(2000, 120.5), COVERED_LIGHT);
    }

    #[test]
    fn gas_at_baseline() {
        let baselines = GasBaselines::default();
        let gas = GasResistances {
            oxidising: baselines.oxidising,
            reducing: baselines.reducing,
            nh3: baselines.nh3,
        };
        let ppm = gas_concentrations(gas, &baselines);
        assert!((ppm.oxidising - (1.0f64 / 6.49).powf(0.985)).abs() < 1e-12);
        assert!((ppm.reducing - (1.0f64 / 3.574).powf(-1.171)).abs() < 1e-12);
        assert!((ppm.nh3 - (1.0f64 / 0.787).powf(-1.859)).abs() < 1e-12);
    }

    #[test]
    fn zero_resistance_uses_floor_ratio() {
        let ppm = gas_concentrations(GasResistances::default(), &GasBaselines::default());
        assert!((ppm.oxidising - (0.001f64 / 6.49).powf(0.985)).abs() < 1e-12);
        assert!(ppm.reducing.is_finite());
        assert!(ppm.nh3.is_finite());
    }
}
