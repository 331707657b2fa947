//! Linux sysfs sensor backends.
//!
//! Readings come from the kernel's thermal zone and Industrial I/O (IIO)
//! drivers: `ltr501` (LTR-559 light/proximity), `bme280` and `ads1015` (gas
//! heater channels on the environment board).

use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::{EnvironmentReading, EnvironmentSensors, GasResistances, ProximitySensor};

pub const DEFAULT_IIO_ROOT: &str = "/sys/bus/iio/devices";
pub const DEFAULT_THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";

const LIGHT_DRIVERS: &[&str] = &["ltr559", "ltr501"];
const BME280_DRIVERS: &[&str] = &["bme280", "bmp280"];
const ADC_DRIVERS: &[&str] = &["ads1015", "ti-ads1015"];

/// Gas heater supply voltage and load resistor on the environment board.
const GAS_SUPPLY_V: f64 = 3.3;
const GAS_LOAD_OHMS: f64 = 56_000.0;

/// One IIO device directory.
#[derive(Clone, Debug)]
pub struct IioDevice {
    dir: PathBuf,
    name: String,
}

impl IioDevice {
    /// Find the first device under `root` whose `name` is one of `names`.
    pub fn find(root: &Path, names: &[&str]) -> Result<Self> {
        let entries =
            fs::read_dir(root).with_context(|| format!("list iio devices in {}", root.display()))?;
        for entry in entries.flatten() {
            let dir = entry.path();
            let Ok(name) = fs::read_to_string(dir.join("name")) else {
                continue;
            };
            let name = name.trim();
            if names.contains(&name) {
                return Ok(Self {
                    name: name.to_string(),
                    dir,
                });
            }
        }
        Err(anyhow!(
            "no iio device named {} under {}",
            names.join("/"),
            root.display()
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn read_f64(&self, attr: &str) -> Result<f64> {
        read_number(&self.dir.join(attr))
    }

    /// `<prefix>_input` when the driver provides it, else `<prefix>_raw * <prefix>_scale`.
    pub fn read_scaled(&self, prefix: &str) -> Result<f64> {
        if let Ok(value) = self.read_f64(&format!("{prefix}_input")) {
            return Ok(value);
        }
        let raw = self.read_f64(&format!("{prefix}_raw"))?;
        let scale = self.read_f64(&format!("{prefix}_scale")).unwrap_or(1.0);
        Ok(raw * scale)
    }
}

fn read_number(path: &Path) -> Result<f64> {
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    text.trim()
        .parse::<f64>()
        .with_context(|| format!("parse number from {}", path.display()))
}

/// Proximity from the LTR-559's IIO channel.
pub struct SysfsProximity {
    device: IioDevice,
}

impl SysfsProximity {
    pub fn open(iio_root: &Path) -> Result<Self> {
        let device = IioDevice::find(iio_root, LIGHT_DRIVERS)?;
        log::info!("proximity sensor: {} at {}", device.name(), device.path().display());
        Ok(Self { device })
    }
}

impl ProximitySensor for SysfsProximity {
    fn read_proximity(&mut self) -> Result<u32> {
        let raw = self.device.read_f64("in_proximity_raw")?;
        Ok(raw.max(0.0) as u32)
    }
}

/// Environment board read through sysfs.
pub struct SysfsEnvironment {
    thermal_zone: PathBuf,
    light: IioDevice,
    climate: IioDevice,
    adc: Option<IioDevice>,
}

impl SysfsEnvironment {
    pub fn open(iio_root: &Path, thermal_zone: &Path) -> Result<Self> {
        let light = IioDevice::find(iio_root, LIGHT_DRIVERS)?;
        let climate = IioDevice::find(iio_root, BME280_DRIVERS)?;
        let adc = match IioDevice::find(iio_root, ADC_DRIVERS) {
            Ok(adc) => Some(adc),
            Err(err) => {
                log::warn!("gas adc unavailable, gas readings will be zero: {:#}", err);
                None
            }
        };
        Ok(Self {
            thermal_zone: thermal_zone.to_path_buf(),
            light,
            climate,
            adc,
        })
    }

    fn gas(&self) -> Result<GasResistances> {
        let Some(adc) = &self.adc else {
            return Ok(GasResistances::default());
        };
        let channel = |n: u32| -> Result<f64> {
            // IIO voltage channels report millivolts.
            let volts = adc.read_scaled(&format!("in_voltage{n}"))? / 1000.0;
            Ok(gas_resistance(volts))
        };
        Ok(GasResistances {
            oxidising: channel(0)?,
            reducing: channel(1)?,
            nh3: channel(2)?,
        })
    }
}

/// Sensor resistance from the voltage across it in the load divider.
pub(crate) fn gas_resistance(volts: f64) -> f64 {
    if volts >= GAS_SUPPLY_V {
        return 0.0;
    }
    volts * GAS_LOAD_OHMS / (GAS_SUPPLY_V - volts)
}

impl EnvironmentSensors for SysfsEnvironment {
    fn read_environment(&mut self) -> Result<EnvironmentReading> {
        // bme280 reports milli-degrees C, kPa and milli-percent.
        let temperature_c = self.climate.read_scaled("in_temp")? / 1000.0;
        let pressure_hpa = self.climate.read_scaled("in_pressure")? * 10.0;
        let humidity_pct = self
            .climate
            .read_scaled("in_humidityrelative")
            .map(|h| h / 1000.0)
            .unwrap_or(0.0);
        let lux = self.light.read_scaled("in_illuminance")?;
        Ok(EnvironmentReading {
            temperature_c,
            pressure_hpa,
            humidity_pct,
            lux,
            gas: self.gas()?,
        })
    }

    fn cpu_temp_c(&mut self) -> Result<f64> {
        Ok(read_number(&self.thermal_zone)? / 1000.0)
    }
}
