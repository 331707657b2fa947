use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{EnvironmentReading, EnvironmentSensors, GasResistances, ProximitySensor};

/// One scripted proximity sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProximityScript {
    Value(u32),
    Fail,
}

/// Proximity sensor that replays a script, then either repeats it or holds
/// the last value.
#[derive(Clone, Debug)]
pub struct ScriptedProximity {
    script: Vec<ProximityScript>,
    pos: usize,
    repeat: bool,
    reads: u64,
}

impl ScriptedProximity {
    pub fn new(script: Vec<ProximityScript>) -> Self {
        Self {
            script,
            pos: 0,
            repeat: false,
            reads: 0,
        }
    }

    pub fn constant(value: u32) -> Self {
        Self::new(vec![ProximityScript::Value(value)])
    }

    /// Repeat the script forever instead of sticking on its last entry.
    pub fn repeating(mut self) -> Self {
        self.repeat = true;
        self
    }

    /// `low` polls uncovered followed by `high` polls covered, repeated.
    /// Used for unattended bench runs.
    pub fn wave(low: usize, high: usize, threshold: u32) -> Self {
        let mut script = vec![ProximityScript::Value(0); low];
        let covered = ProximityScript::Value(threshold.saturating_add(100));
        script.extend(std::iter::repeat(covered).take(high));
        Self::new(script).repeating()
    }

    pub fn reads(&self) -> u64 {
        self.reads
    }
}

impl ProximitySensor for ScriptedProximity {
    fn read_proximity(&mut self) -> Result<u32> {
        self.reads += 1;
        if self.script.is_empty() {
            return Ok(0);
        }
        let idx = if self.repeat {
            self.pos % self.script.len()
        } else {
            self.pos.min(self.script.len() - 1)
        };
        self.pos += 1;
        match self.script[idx] {
            ProximityScript::Value(v) => Ok(v),
            ProximityScript::Fail => Err(anyhow!("scripted proximity read failure")),
        }
    }
}

/// Plausible indoor readings with small seeded jitter.
pub struct SyntheticEnvironment {
    rng: StdRng,
}

impl SyntheticEnvironment {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl EnvironmentSensors for SyntheticEnvironment {
    fn read_environment(&mut self) -> Result<EnvironmentReading> {
        Ok(EnvironmentReading {
            temperature_c: 24.0 + self.rng.gen_range(-0.3..0.3),
            pressure_hpa: 1013.0 + self.rng.gen_range(-0.5..0.5),
            humidity_pct: 40.0 + self.rng.gen_range(-1.0..1.0),
            lux: 120.0 + self.rng.gen_range(-5.0..5.0),
            gas: GasResistances {
                oxidising: 4000.0 + self.rng.gen_range(-50.0..50.0),
                reducing: 350_000.0 + self.rng.gen_range(-2000.0..2000.0),
                nh3: 150_000.0 + self.rng.gen_range(-1000.0..1000.0),
            },
        })
    }

    fn cpu_temp_c(&mut self) -> Result<f64> {
        Ok(48.0 + self.rng.gen_range(-1.0..1.0))
    }
}
