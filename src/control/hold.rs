//! Proximity hold detection.
//!
//! A hold is satisfied once the proximity reading stays at or above the
//! threshold continuously for the required duration. Any sample below the
//! threshold drops progress back to idle. A failed read is neither "near"
//! nor "far": it leaves the state untouched, unless failures keep coming, in
//! which case the hold is abandoned.

use std::time::{Duration, Instant};

use super::clock::Clock;
use super::pages::Page;
use crate::sensors::ProximitySensor;
use crate::shutdown::Shutdown;

pub const DEFAULT_MAX_SENSOR_FAILURES: u32 = 20;

#[derive(Clone, Debug, PartialEq)]
pub struct HoldConfig {
    pub threshold: u32,
    pub hold: Duration,
    pub poll: Duration,
    /// Consecutive failed reads after which an in-progress hold is reset.
    pub max_sensor_failures: u32,
}

impl HoldConfig {
    pub fn new(threshold: u32, hold: Duration, poll: Duration) -> Self {
        Self {
            threshold,
            hold,
            poll,
            max_sensor_failures: DEFAULT_MAX_SENSOR_FAILURES,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HoldState {
    Idle,
    Holding { since: Instant },
    /// Terminal.
    Satisfied { held: Duration },
}

/// Pure hold state machine, fed one sample at a time.
#[derive(Clone, Debug)]
pub struct HoldTracker {
    threshold: u32,
    required: Duration,
    max_failures: u32,
    state: HoldState,
    failures: u32,
}

impl HoldTracker {
    pub fn new(config: &HoldConfig) -> Self {
        Self {
            threshold: config.threshold,
            required: config.hold,
            max_failures: config.max_sensor_failures,
            state: HoldState::Idle,
            failures: 0,
        }
    }

    pub fn state(&self) -> HoldState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }

    pub fn observe(&mut self, proximity: u32, now: Instant) -> HoldState {
        if let HoldState::Satisfied { .. } = self.state {
            return self.state;
        }
        self.failures = 0;
        self.state = if proximity >= self.threshold {
            match self.state {
                HoldState::Holding { since } => {
                    let held = now.saturating_duration_since(since);
                    if held >= self.required {
                        HoldState::Satisfied { held }
                    } else {
                        HoldState::Holding { since }
                    }
                }
                _ => HoldState::Holding { since: now },
            }
        } else {
            HoldState::Idle
        };
        self.state
    }

    /// Record a failed read. Returns true if this failure reset the hold.
    pub fn sensor_failed(&mut self) -> bool {
        if let HoldState::Satisfied { .. } = self.state {
            return false;
        }
        self.failures = self.failures.saturating_add(1);
        if self.failures >= self.max_failures && self.state != HoldState::Idle {
            self.state = HoldState::Idle;
            return true;
        }
        false
    }
}

/// Work done once per poll cycle while waiting for a hold, bound to the page
/// currently on screen.
pub trait TickHandler {
    fn tick(&mut self, page: Page);
}

impl<F: FnMut(Page)> TickHandler for F {
    fn tick(&mut self, page: Page) {
        self(page)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HoldOutcome {
    Satisfied { held: Duration },
    Shutdown,
}

/// Poll `sensor` every `config.poll` until a hold is satisfied or shutdown
/// is requested. `tick` runs once per cycle, before the sample is evaluated.
pub fn wait_for_hold(
    sensor: &mut dyn ProximitySensor,
    clock: &dyn Clock,
    config: &HoldConfig,
    page: Page,
    tick: &mut dyn TickHandler,
    shutdown: &Shutdown,
) -> HoldOutcome {
    let mut tracker = HoldTracker::new(config);
    loop {
        if shutdown.is_triggered() {
            return HoldOutcome::Shutdown;
        }
        tick.tick(page);

        match sensor.read_proximity() {
            Ok(proximity) => {
                if let HoldState::Satisfied { held } = tracker.observe(proximity, clock.now()) {
                    log::info!(
                        "hold satisfied on {} (prox={}, held={:.2}s)",
                        page,
                        proximity,
                        held.as_secs_f64()
                    );
                    return HoldOutcome::Satisfied { held };
                }
            }
            Err(err) => {
                log::warn!("proximity read failed: {:#}", err);
                if tracker.sensor_failed() {
                    log::error!(
                        "proximity sensor failed {} times in a row; hold reset",
                        tracker.consecutive_failures()
                    );
                }
            }
        }

        clock.sleep(config.poll);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::clock::ManualClock;
    use crate::sensors::{ProximityScript, ScriptedProximity};

    fn config() -> HoldConfig {
        HoldConfig::new(1500, Duration::from_secs(2), Duration::from_millis(50))
    }

    fn run(sensor: &mut ScriptedProximity, config: &HoldConfig) -> (HoldOutcome, Duration, u32) {
        let clock = ManualClock::new();
        let mut ticks = 0u32;
        let mut tick = |_page: Page| ticks += 1;
        let outcome = wait_for_hold(
            sensor,
            &clock,
            config,
            Page::Sensors,
            &mut tick,
            &Shutdown::new(),
        );
        (outcome, clock.elapsed(), ticks)
    }

    #[test]
    fn constant_hold_satisfies_once_within_one_poll_of_required() {
        let cfg = config();
        let clock = ManualClock::new();
        let mut tracker = HoldTracker::new(&cfg);
        let mut satisfied_at = Vec::new();
        let mut previous = tracker.state();
        while clock.elapsed() <= Duration::from_millis(2500) {
            let state = tracker.observe(1600, clock.now());
            if matches!(state, HoldState::Satisfied { .. })
                && !matches!(previous, HoldState::Satisfied { .. })
            {
                satisfied_at.push(clock.elapsed());
            }
            previous = state;
            clock.sleep(cfg.poll);
        }
        assert_eq!(satisfied_at.len(), 1);
        assert!(satisfied_at[0] >= Duration::from_secs(2));
        assert!(satisfied_at[0] <= Duration::from_millis(2050));
    }

    #[test]
    fn wait_returns_at_required_hold() {
        let mut sensor = ScriptedProximity::constant(1600);
        let (outcome, elapsed, ticks) = run(&mut sensor, &config());
        assert_eq!(
            outcome,
            HoldOutcome::Satisfied {
                held: Duration::from_secs(2)
            }
        );
        assert!(elapsed >= Duration::from_secs(2) && elapsed <= Duration::from_millis(2050));
        assert_eq!(ticks as u64, sensor.reads());
    }

    #[test]
    fn drop_below_threshold_resets_progress() {
        let mut script = vec![ProximityScript::Value(1600); 30];
        script.push(ProximityScript::Value(100));
        script.push(ProximityScript::Value(1600));
        let mut sensor = ScriptedProximity::new(script);
        let (outcome, elapsed, _) = run(&mut sensor, &config());
        assert!(matches!(outcome, HoldOutcome::Satisfied { .. }));
        // Restarted at cycle 31 (1.55s), so 2s more are needed.
        assert_eq!(elapsed, Duration::from_millis(3550));
    }

    #[test]
    fn below_threshold_never_satisfies() {
        let cfg = config();
        let clock = ManualClock::new();
        let mut tracker = HoldTracker::new(&cfg);
        for _ in 0..200 {
            assert_eq!(tracker.observe(1499, clock.now()), HoldState::Idle);
            clock.sleep(cfg.poll);
        }
    }

    #[test]
    fn failed_reads_do_not_progress_or_reset() {
        let mut script = vec![ProximityScript::Value(1600); 10];
        script.extend(vec![ProximityScript::Fail; 5]);
        script.push(ProximityScript::Value(1600));
        let mut sensor = ScriptedProximity::new(script);
        let (outcome, elapsed, _) = run(&mut sensor, &config());
        assert_eq!(
            outcome,
            HoldOutcome::Satisfied {
                held: Duration::from_secs(2)
            }
        );
        assert_eq!(elapsed, Duration::from_secs(2));
    }

    #[test]
    fn sustained_failures_reset_the_hold() {
        let cfg = HoldConfig {
            max_sensor_failures: 3,
            ..config()
        };
        let clock = ManualClock::new();
        let mut tracker = HoldTracker::new(&cfg);
        tracker.observe(1600, clock.now());
        assert!(!tracker.sensor_failed());
        assert!(!tracker.sensor_failed());
        assert!(tracker.sensor_failed());
        assert_eq!(tracker.state(), HoldState::Idle);
    }

    #[test]
    fn failures_alone_never_satisfy() {
        let mut sensor = ScriptedProximity::new(vec![ProximityScript::Fail]);
        let clock = ManualClock::new();
        let shutdown = Shutdown::new();
        let cfg = config();
        let mut cycles = 0;
        let stop = shutdown.clone();
        let mut tick = |_page: Page| {
            cycles += 1;
            if cycles > 200 {
                stop.trigger();
            }
        };
        let outcome = wait_for_hold(&mut sensor, &clock, &cfg, Page::Camera, &mut tick, &shutdown);
        assert_eq!(outcome, HoldOutcome::Shutdown);
    }

    #[test]
    fn shutdown_stops_before_next_tick() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        let mut sensor = ScriptedProximity::constant(1600);
        let clock = ManualClock::new();
        let mut ticks = 0;
        let mut tick = |_page: Page| ticks += 1;
        let outcome = wait_for_hold(
            &mut sensor,
            &clock,
            &config(),
            Page::Camera,
            &mut tick,
            &shutdown,
        );
        assert_eq!(outcome, HoldOutcome::Shutdown);
        assert_eq!(ticks, 0);
        assert_eq!(sensor.reads(), 0);
    }
}
