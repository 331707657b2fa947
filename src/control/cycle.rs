use std::sync::Arc;

use super::clock::Clock;
use super::hold::{wait_for_hold, HoldConfig, HoldOutcome, TickHandler};
use super::pages::{Page, PageSequence};
use crate::sensors::ProximitySensor;
use crate::shutdown::Shutdown;

/// Drives the display through its pages with proximity holds.
///
/// The locked page (index 0) stays up until a long unlock hold. After that a
/// short hold on each page advances to the next one, wrapping back to index 1.
pub struct PageCycle {
    pages: PageSequence,
    unlock: HoldConfig,
    step: HoldConfig,
    sensor: Box<dyn ProximitySensor>,
    clock: Arc<dyn Clock>,
    shutdown: Shutdown,
    index: usize,
}

impl PageCycle {
    pub fn new(
        pages: PageSequence,
        unlock: HoldConfig,
        step: HoldConfig,
        sensor: Box<dyn ProximitySensor>,
        clock: Arc<dyn Clock>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            pages,
            unlock,
            step,
            sensor,
            clock,
            shutdown,
            index: 0,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn current_page(&self) -> Page {
        if self.index == 0 {
            self.pages.locked()
        } else {
            self.pages.get(self.index)
        }
    }

    /// Hold on the locked page until the unlock hold is satisfied.
    pub fn unlock(&mut self, tick: &mut dyn TickHandler) -> HoldOutcome {
        let page = self.pages.locked();
        log::info!("locked to {} page; hold to unlock", page);
        let outcome = wait_for_hold(
            self.sensor.as_mut(),
            self.clock.as_ref(),
            &self.unlock,
            page,
            tick,
            &self.shutdown,
        );
        if let HoldOutcome::Satisfied { .. } = outcome {
            log::info!("unlock satisfied; starting page cycle");
            self.index = 1;
        }
        outcome
    }

    /// Show the current page until a step hold, then advance by one.
    pub fn step(&mut self, tick: &mut dyn TickHandler) -> HoldOutcome {
        self.index = self.pages.normalize(self.index);
        let page = self.pages.get(self.index);
        log::info!("page {} ({})", self.index, page);
        let outcome = wait_for_hold(
            self.sensor.as_mut(),
            self.clock.as_ref(),
            &self.step,
            page,
            tick,
            &self.shutdown,
        );
        if let HoldOutcome::Satisfied { .. } = outcome {
            self.index += 1;
        }
        outcome
    }

    /// Unlock, then cycle pages until shutdown.
    pub fn run(&mut self, tick: &mut dyn TickHandler) {
        if self.unlock(tick) == HoldOutcome::Shutdown {
            return;
        }
        while self.step(tick) != HoldOutcome::Shutdown {}
        log::info!("page cycle stopped");
    }
}
