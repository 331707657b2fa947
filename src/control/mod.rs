//! Controller loop: proximity holds, page cycling and the per-tick work.

pub mod clock;
pub mod cycle;
pub mod hold;
pub mod pages;
pub mod tick;

pub use clock::{Clock, ManualClock, SystemClock};
pub use cycle::PageCycle;
pub use hold::{
    wait_for_hold, HoldConfig, HoldOutcome, HoldState, HoldTracker, TickHandler,
    DEFAULT_MAX_SENSOR_FAILURES,
};
pub use pages::{Page, PageSequence};
pub use tick::{ControllerTick, StepOutcome, TickReport};
