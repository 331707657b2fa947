//! Onboard payload controller.
//!
//! Runs on the payload computer of a small vehicle and ties together:
//!
//! - a dual-stream camera (small preview + full-size video) polled without blocking
//! - object detection on one stream, shared with the other through a
//!   timestamped cache and rescaled to its resolution
//! - overlay composition into a latest-frame store per stream
//! - a proximity-gated page cycle on a small onboard display
//! - environment telemetry posted to a ground backend and served locally
//!
//! # Module Structure
//!
//! - `frame`: Frame type and the latest-frame store
//! - `detect`: Detector trait, backends, detections cache, box rescaling
//! - `overlay`: Box and label drawing
//! - `compose`: Per-stream composer (detect or reuse, draw, publish)
//! - `ingest`: Camera, capture devices, acquisition workers
//! - `sensors`: Proximity and environment sensors, derived values
//! - `control`: Hold state machine, page cycle, controller tick
//! - `display`: Panel sinks and page rendering
//! - `transport`: Telemetry client
//! - `api`: Local live HTTP API
//! - `config`: File + env configuration

pub mod api;
pub mod compose;
pub mod config;
pub mod control;
pub mod detect;
pub mod display;
pub mod frame;
pub mod ingest;
pub mod overlay;
pub mod sensors;
pub mod shutdown;
pub mod transport;

pub use compose::{ComposeOutcome, ComposerConfig, ComposerStats, FrameComposer};
pub use config::ControllerConfig;
pub use detect::{BoundingBox, Detection, DetectionSet, DetectionsCache, Detector};
pub use frame::{Frame, FrameShape, FrameStore};
pub use shutdown::Shutdown;
