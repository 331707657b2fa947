//! Object detection: backend trait, backends, the shared detections cache and
//! cross-resolution box rescaling.

mod backend;
mod backends;
mod cache;
mod registry;
mod rescale;
mod result;

pub use backend::Detector;
pub use backends::{ColorTargetDetector, StubDetector};
pub use cache::{CacheEntry, DetectionsCache};
pub use registry::{build_detector, DetectorKind};
pub use rescale::rescale;
pub use result::{BoundingBox, Detection, DetectionSet};
