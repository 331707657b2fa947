use anyhow::Result;

use crate::detect::result::DetectionSet;
use crate::frame::Frame;

/// Detector backend trait.
///
/// From the controller's point of view a detector is an opaque function from a
/// frame to a detection set. Implementations own whatever model state they
/// need; errors are returned, never panicked, so the composer can fail open.
pub trait Detector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame. Returned boxes are in the frame's pixel space.
    fn detect(&mut self, frame: &Frame) -> Result<DetectionSet>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
