use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Detector backend trait.
///
/// A backend wraps an opaque classifier. The processing loop hands it one frame
/// at a time, in input order, and consumes whatever detections come back.
///
/// Implementations:
/// - apply `confidence_threshold` themselves (inclusive: a score equal to the
///   threshold passes)
/// - must not retain the frame beyond the `detect` call
/// - may keep internal state across calls; one instance serves one video
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
