use std::collections::VecDeque;

use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Stub backend for testing and dry runs.
///
/// With no script it reports nothing. A scripted stub replays one detection
/// list per `detect` call, then reports nothing once the script runs out.
/// The threshold is honored, so scripts can include sub-threshold entries.
#[derive(Default)]
pub struct StubBackend {
    script: VecDeque<Vec<Detection>>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted(script: Vec<Vec<Detection>>) -> Self {
        Self {
            script: script.into(),
        }
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _frame: &Frame, confidence_threshold: f32) -> Result<Vec<Detection>> {
        let detections = self.script.pop_front().unwrap_or_default();
        Ok(detections
            .into_iter()
            .filter(|d| d.confidence >= confidence_threshold)
            .collect())
    }
}
