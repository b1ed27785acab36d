//! Decode → detect → annotate → encode loop.
//!
//! One call processes one video, strictly sequentially. The verdict is an
//! explicit fold over the frame stream: `ProcessingResult::record` is the step
//! function and the first flagged frame latches `emergency_detected` for the
//! rest of the video.

use std::path::Path;

use serde::Serialize;

use crate::annotate::AnnotationPolicy;
use crate::detect::DetectorBackend;
use crate::error::PipelineError;
use crate::ingest::{self, FrameSink, FrameSource, MediaToolkit};

/// Outcome of processing one video.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ProcessingResult {
    frames_processed: u64,
    emergency_detected: bool,
}

impl ProcessingResult {
    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    pub fn emergency_detected(&self) -> bool {
        self.emergency_detected
    }

    /// Account for one more written frame.
    #[must_use]
    pub fn record(self, flagged: bool) -> Self {
        Self {
            frames_processed: self.frames_processed + 1,
            emergency_detected: self.emergency_detected || flagged,
        }
    }
}

/// Per-run detection knobs.
#[derive(Clone, Debug)]
pub struct DetectionSettings {
    pub confidence_threshold: f32,
    pub policy: AnnotationPolicy,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.25,
            policy: AnnotationPolicy::default(),
        }
    }
}

/// Run the loop over an already opened source and sink.
///
/// Every frame read is written exactly once, in read order. The sink is not
/// finished here.
pub fn process_frames(
    source: &mut dyn FrameSource,
    sink: &mut dyn FrameSink,
    detector: &mut dyn DetectorBackend,
    settings: &DetectionSettings,
) -> Result<ProcessingResult, PipelineError> {
    ingest::frames(source).try_fold(ProcessingResult::default(), |result, frame| {
        let mut frame = frame.map_err(PipelineError::Input)?;
        let index = frame.index();
        let detections = detector
            .detect(&frame, settings.confidence_threshold)
            .map_err(|cause| PipelineError::Detector {
                frame: index,
                cause,
            })?;
        let flagged = settings
            .policy
            .apply(&mut frame, &detections)
            .map_err(PipelineError::Output)?;
        if flagged {
            log::debug!("frame {}: emergency vehicle detected", index);
        }
        sink.write_frame(&frame).map_err(PipelineError::Output)?;
        Ok(result.record(flagged))
    })
}

/// Process `input` into a new annotated video at `output`.
///
/// The output is opened with the input's frame rate and dimensions. Source and
/// sink are released on every exit path; on success the sink is finished so
/// that encoder failures surface as `PipelineError::Output`.
pub fn process(
    toolkit: &dyn MediaToolkit,
    input: &Path,
    output: &Path,
    detector: &mut dyn DetectorBackend,
    settings: &DetectionSettings,
) -> Result<ProcessingResult, PipelineError> {
    let mut source = toolkit.open_source(input).map_err(PipelineError::Input)?;
    let info = source.info();
    log::info!(
        "processing {} ({}x{} @ {:.2} fps) with {} detector",
        input.display(),
        info.width,
        info.height,
        info.fps,
        detector.name()
    );
    let mut sink = toolkit
        .open_sink(output, &info)
        .map_err(PipelineError::Output)?;

    let result = process_frames(source.as_mut(), sink.as_mut(), detector, settings)?;
    sink.finish().map_err(PipelineError::Output)?;

    log::info!(
        "processed {} frames, emergency detected: {}",
        result.frames_processed(),
        result.emergency_detected()
    );
    Ok(result)
}
