use thiserror::Error;

use crate::normalize::NormalizeError;

/// Failure of a detection job.
///
/// A failed job is never reported as a negative detection: callers get one of
/// these instead of a `ProcessingResult`.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The input could not be opened or decoded.
    #[error("input video unreadable: {0:#}")]
    Input(anyhow::Error),

    /// The output could not be created or written.
    #[error("output video unwritable: {0:#}")]
    Output(anyhow::Error),

    /// The detector rejected a frame. Aborts this video only.
    #[error("detector failed on frame {frame}: {cause:#}")]
    Detector { frame: u64, cause: anyhow::Error },

    /// The external re-encode step failed. The raw annotated file is retained.
    #[error("normalization failed: {0}")]
    Normalization(#[from] NormalizeError),
}

impl PipelineError {
    /// Stable short code used in API error bodies and logs.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Input(_) => "input_unreadable",
            PipelineError::Output(_) => "output_unwritable",
            PipelineError::Detector { .. } => "detector_failed",
            PipelineError::Normalization(_) => "normalization_failed",
        }
    }
}

/// Failure to serve a stored output.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("File not found")]
    NotFound,

    #[error("Requested range not satisfiable")]
    RangeNotSatisfiable { size: u64 },

    #[error("failed to read stored video: {0}")]
    Io(#[from] std::io::Error),
}
