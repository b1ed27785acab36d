//! One detection job: stored upload in, published video out.
//!
//! ```text
//! input_<id>.mp4 --process--> processed_raw_<id>.mp4
//!                --normalize--> processed_<id>.part.mp4
//!                --publish--> processed_<id>.mp4
//! ```
//!
//! File fate on each exit path:
//! - success: intermediates removed unless the retention policy keeps them
//! - processing failure: partial raw output removed, upload kept
//! - normalization failure: raw output and upload kept for inspection

use std::path::PathBuf;
use std::sync::Arc;

use crate::detect::DetectorBackend;
use crate::error::PipelineError;
use crate::ingest::MediaToolkit;
use crate::normalize::Normalizer;
use crate::pipeline::{self, DetectionSettings, ProcessingResult};
use crate::storage::{VideoId, VideoStore};

/// Result of a successful job.
#[derive(Clone, Debug)]
pub struct JobOutcome {
    pub id: VideoId,
    /// Public name under which the normalized video is served.
    pub output_name: String,
    pub output_path: PathBuf,
    pub result: ProcessingResult,
}

/// Everything a job needs besides its detector.
#[derive(Clone)]
pub struct DetectionJob {
    store: VideoStore,
    toolkit: Arc<dyn MediaToolkit>,
    normalizer: Arc<dyn Normalizer>,
    settings: DetectionSettings,
}

impl DetectionJob {
    pub fn new(
        store: VideoStore,
        toolkit: Arc<dyn MediaToolkit>,
        normalizer: Arc<dyn Normalizer>,
        settings: DetectionSettings,
    ) -> Self {
        Self {
            store,
            toolkit,
            normalizer,
            settings,
        }
    }

    pub fn store(&self) -> &VideoStore {
        &self.store
    }

    pub fn settings(&self) -> &DetectionSettings {
        &self.settings
    }

    /// Run the job for an upload already stored under `id`.
    pub fn run(
        &self,
        id: VideoId,
        detector: &mut dyn DetectorBackend,
    ) -> Result<JobOutcome, PipelineError> {
        let input = self.store.upload_path(id);
        let raw = self.store.raw_output_path(id);

        let result = match pipeline::process(
            self.toolkit.as_ref(),
            &input,
            &raw,
            detector,
            &self.settings,
        ) {
            Ok(result) => result,
            Err(err) => {
                log::warn!("job {} failed during processing: {}", id, err);
                self.store.discard_partial(id);
                return Err(err);
            }
        };

        let staging = self.store.staging_output_path(id);
        if let Err(err) = self.normalizer.normalize(&raw, &staging) {
            log::error!(
                "job {} failed during normalization; keeping {}: {}",
                id,
                raw.display(),
                err
            );
            self.store.discard_staging(id);
            return Err(err.into());
        }

        let output_path = self.store.publish(id).map_err(|err| {
            self.store.discard_staging(id);
            PipelineError::Output(err)
        })?;
        self.store.apply_retention(id);

        let output_name = VideoStore::output_file_name(id);
        log::info!(
            "job {} published {} ({} frames, emergency detected: {})",
            id,
            output_name,
            result.frames_processed(),
            result.emergency_detected()
        );
        Ok(JobOutcome {
            id,
            output_name,
            output_path,
            result,
        })
    }
}
