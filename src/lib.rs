//! Siren Watch
//!
//! Flags emergency vehicles in uploaded video and serves the annotated result
//! back to browsers.
//!
//! # Architecture
//!
//! A detection job runs one upload through a fixed sequence:
//!
//! 1. **Process**: decode frame by frame, run the detector, draw emergency
//!    detections, encode into an intermediate file. The verdict is sticky: one
//!    flagged frame marks the whole video.
//! 2. **Normalize**: re-encode the intermediate into a fast-start H.264 MP4.
//! 3. **Publish**: move the normalized file under its public name, where the
//!    range responder serves it to any number of concurrent readers.
//!
//! # Module Structure
//!
//! - `frame`: RGB24 frames and stream geometry
//! - `ingest`: frame sources and sinks (ffmpeg pipes, raw RGB24 files)
//! - `detect`: detector backend trait, registry, stub and tract backends
//! - `annotate`: emergency class filter and box drawing
//! - `pipeline`: the decode → detect → annotate → encode loop
//! - `normalize`: external re-encode step
//! - `storage`: upload/output layout, identifiers, retention
//! - `job`: one upload end to end
//! - `range`: `Range` header resolution
//! - `api`: actix-web HTTP surface
//! - `config`: JSON file + environment configuration

pub mod annotate;
pub mod api;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod job;
pub mod normalize;
pub mod pipeline;
pub mod range;
pub mod storage;

pub use annotate::{AnnotationPolicy, EmergencyClasses};
pub use detect::{BackendRegistry, BoundingBox, Detection, DetectorBackend, StubBackend};
pub use error::{PipelineError, ServeError};
pub use frame::{Frame, VideoInfo};
pub use ingest::{FfmpegToolkit, FrameSink, FrameSource, MediaToolkit, RawVideoToolkit};
pub use job::{DetectionJob, JobOutcome};
pub use normalize::{FfmpegNormalizer, NormalizeError, Normalizer};
pub use pipeline::{process, DetectionSettings, ProcessingResult};
pub use range::{parse_range, ByteRange};
pub use storage::{RetentionPolicy, VideoId, VideoStore};
