//! Frame sources and sinks.
//!
//! This module provides the two ends of the processing loop:
//! - `FrameSource`: sequential decoded-frame reads from a local video file
//! - `FrameSink`: sequential frame writes into a new local video file
//!
//! A `MediaToolkit` opens both ends for a given container backend:
//! - `FfmpegToolkit`: any container ffmpeg understands, via `ffprobe` + `ffmpeg` pipes
//! - `RawVideoToolkit`: headerless RGB24 frame files with externally known geometry
//!
//! Sources and sinks own their underlying handles and release them on drop,
//! including when the processing loop bails out early.

mod ffmpeg;
mod rawvideo;

use std::path::Path;

use anyhow::Result;

use crate::frame::{Frame, VideoInfo};

pub(crate) use ffmpeg::collect_diagnostics;
pub use ffmpeg::{FfmpegSink, FfmpegSource, FfmpegToolkit};
pub use rawvideo::{RawVideoSink, RawVideoSource, RawVideoToolkit};

/// Sequential frame reader.
pub trait FrameSource: Send {
    /// Geometry and rate of the stream being read.
    fn info(&self) -> VideoInfo;

    /// Next frame in input order, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

/// Sequential frame writer.
pub trait FrameSink: Send {
    /// Append one frame. Frames must arrive in output order.
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Flush and close the output. After this returns `Ok` the file is complete.
    fn finish(&mut self) -> Result<()>;
}

/// Opens sources and sinks for one container backend.
pub trait MediaToolkit: Send + Sync {
    fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>>;

    /// Create a new output configured with the source's rate and dimensions.
    fn open_sink(&self, path: &Path, info: &VideoInfo) -> Result<Box<dyn FrameSink>>;
}

/// Adapt a source into an iterator of frames.
///
/// Iteration stops after the first error.
pub fn frames(source: &mut dyn FrameSource) -> impl Iterator<Item = Result<Frame>> + '_ {
    let mut failed = false;
    std::iter::from_fn(move || {
        if failed {
            return None;
        }
        let next = source.next_frame().transpose();
        if matches!(next, Some(Err(_))) {
            failed = true;
        }
        next
    })
}
