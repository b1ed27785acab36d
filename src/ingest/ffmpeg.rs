//! Local video files through the ffmpeg command-line tools.
//!
//! - `ffprobe` reports the first video stream's rate and coded geometry.
//! - A decoding `ffmpeg` child emits RGB24 frames on stdout; `ffmpeg-sidecar`
//!   splits them into `OutputVideoFrame` events.
//! - An encoding `ffmpeg` child reads packed RGB24 frames from its stdin and
//!   writes an MPEG-4 Part 2 file (the intermediate, pre-normalization output).
//!
//! The decoder runs with `-fps_mode passthrough`: every decoded frame is
//! emitted exactly once, whatever the container timing. Display rotation is
//! applied, so the first decoded frame's geometry wins over the stream's.
//!
//! Children are killed and reaped when their source or sink is dropped.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ChildStdin;
use std::thread::JoinHandle;

use anyhow::{anyhow, Context, Result};
use ffmpeg_sidecar::child::FfmpegChild;
use ffmpeg_sidecar::command::FfmpegCommand;
use ffmpeg_sidecar::event::{FfmpegEvent, LogLevel, OutputVideoFrame};
use ffmpeg_sidecar::iter::FfmpegIterator;
use ffprobe::{FfProbe, FfProbeError};

use super::{FrameSink, FrameSource, MediaToolkit};
use crate::frame::{Frame, VideoInfo};

/// Opens sources and sinks backed by `ffmpeg` / `ffprobe` binaries.
#[derive(Clone, Debug)]
pub struct FfmpegToolkit {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegToolkit {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// Read coded geometry and rate of the first video stream.
    pub fn inspect(&self, path: &Path) -> Result<VideoInfo> {
        log::debug!("running ffprobe on {}", path.display());
        let config = ffprobe::Config::builder()
            .ffprobe_bin(self.ffprobe.clone())
            .build();
        let metadata = ffprobe::ffprobe_config(config, path)
            .map_err(|err| describe_ffprobe_error(err, path))?;
        video_info(&metadata)
            .with_context(|| format!("ffprobe output for {} was not usable", path.display()))
    }
}

impl Default for FfmpegToolkit {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl MediaToolkit for FfmpegToolkit {
    fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
        let info = self.inspect(path)?;
        Ok(Box::new(FfmpegSource::spawn(&self.ffmpeg, path, info)?))
    }

    fn open_sink(&self, path: &Path, info: &VideoInfo) -> Result<Box<dyn FrameSink>> {
        Ok(Box::new(FfmpegSink::spawn(&self.ffmpeg, path, *info)?))
    }
}

fn describe_ffprobe_error(err: FfProbeError, path: &Path) -> anyhow::Error {
    match err {
        FfProbeError::Io(io_err) => anyhow!("failed to run ffprobe: {io_err}"),
        FfProbeError::Status(output) => anyhow!(
            "ffprobe could not read {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        ),
        FfProbeError::Deserialize(err) => {
            anyhow!("ffprobe output for {} did not parse: {err}", path.display())
        }
        other => anyhow!("ffprobe failed on {}: {other:?}", path.display()),
    }
}

fn video_info(metadata: &FfProbe) -> Result<VideoInfo> {
    let stream = metadata
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| anyhow!("file has no video track"))?;
    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) => (
            u32::try_from(w).context("invalid video width")?,
            u32::try_from(h).context("invalid video height")?,
        ),
        _ => return Err(anyhow!("video track has no dimensions")),
    };
    let fps = parse_rate(&stream.avg_frame_rate)
        .or_else(|| parse_rate(&stream.r_frame_rate))
        .unwrap_or(0.0);
    VideoInfo::new(width, height, fps)
}

/// Parse an ffprobe rational such as `30000/1001`. `0/0` yields `None`.
fn parse_rate(value: &str) -> Option<f64> {
    let rate = match value.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => value.trim().parse().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

/// Geometry the sink must use: the decoded frames', which include rotation.
fn displayed_info(coded: VideoInfo, first_frame: Option<(u32, u32)>) -> Result<VideoInfo> {
    match first_frame {
        Some((width, height)) if (width, height) != (coded.width, coded.height) => {
            log::debug!(
                "decoded frames are {}x{} (coded {}x{})",
                width,
                height,
                coded.width,
                coded.height
            );
            VideoInfo::new(width, height, coded.fps)
        }
        _ => Ok(coded),
    }
}

/// Text worth keeping from an event for an error report.
pub(crate) fn diagnostic_line(event: &FfmpegEvent) -> Option<&str> {
    let line = match event {
        FfmpegEvent::Error(message) => message,
        FfmpegEvent::Log(LogLevel::Error | LogLevel::Fatal | LogLevel::Unknown, message) => message,
        _ => return None,
    };
    let line = line.trim();
    (!line.is_empty()).then_some(line)
}

/// Consume events until ffmpeg closes its output, keeping the diagnostics.
pub(crate) fn collect_diagnostics(events: impl Iterator<Item = FfmpegEvent>) -> String {
    let mut lines: Vec<String> = Vec::new();
    for event in events {
        if let Some(line) = diagnostic_line(&event) {
            lines.push(line.to_string());
        }
    }
    lines.join("\n")
}

fn reap(child: &mut FfmpegChild) {
    let _ = child.kill();
    let _ = child.wait();
}

fn decode_command(ffmpeg: &Path, path: &Path) -> FfmpegCommand {
    let mut cmd = FfmpegCommand::new_with_path(ffmpeg);
    cmd.arg("-nostdin")
        .input(path.to_string_lossy().as_ref())
        .args(["-map", "0:v:0", "-an", "-sn"])
        .args(["-fps_mode", "passthrough"])
        .rawvideo();
    cmd
}

fn encode_command(ffmpeg: &Path, path: &Path, info: &VideoInfo) -> FfmpegCommand {
    let mut cmd = FfmpegCommand::new_with_path(ffmpeg);
    cmd.arg("-n")
        .args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
        .args(["-s", &format!("{}x{}", info.width, info.height)])
        .args(["-r", &info.fps.to_string()])
        .input("-")
        .args(["-an", "-c:v", "mpeg4", "-q:v", "3", "-pix_fmt", "yuv420p"])
        .output(path.to_string_lossy().as_ref());
    cmd
}

/// Decoding `ffmpeg` child producing RGB24 frames.
pub struct FfmpegSource {
    path: PathBuf,
    child: FfmpegChild,
    events: FfmpegIterator,
    pending: Option<OutputVideoFrame>,
    diagnostics: Vec<String>,
    info: VideoInfo,
    frame_count: u64,
    finished: bool,
}

impl FfmpegSource {
    pub fn spawn(ffmpeg: &Path, path: &Path, coded: VideoInfo) -> Result<Self> {
        let mut cmd = decode_command(ffmpeg, path);
        log::debug!("running decoder: {:?}", cmd);
        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to launch {}", ffmpeg.display()))?;
        let events = match child.iter() {
            Ok(events) => events,
            Err(err) => {
                reap(&mut child);
                return Err(anyhow!("failed to read ffmpeg output: {err}"));
            }
        };

        let mut source = Self {
            path: path.to_path_buf(),
            child,
            events,
            pending: None,
            diagnostics: Vec::new(),
            info: coded,
            frame_count: 0,
            finished: false,
        };
        source.pending = source.next_decoded();
        let first = source.pending.as_ref().map(|f| (f.width, f.height));
        source.info = displayed_info(coded, first)?;
        log::debug!(
            "decoding {} ({}x{} @ {:.3} fps)",
            path.display(),
            source.info.width,
            source.info.height,
            source.info.fps
        );
        Ok(source)
    }

    /// Next frame event, recording diagnostics on the way.
    fn next_decoded(&mut self) -> Option<OutputVideoFrame> {
        for event in self.events.by_ref() {
            if let FfmpegEvent::OutputFrame(frame) = event {
                return Some(frame);
            }
            if let Some(line) = diagnostic_line(&event) {
                self.diagnostics.push(line.to_string());
            }
        }
        None
    }

    fn end_of_stream(&mut self) -> Result<()> {
        self.finished = true;
        let status = self.child.wait()?;
        if !status.success() {
            return Err(anyhow!(
                "ffmpeg failed to decode {} ({}): {}",
                self.path.display(),
                status,
                self.diagnostics.join("\n")
            ));
        }
        Ok(())
    }
}

impl FrameSource for FfmpegSource {
    fn info(&self) -> VideoInfo {
        self.info
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.finished {
            return Ok(None);
        }
        let decoded = match self.pending.take().or_else(|| self.next_decoded()) {
            Some(decoded) => decoded,
            None => {
                self.end_of_stream()?;
                return Ok(None);
            }
        };
        if (decoded.width, decoded.height) != (self.info.width, self.info.height) {
            return Err(anyhow!(
                "frame {} changed size to {}x{} (stream is {}x{})",
                self.frame_count,
                decoded.width,
                decoded.height,
                self.info.width,
                self.info.height
            ));
        }

        let frame = Frame::new(self.frame_count, decoded.width, decoded.height, decoded.data)?;
        self.frame_count += 1;
        Ok(Some(frame))
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        if !self.finished {
            reap(&mut self.child);
        }
    }
}

/// Encoding `ffmpeg` child consuming RGB24 frames.
pub struct FfmpegSink {
    path: PathBuf,
    child: Option<FfmpegChild>,
    stdin: Option<ChildStdin>,
    diagnostics: Option<JoinHandle<String>>,
    info: VideoInfo,
}

impl FfmpegSink {
    pub fn spawn(ffmpeg: &Path, path: &Path, info: VideoInfo) -> Result<Self> {
        let mut cmd = encode_command(ffmpeg, path, &info);
        log::debug!("running encoder: {:?}", cmd);
        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to launch {}", ffmpeg.display()))?;
        let Some(stdin) = child.take_stdin() else {
            reap(&mut child);
            return Err(anyhow!("failed to capture ffmpeg stdin"));
        };
        // The encoder logs while it reads; its events are drained off-thread so
        // writes to stdin never wait on a full stderr pipe.
        let events = match child.iter() {
            Ok(events) => events,
            Err(err) => {
                reap(&mut child);
                return Err(anyhow!("failed to read ffmpeg output: {err}"));
            }
        };
        let diagnostics = std::thread::spawn(move || collect_diagnostics(events));
        Ok(Self {
            path: path.to_path_buf(),
            child: Some(child),
            stdin: Some(stdin),
            diagnostics: Some(diagnostics),
            info,
        })
    }
}

impl FrameSink for FfmpegSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if frame.width() != self.info.width || frame.height() != self.info.height {
            return Err(anyhow!(
                "frame {}x{} does not match encoder {}x{}",
                frame.width(),
                frame.height(),
                self.info.width,
                self.info.height
            ));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow!("encoder for {} already finished", self.path.display()))?;
        stdin.write_all(frame.pixels()).with_context(|| {
            format!(
                "ffmpeg encoder for {} stopped accepting frames",
                self.path.display()
            )
        })
    }

    fn finish(&mut self) -> Result<()> {
        // Closing stdin signals end of input.
        drop(self.stdin.take());
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let diagnostic = self
            .diagnostics
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();
        let status = child.wait()?;
        if !status.success() {
            return Err(anyhow!(
                "ffmpeg failed to encode {} ({}): {}",
                self.path.display(),
                status,
                diagnostic
            ));
        }
        Ok(())
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            reap(&mut child);
        }
    }
}
