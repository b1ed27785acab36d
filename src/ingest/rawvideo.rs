//! Headerless RGB24 frame files.
//!
//! The layout matches ffmpeg's `-f rawvideo -pix_fmt rgb24`: frames are packed
//! back to back with no container. Geometry and rate are not stored in the file,
//! so the toolkit carries them.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use super::{FrameSink, FrameSource, MediaToolkit};
use crate::frame::{Frame, VideoInfo};

/// Toolkit for raw RGB24 files of a fixed geometry.
#[derive(Clone, Copy, Debug)]
pub struct RawVideoToolkit {
    info: VideoInfo,
}

impl RawVideoToolkit {
    pub fn new(info: VideoInfo) -> Self {
        Self { info }
    }
}

impl MediaToolkit for RawVideoToolkit {
    fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(RawVideoSource::open(path, self.info)?))
    }

    fn open_sink(&self, path: &Path, info: &VideoInfo) -> Result<Box<dyn FrameSink>> {
        Ok(Box::new(RawVideoSink::create(path, *info)?))
    }
}

pub struct RawVideoSource {
    path: PathBuf,
    reader: BufReader<File>,
    info: VideoInfo,
    frame_len: usize,
    frame_count: u64,
}

impl RawVideoSource {
    pub fn open(path: &Path, info: VideoInfo) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open raw video {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            info,
            frame_len: info.frame_len()?,
            frame_count: 0,
        })
    }
}

impl FrameSource for RawVideoSource {
    fn info(&self) -> VideoInfo {
        self.info
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let mut buffer = vec![0u8; self.frame_len];
        let mut filled = 0;
        while filled < self.frame_len {
            match self.reader.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("failed to read {}", self.path.display()))
                }
            }
        }
        if filled == 0 {
            return Ok(None);
        }
        if filled < self.frame_len {
            return Err(anyhow!(
                "{} ends with a truncated frame ({} of {} bytes)",
                self.path.display(),
                filled,
                self.frame_len
            ));
        }

        let frame = Frame::new(self.frame_count, self.info.width, self.info.height, buffer)?;
        self.frame_count += 1;
        Ok(Some(frame))
    }
}

pub struct RawVideoSink {
    path: PathBuf,
    writer: BufWriter<File>,
    info: VideoInfo,
}

impl RawVideoSink {
    /// Create a new output file. Fails if the path already exists.
    pub fn create(path: &Path, info: VideoInfo) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .with_context(|| format!("failed to create raw video {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            info,
        })
    }
}

impl FrameSink for RawVideoSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if frame.width() != self.info.width || frame.height() != self.info.height {
            return Err(anyhow!(
                "frame {}x{} does not match sink {}x{}",
                frame.width(),
                frame.height(),
                self.info.width,
                self.info.height
            ));
        }
        self.writer
            .write_all(frame.pixels())
            .with_context(|| format!("failed to write {}", self.path.display()))
    }

    fn finish(&mut self) -> Result<()> {
        self.writer
            .flush()
            .with_context(|| format!("failed to flush {}", self.path.display()))?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }
}
