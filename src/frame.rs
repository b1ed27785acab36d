//! Decoded frame container.
//!
//! - `Frame`: one RGB24 image plus its position in the input stream.
//! - `VideoInfo`: stream geometry and rate shared by a source and its sink.
//!
//! Frames live for exactly one iteration of the processing loop. They are never
//! written anywhere except the output sink.

use anyhow::{anyhow, Result};
use image::{ImageBuffer, Rgb};

/// Frame rate assumed when a container does not report a usable one.
pub const FALLBACK_FPS: f64 = 25.0;

/// Bytes per RGB24 pixel.
pub const RGB_CHANNELS: usize = 3;

/// Geometry and rate of a video stream.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

impl VideoInfo {
    pub fn new(width: u32, height: u32, fps: f64) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("video dimensions must be non-zero (got {width}x{height})"));
        }
        let fps = if fps.is_finite() && fps > 0.0 {
            fps
        } else {
            FALLBACK_FPS
        };
        Ok(Self { width, height, fps })
    }

    /// Size in bytes of one RGB24 frame.
    pub fn frame_len(&self) -> Result<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|v| v.checked_mul(RGB_CHANNELS))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))
    }
}

/// One decoded RGB24 frame.
///
/// Pixel data is row-major with no padding between rows.
#[derive(Clone)]
pub struct Frame {
    index: u64,
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Frame {
    pub fn new(index: u64, width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = VideoInfo::new(width, height, FALLBACK_FPS)?.frame_len()?;
        if data.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        Ok(Self {
            index,
            width,
            height,
            data,
        })
    }

    /// Zero-based position of this frame in the input stream.
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.data
    }

    /// Borrow the pixels as a mutable image for drawing.
    pub fn as_image_mut(&mut self) -> Result<ImageBuffer<Rgb<u8>, &mut [u8]>> {
        let (width, height) = (self.width, self.height);
        ImageBuffer::from_raw(width, height, self.data.as_mut_slice())
            .ok_or_else(|| anyhow!("frame buffer does not match {width}x{height}"))
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("index", &self.index)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}
