//! `Range` header resolution for stored videos.
//!
//! Only a single `bytes=<start>-<end>` window is supported. An omitted start
//! means offset 0 and an omitted end means the last byte; suffix ranges in the
//! RFC 9110 sense are not recognised. The resolved window must lie entirely
//! inside the file.

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

fn range_re() -> &'static Regex {
    static RANGE_RE: OnceLock<Regex> = OnceLock::new();
    RANGE_RE.get_or_init(|| Regex::new(r"^bytes=(\d*)-(\d*)$").expect("valid pattern"))
}

/// Inclusive byte window `[start, end]` of a file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes in the window. Never zero.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Value of the `Content-Range` header for this window.
    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, size)
    }
}

/// `Content-Range` value sent with a 416 response.
pub fn unsatisfied_content_range(size: u64) -> String {
    format!("bytes */{size}")
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RangeError {
    #[error("malformed range header {0:?}")]
    Malformed(String),

    #[error("range {start}-{end} outside of {size} byte file")]
    Unsatisfiable { start: u64, end: u64, size: u64 },
}

/// Resolve a `Range` header value against a file of `size` bytes.
pub fn parse_range(header: &str, size: u64) -> Result<ByteRange, RangeError> {
    let malformed = || RangeError::Malformed(header.to_string());
    let caps = range_re().captures(header.trim()).ok_or_else(malformed)?;
    let (start, end) = (&caps[1], &caps[2]);
    if start.is_empty() && end.is_empty() {
        return Err(malformed());
    }

    let start: u64 = if start.is_empty() {
        0
    } else {
        start.parse().map_err(|_| malformed())?
    };
    let end: u64 = if end.is_empty() {
        size.saturating_sub(1)
    } else {
        end.parse().map_err(|_| malformed())?
    };

    if start > end || start >= size || end >= size {
        return Err(RangeError::Unsatisfiable { start, end, size });
    }
    Ok(ByteRange { start, end })
}
