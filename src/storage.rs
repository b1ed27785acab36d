//! On-disk layout of uploads and processed videos.
//!
//! ```text
//! <upload_dir>/input_<id>.mp4             raw upload
//! <output_dir>/processed_raw_<id>.mp4     annotated, before normalization
//! <output_dir>/processed_<id>.part.mp4    normalizer staging file
//! <output_dir>/processed_<id>.mp4         published, served to clients
//! ```
//!
//! Every file is created once and never rewritten. A published file only
//! appears under its public name after it has been fully written, so readers
//! never observe a partial video.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

use anyhow::{anyhow, Context, Result};
use rand::RngCore;
use regex::Regex;

fn is_output_name(name: &str) -> bool {
    static OUTPUT_NAME_RE: OnceLock<Regex> = OnceLock::new();
    let re = OUTPUT_NAME_RE
        .get_or_init(|| Regex::new(r"^processed_[0-9a-f]{32}\.mp4$").expect("valid pattern"));
    re.is_match(name)
}

/// Random 128-bit identifier of one upload and everything derived from it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VideoId([u8; 16]);

impl VideoId {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for VideoId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != 32 || s.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(anyhow!("video id must be 32 lowercase hex characters"));
        }
        let decoded = hex::decode(s).map_err(|e| anyhow!("invalid video id: {e}"))?;
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&decoded);
        Ok(Self(bytes))
    }
}

/// Which intermediate files survive a successful job.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub keep_uploads: bool,
    pub keep_intermediates: bool,
}

#[derive(Clone, Debug)]
pub struct VideoStore {
    upload_dir: PathBuf,
    output_dir: PathBuf,
    retention: RetentionPolicy,
}

impl VideoStore {
    /// Open the store, creating both directories if needed.
    pub fn open(
        upload_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        retention: RetentionPolicy,
    ) -> Result<Self> {
        let upload_dir = upload_dir.into();
        let output_dir = output_dir.into();
        for dir in [&upload_dir, &output_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(Self {
            upload_dir,
            output_dir,
            retention,
        })
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    pub fn upload_path(&self, id: VideoId) -> PathBuf {
        self.upload_dir.join(format!("input_{id}.mp4"))
    }

    pub fn raw_output_path(&self, id: VideoId) -> PathBuf {
        self.output_dir.join(format!("processed_raw_{id}.mp4"))
    }

    pub fn staging_output_path(&self, id: VideoId) -> PathBuf {
        self.output_dir.join(format!("processed_{id}.part.mp4"))
    }

    pub fn output_path(&self, id: VideoId) -> PathBuf {
        self.output_dir.join(Self::output_file_name(id))
    }

    /// Public name of a published video.
    pub fn output_file_name(id: VideoId) -> String {
        format!("processed_{id}.mp4")
    }

    /// Create the upload file for `id`. Fails if it already exists.
    pub fn create_upload(&self, id: VideoId) -> Result<File> {
        let path = self.upload_path(id);
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| format!("failed to create upload {}", path.display()))
    }

    /// Map a public output name to an existing published file.
    ///
    /// Names that are not of the form `processed_<32 hex>.mp4` never resolve,
    /// which keeps staging and raw files private and rules out path traversal.
    pub fn resolve_output(&self, name: &str) -> Option<PathBuf> {
        if !is_output_name(name) {
            return None;
        }
        let path = self.output_dir.join(name);
        path.is_file().then_some(path)
    }

    /// Move the staging file into its public name.
    pub fn publish(&self, id: VideoId) -> Result<PathBuf> {
        let staging = self.staging_output_path(id);
        let output = self.output_path(id);
        if output.exists() {
            return Err(anyhow!("{} is already published", output.display()));
        }
        std::fs::rename(&staging, &output).with_context(|| {
            format!(
                "failed to publish {} as {}",
                staging.display(),
                output.display()
            )
        })?;
        Ok(output)
    }

    /// Delete the intermediates of a successful job, as the policy allows.
    pub fn apply_retention(&self, id: VideoId) {
        if !self.retention.keep_uploads {
            remove_quietly(&self.upload_path(id));
        }
        if !self.retention.keep_intermediates {
            remove_quietly(&self.raw_output_path(id));
        }
    }

    /// Remove what a failed processing loop left behind. The upload is kept.
    pub fn discard_partial(&self, id: VideoId) {
        remove_quietly(&self.raw_output_path(id));
        remove_quietly(&self.staging_output_path(id));
    }

    /// Remove a staging file left by a failed normalization.
    pub fn discard_staging(&self, id: VideoId) {
        remove_quietly(&self.staging_output_path(id));
    }

    /// Remove an upload that never made it to processing.
    pub fn discard_upload(&self, id: VideoId) {
        remove_quietly(&self.upload_path(id));
    }
}

fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => log::debug!("removed {}", path.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => log::warn!("failed to remove {}: {}", path.display(), e),
    }
}
