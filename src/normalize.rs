//! Browser-safe re-encode of the annotated video.
//!
//! The re-encode itself is an external collaborator. `Normalizer` is the
//! capability the job depends on; `FfmpegNormalizer` runs the fixed ffmpeg
//! template:
//!
//! ```text
//! ffmpeg -y -i <input> -c:v libx264 -pix_fmt yuv420p -preset fast -crf 23 \
//!        -movflags +faststart <output>
//! ```
//!
//! `+faststart` relocates the moov atom to the head of the file so playback can
//! begin before the download completes.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use ffmpeg_sidecar::command::FfmpegCommand;
use thiserror::Error;

use crate::ingest::collect_diagnostics;

/// Default upper bound on one normalization run.
pub const DEFAULT_NORMALIZE_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("failed to launch {program}: {cause}")]
    Spawn {
        program: String,
        cause: std::io::Error,
    },

    #[error("{program} exited with {status}: {diagnostic}")]
    Failed {
        program: String,
        status: String,
        diagnostic: String,
    },

    #[error("{program} timed out after {}s", .timeout.as_secs())]
    TimedOut { program: String, timeout: Duration },

    #[error("{program} reported success but {} was not written", .output.display())]
    MissingOutput { program: String, output: PathBuf },

    #[error("failed to wait for {program}: {cause}")]
    Wait {
        program: String,
        cause: std::io::Error,
    },
}

impl NormalizeError {
    /// Captured diagnostic text, if the process produced any.
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            NormalizeError::Failed { diagnostic, .. } if !diagnostic.is_empty() => {
                Some(diagnostic)
            }
            _ => None,
        }
    }
}

/// Converts an intermediate video into a browser-playable one.
pub trait Normalizer: Send + Sync {
    /// Read `input`, write `output`. On `Ok`, `output` exists and is complete.
    fn normalize(&self, input: &Path, output: &Path) -> Result<(), NormalizeError>;
}

/// Runs the fixed ffmpeg template with a wall-clock timeout.
#[derive(Clone, Debug)]
pub struct FfmpegNormalizer {
    program: PathBuf,
    timeout: Duration,
}

impl FfmpegNormalizer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: DEFAULT_NORMALIZE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Arguments passed to the program for one run.
    pub fn command_args(input: &Path, output: &Path) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-i".to_string(),
            input.to_string_lossy().into_owned(),
        ];
        for arg in [
            "-c:v",
            "libx264",
            "-pix_fmt",
            "yuv420p",
            "-preset",
            "fast",
            "-crf",
            "23",
            "-movflags",
            "+faststart",
        ] {
            args.push(arg.to_string());
        }
        args.push(output.to_string_lossy().into_owned());
        args
    }

    fn program_name(&self) -> String {
        self.program.display().to_string()
    }
}

impl Default for FfmpegNormalizer {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl Normalizer for FfmpegNormalizer {
    fn normalize(&self, input: &Path, output: &Path) -> Result<(), NormalizeError> {
        let program = self.program_name();
        let mut cmd = FfmpegCommand::new_with_path(&self.program);
        cmd.args(Self::command_args(input, output));
        log::info!("running normalizer: {:?}", cmd);

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|cause| NormalizeError::Spawn {
            program: program.clone(),
            cause,
        })?;
        drop(child.take_stdin());
        let events = match child.iter() {
            Ok(events) => events,
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(NormalizeError::Wait {
                    program,
                    cause: std::io::Error::other(err.to_string()),
                });
            }
        };

        // Events end when ffmpeg closes its output streams.
        let (done_tx, done_rx) = mpsc::channel();
        std::thread::spawn(move || {
            let _ = done_tx.send(collect_diagnostics(events));
        });
        let diagnostic = match done_rx.recv_timeout(self.timeout) {
            Ok(diagnostic) => diagnostic,
            Err(RecvTimeoutError::Timeout) => {
                let _ = child.kill();
                let _ = child.wait();
                log::error!("{} timed out after {:?}", program, self.timeout);
                return Err(NormalizeError::TimedOut {
                    program,
                    timeout: self.timeout,
                });
            }
            Err(RecvTimeoutError::Disconnected) => String::new(),
        };

        let status = child.wait().map_err(|cause| NormalizeError::Wait {
            program: program.clone(),
            cause,
        })?;
        if !status.success() {
            log::error!("{} failed ({}): {}", program, status, diagnostic);
            return Err(NormalizeError::Failed {
                program,
                status: status.to_string(),
                diagnostic,
            });
        }
        if !output.is_file() {
            return Err(NormalizeError::MissingOutput {
                program,
                output: output.to_path_buf(),
            });
        }
        log::debug!("normalized {} in {:?}", output.display(), started.elapsed());
        Ok(())
    }
}
