use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::annotate::{AnnotationPolicy, EmergencyClasses};
use crate::api::{ApiConfig, DEFAULT_MAX_UPLOAD_BYTES};
#[cfg(feature = "backend-tract")]
use crate::detect::YoloParams;
use crate::normalize::DEFAULT_NORMALIZE_TIMEOUT;
use crate::pipeline::DetectionSettings;
use crate::storage::RetentionPolicy;

const DEFAULT_API_ADDR: &str = "0.0.0.0:5000";
const DEFAULT_API_WORKERS: usize = 4;
const DEFAULT_UPLOAD_DIR: &str = "uploads";
const DEFAULT_OUTPUT_DIR: &str = "output";
const DEFAULT_BACKEND: &str = "stub";
const DEFAULT_MODEL_PATH: &str = "best.onnx";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const DEFAULT_EMERGENCY_CLASS: &str = "ambulance";
const DEFAULT_FFMPEG: &str = "ffmpeg";
const DEFAULT_FFPROBE: &str = "ffprobe";

/// Detector backends the daemon knows how to build.
pub const KNOWN_BACKENDS: &[&str] = &["stub", "tract"];

#[derive(Debug, Deserialize, Default)]
struct SirenConfigFile {
    api: Option<ApiConfigFile>,
    storage: Option<StorageConfigFile>,
    detection: Option<DetectionConfigFile>,
    ffmpeg: Option<FfmpegConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    workers: Option<usize>,
    public_base_url: Option<String>,
    max_upload_bytes: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    upload_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    keep_uploads: Option<bool>,
    keep_intermediates: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
    class_names: Option<Vec<String>>,
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    emergency_classes: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct FfmpegConfigFile {
    ffmpeg_path: Option<PathBuf>,
    ffprobe_path: Option<PathBuf>,
    normalize_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct SirenConfig {
    pub api: ApiConfig,
    pub storage: StorageSettings,
    pub detection: DetectionConfig,
    pub ffmpeg: FfmpegSettings,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub retention: RetentionPolicy,
}

#[derive(Debug, Clone)]
pub struct DetectionConfig {
    pub backend: String,
    pub model_path: PathBuf,
    pub input_size: u32,
    pub class_names: Vec<String>,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub emergency_classes: Vec<String>,
}

impl DetectionConfig {
    /// Threshold and annotation policy for the processing loop.
    pub fn settings(&self) -> DetectionSettings {
        DetectionSettings {
            confidence_threshold: self.confidence_threshold,
            policy: AnnotationPolicy::new(EmergencyClasses::new(&self.emergency_classes)),
        }
    }

    #[cfg(feature = "backend-tract")]
    pub fn yolo_params(&self) -> YoloParams {
        YoloParams {
            input_size: self.input_size,
            iou_threshold: self.iou_threshold,
            class_names: self.class_names.clone(),
            ..YoloParams::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct FfmpegSettings {
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub normalize_timeout: Duration,
}

impl SirenConfig {
    /// Defaults, then the JSON file named by `SIREN_CONFIG`, then `SIREN_*`
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SIREN_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SirenConfigFile) -> Self {
        let api_file = file.api.unwrap_or_default();
        let api = ApiConfig {
            addr: api_file
                .addr
                .unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            workers: api_file.workers.unwrap_or(DEFAULT_API_WORKERS),
            public_base_url: api_file.public_base_url,
            max_upload_bytes: api_file.max_upload_bytes.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
        };

        let storage_file = file.storage.unwrap_or_default();
        let storage = StorageSettings {
            upload_dir: storage_file
                .upload_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_UPLOAD_DIR)),
            output_dir: storage_file
                .output_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            retention: RetentionPolicy {
                keep_uploads: storage_file.keep_uploads.unwrap_or(false),
                keep_intermediates: storage_file.keep_intermediates.unwrap_or(false),
            },
        };

        let detection_file = file.detection.unwrap_or_default();
        let detection = DetectionConfig {
            backend: detection_file
                .backend
                .unwrap_or_else(|| DEFAULT_BACKEND.to_string()),
            model_path: detection_file
                .model_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
            input_size: detection_file.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
            class_names: detection_file
                .class_names
                .unwrap_or_else(|| vec![DEFAULT_EMERGENCY_CLASS.to_string()]),
            confidence_threshold: detection_file
                .confidence_threshold
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            iou_threshold: detection_file
                .iou_threshold
                .unwrap_or(DEFAULT_IOU_THRESHOLD),
            emergency_classes: detection_file
                .emergency_classes
                .unwrap_or_else(|| vec![DEFAULT_EMERGENCY_CLASS.to_string()]),
        };

        let ffmpeg_file = file.ffmpeg.unwrap_or_default();
        let ffmpeg = FfmpegSettings {
            ffmpeg_path: ffmpeg_file
                .ffmpeg_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_FFMPEG)),
            ffprobe_path: ffmpeg_file
                .ffprobe_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_FFPROBE)),
            normalize_timeout: ffmpeg_file
                .normalize_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_NORMALIZE_TIMEOUT),
        };

        Self {
            api,
            storage,
            detection,
            ffmpeg,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = env_nonempty("SIREN_API_ADDR") {
            self.api.addr = addr;
        }
        if let Some(workers) = env_nonempty("SIREN_API_WORKERS") {
            self.api.workers = workers
                .parse()
                .map_err(|_| anyhow!("SIREN_API_WORKERS must be a positive integer"))?;
        }
        if let Some(base) = env_nonempty("SIREN_PUBLIC_BASE_URL") {
            self.api.public_base_url = Some(base);
        }
        if let Some(limit) = env_nonempty("SIREN_MAX_UPLOAD_BYTES") {
            self.api.max_upload_bytes = limit
                .parse()
                .map_err(|_| anyhow!("SIREN_MAX_UPLOAD_BYTES must be an integer byte count"))?;
        }
        if let Some(dir) = env_nonempty("SIREN_UPLOAD_DIR") {
            self.storage.upload_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_nonempty("SIREN_OUTPUT_DIR") {
            self.storage.output_dir = PathBuf::from(dir);
        }
        if let Some(keep) = env_nonempty("SIREN_KEEP_UPLOADS") {
            self.storage.retention.keep_uploads = parse_bool("SIREN_KEEP_UPLOADS", &keep)?;
        }
        if let Some(keep) = env_nonempty("SIREN_KEEP_INTERMEDIATES") {
            self.storage.retention.keep_intermediates =
                parse_bool("SIREN_KEEP_INTERMEDIATES", &keep)?;
        }
        if let Some(backend) = env_nonempty("SIREN_DETECTOR_BACKEND") {
            self.detection.backend = backend;
        }
        if let Some(path) = env_nonempty("SIREN_MODEL_PATH") {
            self.detection.model_path = PathBuf::from(path);
        }
        if let Some(threshold) = env_nonempty("SIREN_CONFIDENCE_THRESHOLD") {
            self.detection.confidence_threshold = threshold
                .parse()
                .map_err(|_| anyhow!("SIREN_CONFIDENCE_THRESHOLD must be a number"))?;
        }
        if let Ok(classes) = std::env::var("SIREN_EMERGENCY_CLASSES") {
            let parsed = split_csv(&classes);
            if !parsed.is_empty() {
                self.detection.emergency_classes = parsed;
            }
        }
        if let Some(path) = env_nonempty("SIREN_FFMPEG") {
            self.ffmpeg.ffmpeg_path = PathBuf::from(path);
        }
        if let Some(path) = env_nonempty("SIREN_FFPROBE") {
            self.ffmpeg.ffprobe_path = PathBuf::from(path);
        }
        if let Some(timeout) = env_nonempty("SIREN_NORMALIZE_TIMEOUT_SECS") {
            let seconds: u64 = timeout.parse().map_err(|_| {
                anyhow!("SIREN_NORMALIZE_TIMEOUT_SECS must be an integer number of seconds")
            })?;
            self.ffmpeg.normalize_timeout = Duration::from_secs(seconds);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        let threshold = self.detection.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(anyhow!(
                "confidence threshold must be within [0, 1] (got {threshold})"
            ));
        }
        let iou = self.detection.iou_threshold;
        if !(iou > 0.0 && iou <= 1.0) {
            return Err(anyhow!("iou threshold must be within (0, 1] (got {iou})"));
        }

        let mut classes: Vec<String> = self
            .detection
            .emergency_classes
            .iter()
            .map(|class| class.trim().to_lowercase())
            .filter(|class| !class.is_empty())
            .collect();
        classes.sort();
        classes.dedup();
        if classes.is_empty() {
            return Err(anyhow!("at least one emergency class is required"));
        }
        self.detection.emergency_classes = classes;

        if self.detection.class_names.is_empty() {
            return Err(anyhow!("detection.class_names must not be empty"));
        }
        if self.detection.input_size == 0 {
            return Err(anyhow!("detection.input_size must be greater than zero"));
        }

        self.detection.backend = self.detection.backend.trim().to_lowercase();
        if !KNOWN_BACKENDS.contains(&self.detection.backend.as_str()) {
            return Err(anyhow!(
                "unknown detector backend '{}' (expected one of: {})",
                self.detection.backend,
                KNOWN_BACKENDS.join(", ")
            ));
        }

        if self.ffmpeg.normalize_timeout.is_zero() {
            return Err(anyhow!("normalize timeout must be greater than zero"));
        }
        if self.api.workers == 0 {
            return Err(anyhow!("api workers must be greater than zero"));
        }
        if self.api.max_upload_bytes == 0 {
            return Err(anyhow!("max upload size must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<SirenConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("{name} must be a boolean (got '{value}')")),
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
