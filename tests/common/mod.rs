#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use siren_watch::normalize::NormalizeError;
use siren_watch::{
    BackendRegistry, BoundingBox, Detection, DetectionJob, DetectionSettings, DetectorBackend,
    Frame, Normalizer, RawVideoToolkit, RetentionPolicy, VideoInfo, VideoStore,
};

pub const WIDTH: u32 = 48;
pub const HEIGHT: u32 = 36;

/// Marker flag: the detector reports an ambulance on this frame.
pub const AMBULANCE: u8 = 1;
/// Marker flag: the detector reports a non-emergency object on this frame.
pub const CAR: u8 = 2;

pub fn info() -> VideoInfo {
    VideoInfo::new(WIDTH, HEIGHT, 10.0).unwrap()
}

pub fn frame_len() -> usize {
    (WIDTH * HEIGHT * 3) as usize
}

/// Raw RGB24 video whose pixel (0,0) encodes `[index lo, index hi, flag]`.
pub fn marked_video(flags: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(frame_len() * flags.len());
    for (index, flag) in flags.iter().enumerate() {
        let mut frame = vec![40u8; frame_len()];
        frame[0] = (index & 0xff) as u8;
        frame[1] = ((index >> 8) & 0xff) as u8;
        frame[2] = *flag;
        bytes.extend_from_slice(&frame);
    }
    bytes
}

/// `(index, flag)` markers of every frame in a raw RGB24 video.
pub fn read_markers(bytes: &[u8]) -> Vec<(usize, u8)> {
    assert_eq!(bytes.len() % frame_len(), 0, "truncated raw video");
    bytes
        .chunks(frame_len())
        .map(|frame| (frame[0] as usize | (frame[1] as usize) << 8, frame[2]))
        .collect()
}

/// Whether a raw RGB24 frame differs from the fill `marked_video` uses.
pub fn frame_is_drawn_on(frame: &[u8]) -> bool {
    frame[3..].iter().any(|&b| b != 40)
}

/// Reports detections according to each frame's embedded marker.
///
/// Boxes are placed away from pixel (0,0) so the marker survives annotation.
pub struct MarkerBackend;

impl DetectorBackend for MarkerBackend {
    fn name(&self) -> &'static str {
        "marker"
    }

    fn detect(&mut self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<Detection>> {
        let region = BoundingBox::new(10.0, 20.0, 8.0, 6.0);
        let detections = match frame.pixels()[2] {
            AMBULANCE => vec![Detection::new("Ambulance", 0.9, region)],
            CAR => vec![Detection::new("car", 0.95, region)],
            _ => Vec::new(),
        };
        Ok(detections
            .into_iter()
            .filter(|d| d.confidence >= confidence_threshold)
            .collect())
    }
}

pub fn marker_registry() -> BackendRegistry {
    let mut registry = BackendRegistry::new();
    registry.register("marker", || Ok(Box::new(MarkerBackend)));
    registry
}

/// Normalizer that copies its input, standing in for ffmpeg.
pub struct CopyNormalizer;

impl Normalizer for CopyNormalizer {
    fn normalize(&self, input: &Path, output: &Path) -> Result<(), NormalizeError> {
        std::fs::copy(input, output).map_err(|cause| NormalizeError::Spawn {
            program: "copy".to_string(),
            cause,
        })?;
        Ok(())
    }
}

/// Normalizer that always fails the way a missing encoder does.
pub struct FailingNormalizer;

impl Normalizer for FailingNormalizer {
    fn normalize(&self, _input: &Path, _output: &Path) -> Result<(), NormalizeError> {
        Err(NormalizeError::Failed {
            program: "ffmpeg".to_string(),
            status: "exit status: 1".to_string(),
            diagnostic: "Unknown encoder 'libx264'".to_string(),
        })
    }
}

pub fn open_store(root: &Path, retention: RetentionPolicy) -> VideoStore {
    VideoStore::open(root.join("uploads"), root.join("output"), retention).unwrap()
}

pub fn raw_job(store: VideoStore, normalizer: Arc<dyn Normalizer>) -> DetectionJob {
    DetectionJob::new(
        store,
        Arc::new(RawVideoToolkit::new(info())),
        normalizer,
        DetectionSettings::default(),
    )
}

/// Every file under `dir`, recursively.
pub fn files_under(dir: &Path) -> Vec<std::path::PathBuf> {
    let mut found = Vec::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                found.extend(files_under(&path));
            } else {
                found.push(path);
            }
        }
    }
    found
}

/// Deterministic, non-repeating test payload.
pub fn patterned_bytes(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| ((i * 31 + i / 251) % 256) as u8)
        .collect()
}
