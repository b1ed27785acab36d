//! siren_watchd - emergency vehicle detection service
//!
//! This daemon:
//! 1. Loads configuration (`SIREN_CONFIG` JSON file + `SIREN_*` overrides)
//! 2. Builds the detector registry, media toolkit and normalizer
//! 3. Serves `/detect`, `/output/{filename}` and `/health` until Ctrl-C

use anyhow::Result;
use std::sync::mpsc;
use std::sync::Arc;

use siren_watch::{
    api::{ApiServer, AppState},
    config::SirenConfig,
    BackendRegistry, DetectionJob, FfmpegNormalizer, FfmpegToolkit, VideoStore,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = SirenConfig::load()?;
    let registry = BackendRegistry::from_config(&config.detection)?;
    let store = VideoStore::open(
        &config.storage.upload_dir,
        &config.storage.output_dir,
        config.storage.retention,
    )?;
    let toolkit = FfmpegToolkit::new(&config.ffmpeg.ffmpeg_path, &config.ffmpeg.ffprobe_path);
    let normalizer = FfmpegNormalizer::new(&config.ffmpeg.ffmpeg_path)
        .with_timeout(config.ffmpeg.normalize_timeout);
    let job = DetectionJob::new(
        store,
        Arc::new(toolkit),
        Arc::new(normalizer),
        config.detection.settings(),
    );

    let state = AppState::new(job, registry, &config.api);
    let api_handle = ApiServer::new(config.api.clone(), state).spawn()?;
    log::info!(
        "siren_watchd running on {} (uploads: {}, output: {}, emergency classes: {})",
        api_handle.addr,
        config.storage.upload_dir.display(),
        config.storage.output_dir.display(),
        config.detection.emergency_classes.join(",")
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("siren_watchd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;

    Ok(())
}
