//! siren_detect - run one local video through the detection loop
//!
//! Uses the same configuration as `siren_watchd`; flags override it. Prints the
//! processing result as JSON on stdout.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;

use siren_watch::{
    config::SirenConfig, pipeline, BackendRegistry, FfmpegNormalizer, FfmpegToolkit, Normalizer,
};

#[derive(Parser, Debug)]
#[command(
    name = "siren_detect",
    version,
    about = "Annotate emergency vehicles in a local video file"
)]
struct Args {
    /// Input video
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Annotated output video (must not exist)
    #[arg(short, long, value_name = "PATH")]
    output: PathBuf,

    /// Also write a browser-ready copy of the output here
    #[arg(long, value_name = "PATH")]
    normalized: Option<PathBuf>,

    /// Detector backend (stub|tract)
    #[arg(long, env = "SIREN_DETECTOR_BACKEND")]
    backend: Option<String>,

    /// ONNX model path for the tract backend
    #[arg(long, value_name = "PATH")]
    model: Option<PathBuf>,

    /// Minimum detection confidence
    #[arg(long)]
    threshold: Option<f32>,

    /// Comma-separated emergency classes
    #[arg(long, value_delimiter = ',')]
    classes: Vec<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = SirenConfig::load()?;
    if let Some(backend) = args.backend {
        config.detection.backend = backend;
    }
    if let Some(model) = args.model {
        config.detection.model_path = model;
    }
    if let Some(threshold) = args.threshold {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(anyhow!("--threshold must be within [0, 1]"));
        }
        config.detection.confidence_threshold = threshold;
    }
    if !args.classes.is_empty() {
        config.detection.emergency_classes = args.classes;
    }

    let registry = BackendRegistry::from_config(&config.detection)?;
    let mut detector = registry.create_default()?;
    let toolkit = FfmpegToolkit::new(&config.ffmpeg.ffmpeg_path, &config.ffmpeg.ffprobe_path);
    let settings = config.detection.settings();
    if settings.policy.classes().is_empty() {
        return Err(anyhow!("at least one emergency class is required"));
    }

    let result = pipeline::process(
        &toolkit,
        &args.input,
        &args.output,
        detector.as_mut(),
        &settings,
    )?;

    if let Some(normalized) = &args.normalized {
        FfmpegNormalizer::new(&config.ffmpeg.ffmpeg_path)
            .with_timeout(config.ffmpeg.normalize_timeout)
            .normalize(&args.output, normalized)?;
        log::info!("normalized copy written to {}", normalized.display());
    }

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
