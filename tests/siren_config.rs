use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use siren_watch::config::SirenConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SIREN_CONFIG",
        "SIREN_API_ADDR",
        "SIREN_API_WORKERS",
        "SIREN_PUBLIC_BASE_URL",
        "SIREN_MAX_UPLOAD_BYTES",
        "SIREN_UPLOAD_DIR",
        "SIREN_OUTPUT_DIR",
        "SIREN_KEEP_UPLOADS",
        "SIREN_KEEP_INTERMEDIATES",
        "SIREN_DETECTOR_BACKEND",
        "SIREN_MODEL_PATH",
        "SIREN_CONFIDENCE_THRESHOLD",
        "SIREN_EMERGENCY_CLASSES",
        "SIREN_FFMPEG",
        "SIREN_FFPROBE",
        "SIREN_NORMALIZE_TIMEOUT_SECS",
    ] {
        std::env::remove_var(key);
    }
}

fn config_file(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_apply_without_a_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = SirenConfig::load().expect("load config");

    assert_eq!(cfg.api.addr, "0.0.0.0:5000");
    assert_eq!(cfg.api.workers, 4);
    assert_eq!(cfg.api.public_base_url, None);
    assert_eq!(cfg.api.max_upload_bytes, 512 * 1024 * 1024);
    assert_eq!(cfg.storage.upload_dir, PathBuf::from("uploads"));
    assert_eq!(cfg.storage.output_dir, PathBuf::from("output"));
    assert!(!cfg.storage.retention.keep_uploads);
    assert!(!cfg.storage.retention.keep_intermediates);
    assert_eq!(cfg.detection.backend, "stub");
    assert_eq!(cfg.detection.model_path, PathBuf::from("best.onnx"));
    assert_eq!(cfg.detection.confidence_threshold, 0.25);
    assert_eq!(cfg.detection.iou_threshold, 0.45);
    assert_eq!(cfg.detection.emergency_classes, vec!["ambulance"]);
    assert_eq!(cfg.ffmpeg.ffmpeg_path, PathBuf::from("ffmpeg"));
    assert_eq!(cfg.ffmpeg.ffprobe_path, PathBuf::from("ffprobe"));
    assert_eq!(cfg.ffmpeg.normalize_timeout, Duration::from_secs(600));

    clear_env();
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        r#"{
            "api": {
                "addr": "127.0.0.1:9000",
                "workers": 8,
                "public_base_url": "https://siren.example"
            },
            "storage": {
                "upload_dir": "/var/lib/siren/uploads",
                "output_dir": "/var/lib/siren/output",
                "keep_uploads": true
            },
            "detection": {
                "backend": "tract",
                "model_path": "/models/ambulance.onnx",
                "input_size": 416,
                "class_names": ["ambulance", "fire_truck"],
                "confidence_threshold": 0.4,
                "emergency_classes": ["Ambulance", "FIRE_TRUCK"]
            },
            "ffmpeg": {
                "normalize_timeout_secs": 120
            }
        }"#,
    );

    std::env::set_var("SIREN_CONFIG", file.path());
    std::env::set_var("SIREN_API_ADDR", "0.0.0.0:8080");
    std::env::set_var("SIREN_KEEP_INTERMEDIATES", "yes");
    std::env::set_var("SIREN_CONFIDENCE_THRESHOLD", "0.6");
    std::env::set_var("SIREN_FFMPEG", "/opt/ffmpeg/bin/ffmpeg");

    let cfg = SirenConfig::load().expect("load config");

    assert_eq!(cfg.api.addr, "0.0.0.0:8080");
    assert_eq!(cfg.api.workers, 8);
    assert_eq!(cfg.api.public_base_url.as_deref(), Some("https://siren.example"));
    assert_eq!(cfg.storage.upload_dir, PathBuf::from("/var/lib/siren/uploads"));
    assert_eq!(cfg.storage.output_dir, PathBuf::from("/var/lib/siren/output"));
    assert!(cfg.storage.retention.keep_uploads);
    assert!(cfg.storage.retention.keep_intermediates);
    assert_eq!(cfg.detection.backend, "tract");
    assert_eq!(cfg.detection.model_path, PathBuf::from("/models/ambulance.onnx"));
    assert_eq!(cfg.detection.input_size, 416);
    assert_eq!(cfg.detection.class_names, vec!["ambulance", "fire_truck"]);
    assert_eq!(cfg.detection.confidence_threshold, 0.6);
    assert_eq!(
        cfg.detection.emergency_classes,
        vec!["ambulance", "fire_truck"]
    );
    assert_eq!(cfg.ffmpeg.ffmpeg_path, PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
    assert_eq!(cfg.ffmpeg.normalize_timeout, Duration::from_secs(120));

    let settings = cfg.detection.settings();
    assert!(settings.policy.classes().contains("Fire_Truck"));
    assert_eq!(settings.confidence_threshold, 0.6);

    clear_env();
}

#[test]
fn emergency_classes_from_env_are_split_and_normalized() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SIREN_EMERGENCY_CLASSES", " Ambulance, police ,,fire_truck ");
    let cfg = SirenConfig::load().expect("load config");
    assert_eq!(
        cfg.detection.emergency_classes,
        vec!["ambulance", "fire_truck", "police"]
    );

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();

    for (key, value) in [
        ("SIREN_CONFIDENCE_THRESHOLD", "1.5"),
        ("SIREN_CONFIDENCE_THRESHOLD", "high"),
        ("SIREN_NORMALIZE_TIMEOUT_SECS", "0"),
        ("SIREN_NORMALIZE_TIMEOUT_SECS", "-3"),
        ("SIREN_API_WORKERS", "0"),
        ("SIREN_DETECTOR_BACKEND", "opencv"),
        ("SIREN_KEEP_UPLOADS", "maybe"),
        ("SIREN_MAX_UPLOAD_BYTES", "lots"),
    ] {
        clear_env();
        std::env::set_var(key, value);
        assert!(
            SirenConfig::load().is_err(),
            "{key}={value} should be rejected"
        );
    }

    clear_env();
    let file = config_file(r#"{ "detection": { "emergency_classes": [" ", ""] } }"#);
    std::env::set_var("SIREN_CONFIG", file.path());
    assert!(SirenConfig::load().is_err());

    clear_env();
    let file = config_file(r#"{ "detection": { "iou_threshold": 0.0 } }"#);
    std::env::set_var("SIREN_CONFIG", file.path());
    assert!(SirenConfig::load().is_err());

    clear_env();
    let file = config_file("{ not json");
    std::env::set_var("SIREN_CONFIG", file.path());
    assert!(SirenConfig::load().is_err());

    clear_env();
}
