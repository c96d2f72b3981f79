use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use streamsight::config::{AppConfig, ModelFormat};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "STREAMSIGHT_CONFIG",
        "STREAMSIGHT_URL",
        "STREAMSIGHT_SKIP_FACTOR",
        "STREAMSIGHT_CONFIDENCE",
        "STREAMSIGHT_MODEL_DIR",
        "STREAMSIGHT_PLUGIN_DIR",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(body: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, body.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = AppConfig::load().expect("load defaults");
    assert_eq!(cfg.stream.url, "stub://front_camera");
    assert_eq!(cfg.stream.timeout, Duration::from_secs(5));
    assert!(cfg.stream.soft_recovery);
    assert_eq!(cfg.detector.format, ModelFormat::Darknet);
    assert_eq!(cfg.detector.input_size, 416);
    assert_eq!(cfg.detector.max_processing_width, 640);
    assert_eq!(cfg.detector.skip_factor, 2);
    assert!(cfg.detector.distance_classes.is_empty());
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"
        [stream]
        url = "rtsp://camera-1.local:8554/live/main"
        latency_ms = 100
        reconnect_delay_ms = 2000
        soft_recovery = false

        [detector]
        format = "onnx"
        model_weights = "models/yolov8n.onnx"
        class_names = "models/coco.names"
        input_size = 640
        skip_factor = 3
        confidence_threshold = 0.6
        distance_classes = ["person"]
        "#,
    );

    std::env::set_var("STREAMSIGHT_CONFIG", file.path());
    std::env::set_var("STREAMSIGHT_SKIP_FACTOR", "5");
    std::env::set_var("STREAMSIGHT_MODEL_DIR", "/srv/models");

    let cfg = AppConfig::load().expect("load config");
    clear_env();

    assert_eq!(cfg.stream.url, "rtsp://camera-1.local:8554/live/main");
    assert_eq!(cfg.stream.latency, Duration::from_millis(100));
    assert_eq!(cfg.stream.reconnect_delay, Duration::from_secs(2));
    assert!(!cfg.stream.soft_recovery);
    assert_eq!(cfg.detector.format, ModelFormat::Onnx);
    assert_eq!(cfg.detector.input_size, 640);
    assert_eq!(cfg.detector.skip_factor, 5);
    assert!((cfg.detector.confidence_threshold - 0.6).abs() < f32::EPSILON);
    assert_eq!(
        cfg.detector.model_weights,
        PathBuf::from("/srv/models/yolov8n.onnx")
    );
    assert_eq!(cfg.detector.distance_classes, vec!["person".to_string()]);

    let endpoint = cfg.stream.endpoint().expect("endpoint");
    assert_eq!(endpoint.display_name(), "camera-1.local:8554_live_main");
    assert_eq!(
        cfg.stream.ingest_settings().reconnect_delay,
        Duration::from_secs(2)
    );
}

#[test]
fn url_env_override_wins_over_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config("[stream]\nurl = \"rtsp://a\"\n");
    std::env::set_var("STREAMSIGHT_CONFIG", file.path());
    std::env::set_var("STREAMSIGHT_URL", "stub://b");
    let cfg = AppConfig::load().expect("load config");
    clear_env();

    assert_eq!(cfg.stream.url, "stub://b");
}

#[test]
fn rejects_zero_skip_factor() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("STREAMSIGHT_SKIP_FACTOR", "0");
    let err = AppConfig::load().unwrap_err();
    clear_env();

    assert!(err.to_string().contains("skip_factor"));
}

#[test]
fn rejects_threshold_outside_unit_interval() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config("[detector]\nnms_threshold = 1.5\n");
    let err = AppConfig::load_from(Some(file.path())).unwrap_err();

    assert!(err.to_string().contains("nms_threshold"));
}

#[test]
fn rejects_unparseable_confidence() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("STREAMSIGHT_CONFIDENCE", "high");
    let result = AppConfig::load();
    clear_env();

    assert!(result.is_err());
}

#[test]
fn rejects_unknown_scheme() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config("[stream]\nurl = \"http://camera/stream\"\n");
    assert!(AppConfig::load_from(Some(file.path())).is_err());
}

#[test]
fn rejects_malformed_toml() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config("[stream\nurl = ");
    let err = AppConfig::load_from(Some(file.path())).unwrap_err();
    assert!(err.to_string().contains("invalid config file"));
}
