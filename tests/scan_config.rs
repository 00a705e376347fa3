use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use ripeness_scan::config::ScanConfig;
use ripeness_scan::detect::{BoxUnits, Delegate, TensorLayout};
use ripeness_scan::Size;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "RIPENESS_CONFIG",
        "RIPENESS_MODEL_PATH",
        "RIPENESS_LABELS_PATH",
        "RIPENESS_DELEGATE",
        "RIPENESS_CONFIDENCE",
        "RIPENESS_IOU",
        "RIPENESS_CAMERA",
        "RIPENESS_INPUT_SIZE",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_apply_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = ScanConfig::load().expect("load config");
    assert_eq!(cfg.model.path, "stub://ripeness");
    assert!(cfg.model.labels_path.is_none());
    assert_eq!(cfg.model.delegate, Delegate::Cpu);
    assert_eq!(cfg.model.input_size, 640);
    assert_eq!(cfg.model.tensor_layout, TensorLayout::Nhwc);
    assert_eq!(cfg.model.box_units, BoxUnits::Pixels);
    assert_eq!(cfg.detection.confidence_threshold, 0.6);
    assert_eq!(cfg.detection.iou_threshold, 0.5);
    assert_eq!(cfg.detection.min_box_area, 6000.0);
    assert_eq!(cfg.camera.snapshot_quality, 30);
    assert_eq!(cfg.camera.capture_quality, 85);
    assert_eq!((cfg.camera.width, cfg.camera.height), (1280, 960));
    assert_eq!(cfg.display.screen, Size::new(720.0, 1280.0));
    assert_eq!(cfg.display.result_container, Size::new(688.0, 400.0));
    assert_eq!(cfg.timing.cycle_delay, Duration::from_millis(10));
    assert_eq!(cfg.timing.failure_backoff, Duration::from_millis(500));
    assert_eq!(cfg.timing.capture_settle, Duration::from_millis(100));
    assert!(cfg.timing.max_consecutive_failures.is_none());
}

#[test]
fn loads_json_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "model": {
            "path": "/opt/models/avocado.onnx",
            "labels_path": "/opt/models/labels.txt",
            "delegate": "accelerator",
            "input_size": 320,
            "tensor_layout": "nchw",
            "box_units": "normalized"
        },
        "detection": {
            "confidence_threshold": 0.55,
            "min_box_area": 0
        },
        "camera": {
            "source": "/var/lib/ripeness/frames",
            "snapshot_quality": 40
        },
        "display": {
            "screen_width": 1080,
            "screen_height": 2400
        },
        "timing": {
            "failure_backoff_ms": 250,
            "max_consecutive_failures": 20
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("RIPENESS_CONFIG", file.path());
    std::env::set_var("RIPENESS_CONFIDENCE", "0.7");
    std::env::set_var("RIPENESS_DELEGATE", "cpu");
    std::env::set_var("RIPENESS_CAMERA", "  ");

    let cfg = ScanConfig::load().expect("load config");

    assert_eq!(cfg.model.path, "/opt/models/avocado.onnx");
    assert_eq!(
        cfg.model.labels_path.as_deref(),
        Some(std::path::Path::new("/opt/models/labels.txt"))
    );
    assert_eq!(cfg.model.delegate, Delegate::Cpu);
    assert_eq!(cfg.model.input_size, 320);
    assert_eq!(cfg.model.tensor_layout, TensorLayout::Nchw);
    assert_eq!(cfg.model.box_units, BoxUnits::Normalized);
    assert_eq!(cfg.detection.confidence_threshold, 0.7);
    assert_eq!(cfg.detection.iou_threshold, 0.5);
    assert_eq!(cfg.detection.min_box_area, 0.0);
    assert_eq!(cfg.camera.source, "/var/lib/ripeness/frames");
    assert_eq!(cfg.camera.snapshot_quality, 40);
    assert_eq!(cfg.camera.capture_quality, 85);
    assert_eq!(cfg.display.screen, Size::new(1080.0, 2400.0));
    assert_eq!(cfg.timing.failure_backoff, Duration::from_millis(250));
    assert_eq!(cfg.timing.max_consecutive_failures, Some(20));

    clear_env();
}

#[test]
fn toml_config_is_selected_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
[model]
input_size = 416

[detection]
iou_threshold = 0.45

[camera]
source = "stub://bench"
"#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    let cfg = ScanConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.model.input_size, 416);
    assert_eq!(cfg.detection.iou_threshold, 0.45);
    assert_eq!(cfg.camera.source, "stub://bench");
}

#[test]
fn invalid_values_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("RIPENESS_CONFIDENCE", "1.5");
    assert!(ScanConfig::load().is_err());
    clear_env();

    std::env::set_var("RIPENESS_IOU", "half");
    let err = ScanConfig::load().unwrap_err();
    assert!(err.to_string().contains("RIPENESS_IOU"));
    clear_env();

    std::env::set_var("RIPENESS_DELEGATE", "tpu");
    assert!(ScanConfig::load().is_err());
    clear_env();

    std::env::set_var("RIPENESS_INPUT_SIZE", "0");
    assert!(ScanConfig::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{"camera": {"capture_quality": 0}}"#)
        .expect("write config");
    assert!(ScanConfig::load_from(Some(file.path())).is_err());

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, b"{ not json").expect("write config");
    assert!(ScanConfig::load_from(Some(file.path())).is_err());
}
