use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::detect::{BoxUnits, Delegate, TensorLayout};
use crate::mapping::Size;

const DEFAULT_MODEL_PATH: &str = "stub://ripeness";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_CONFIDENCE: f32 = 0.6;
const DEFAULT_IOU: f32 = 0.5;
const DEFAULT_MIN_BOX_AREA: f32 = 6000.0;
const DEFAULT_CAMERA: &str = "stub://rear_camera";
const DEFAULT_SNAPSHOT_QUALITY: u8 = 30;
const DEFAULT_CAPTURE_QUALITY: u8 = 85;
const DEFAULT_CAMERA_WIDTH: u32 = 1280;
const DEFAULT_CAMERA_HEIGHT: u32 = 960;
const DEFAULT_SCREEN: Size = Size::new(720.0, 1280.0);
const DEFAULT_RESULT_CONTAINER: Size = Size::new(688.0, 400.0);
const DEFAULT_CYCLE_DELAY_MS: u64 = 10;
const DEFAULT_FAILURE_BACKOFF_MS: u64 = 500;
const DEFAULT_CAPTURE_SETTLE_MS: u64 = 100;

#[derive(Debug, Deserialize, Default)]
struct ScanConfigFile {
    model: Option<ModelConfigFile>,
    detection: Option<DetectionConfigFile>,
    camera: Option<CameraConfigFile>,
    display: Option<DisplayConfigFile>,
    timing: Option<TimingConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    path: Option<String>,
    labels_path: Option<PathBuf>,
    delegate: Option<Delegate>,
    input_size: Option<u32>,
    tensor_layout: Option<TensorLayout>,
    box_units: Option<BoxUnits>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    min_box_area: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    source: Option<String>,
    snapshot_quality: Option<u8>,
    capture_quality: Option<u8>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DisplayConfigFile {
    screen_width: Option<f32>,
    screen_height: Option<f32>,
    container_width: Option<f32>,
    container_height: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct TimingConfigFile {
    cycle_delay_ms: Option<u64>,
    failure_backoff_ms: Option<u64>,
    capture_settle_ms: Option<u64>,
    max_consecutive_failures: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub model: ModelSettings,
    pub detection: DetectionSettings,
    pub camera: CameraSettings,
    pub display: DisplaySettings,
    pub timing: TimingSettings,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    /// ONNX file, or `stub://<name>` for the built-in stub network.
    pub path: String,
    /// Newline-delimited labels. `None` uses the built-in ripeness classes.
    pub labels_path: Option<PathBuf>,
    pub delegate: Delegate,
    pub input_size: u32,
    pub tensor_layout: TensorLayout,
    pub box_units: BoxUnits,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    /// Minimum box area in model input pixels.
    pub min_box_area: f32,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    /// `stub://<name>` for synthetic frames, otherwise a directory of images.
    pub source: String,
    pub snapshot_quality: u8,
    pub capture_quality: u8,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct DisplaySettings {
    pub screen: Size,
    pub result_container: Size,
}

#[derive(Debug, Clone)]
pub struct TimingSettings {
    pub cycle_delay: Duration,
    pub failure_backoff: Duration,
    pub capture_settle: Duration,
    pub max_consecutive_failures: Option<u32>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::from_file(ScanConfigFile::default())
    }
}

impl ScanConfig {
    /// Load from `RIPENESS_CONFIG` (if set), then apply env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("RIPENESS_CONFIG")
            .ok()
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Load from an explicit config file (or defaults), then apply env overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => ScanConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ScanConfigFile) -> Self {
        let model = file.model.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let camera = file.camera.unwrap_or_default();
        let display = file.display.unwrap_or_default();
        let timing = file.timing.unwrap_or_default();

        Self {
            model: ModelSettings {
                path: model.path.unwrap_or_else(|| DEFAULT_MODEL_PATH.to_string()),
                labels_path: model.labels_path,
                delegate: model.delegate.unwrap_or_default(),
                input_size: model.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
                tensor_layout: model.tensor_layout.unwrap_or_default(),
                box_units: model.box_units.unwrap_or_default(),
            },
            detection: DetectionSettings {
                confidence_threshold: detection
                    .confidence_threshold
                    .unwrap_or(DEFAULT_CONFIDENCE),
                iou_threshold: detection.iou_threshold.unwrap_or(DEFAULT_IOU),
                min_box_area: detection.min_box_area.unwrap_or(DEFAULT_MIN_BOX_AREA),
            },
            camera: CameraSettings {
                source: camera.source.unwrap_or_else(|| DEFAULT_CAMERA.to_string()),
                snapshot_quality: camera.snapshot_quality.unwrap_or(DEFAULT_SNAPSHOT_QUALITY),
                capture_quality: camera.capture_quality.unwrap_or(DEFAULT_CAPTURE_QUALITY),
                width: camera.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
            },
            display: DisplaySettings {
                screen: Size::new(
                    display.screen_width.unwrap_or(DEFAULT_SCREEN.width),
                    display.screen_height.unwrap_or(DEFAULT_SCREEN.height),
                ),
                result_container: Size::new(
                    display
                        .container_width
                        .unwrap_or(DEFAULT_RESULT_CONTAINER.width),
                    display
                        .container_height
                        .unwrap_or(DEFAULT_RESULT_CONTAINER.height),
                ),
            },
            timing: TimingSettings {
                cycle_delay: Duration::from_millis(
                    timing.cycle_delay_ms.unwrap_or(DEFAULT_CYCLE_DELAY_MS),
                ),
                failure_backoff: Duration::from_millis(
                    timing.failure_backoff_ms.unwrap_or(DEFAULT_FAILURE_BACKOFF_MS),
                ),
                capture_settle: Duration::from_millis(
                    timing.capture_settle_ms.unwrap_or(DEFAULT_CAPTURE_SETTLE_MS),
                ),
                max_consecutive_failures: timing.max_consecutive_failures,
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = env_value("RIPENESS_MODEL_PATH") {
            self.model.path = path;
        }
        if let Some(path) = env_value("RIPENESS_LABELS_PATH") {
            self.model.labels_path = Some(PathBuf::from(path));
        }
        if let Some(delegate) = env_value("RIPENESS_DELEGATE") {
            self.model.delegate = delegate
                .parse()
                .map_err(|e| anyhow!("RIPENESS_DELEGATE: {}", e))?;
        }
        if let Some(size) = parse_env("RIPENESS_INPUT_SIZE")? {
            self.model.input_size = size;
        }
        if let Some(threshold) = parse_env("RIPENESS_CONFIDENCE")? {
            self.detection.confidence_threshold = threshold;
        }
        if let Some(threshold) = parse_env("RIPENESS_IOU")? {
            self.detection.iou_threshold = threshold;
        }
        if let Some(source) = env_value("RIPENESS_CAMERA") {
            self.camera.source = source;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.model.path.trim().is_empty() {
            return Err(anyhow!("model path must not be empty"));
        }
        if self.model.input_size == 0 {
            return Err(anyhow!("model input_size must be greater than zero"));
        }
        check_unit_range("confidence_threshold", self.detection.confidence_threshold)?;
        check_unit_range("iou_threshold", self.detection.iou_threshold)?;
        if !self.detection.min_box_area.is_finite() || self.detection.min_box_area < 0.0 {
            return Err(anyhow!("min_box_area must be a non-negative number"));
        }
        if self.camera.source.trim().is_empty() {
            return Err(anyhow!("camera source must not be empty"));
        }
        check_quality("snapshot_quality", self.camera.snapshot_quality)?;
        check_quality("capture_quality", self.camera.capture_quality)?;
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be greater than zero"));
        }
        if self.display.screen.is_degenerate() {
            return Err(anyhow!("screen dimensions must be greater than zero"));
        }
        if self.display.result_container.is_degenerate() {
            return Err(anyhow!("result container dimensions must be greater than zero"));
        }
        if self.timing.max_consecutive_failures == Some(0) {
            return Err(anyhow!("max_consecutive_failures must be greater than zero when set"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ScanConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_env<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env_value(name) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a number, got '{}'", name, raw)),
        None => Ok(None),
    }
}

fn check_unit_range(name: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(anyhow!("{} must be within [0, 1], got {}", name, value));
    }
    Ok(())
}

fn check_quality(name: &str, value: u8) -> Result<()> {
    if !(1..=100).contains(&value) {
        return Err(anyhow!("{} must be within 1..=100, got {}", name, value));
    }
    Ok(())
}
