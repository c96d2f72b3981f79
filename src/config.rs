use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ingest::{IngestSettings, StreamEndpoint};

const DEFAULT_STREAM_URL: &str = "stub://front_camera";
const DEFAULT_LATENCY_MS: u64 = 0;
const DEFAULT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_RECONNECT_DELAY_MS: u64 = 500;
const DEFAULT_MODEL_CONFIG: &str = "models/yolov4-tiny.cfg";
const DEFAULT_MODEL_WEIGHTS: &str = "models/yolov4-tiny.weights";
const DEFAULT_CLASS_NAMES: &str = "models/coco.names";
const DEFAULT_INPUT_SIZE: u32 = 416;
const DEFAULT_MAX_PROCESSING_WIDTH: u32 = 640;
const DEFAULT_SKIP_FACTOR: u32 = 2;
const DEFAULT_CONFIDENCE: f32 = 0.5;
const DEFAULT_NMS: f32 = 0.4;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AppConfigFile {
    stream: Option<StreamConfigFile>,
    detector: Option<DetectorConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct StreamConfigFile {
    url: Option<String>,
    latency_ms: Option<u64>,
    timeout_ms: Option<u64>,
    tcp_timeout_ms: Option<u64>,
    retransmission: Option<bool>,
    reconnect_delay_ms: Option<u64>,
    soft_recovery: Option<bool>,
    plugin_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectorConfigFile {
    enabled: Option<bool>,
    format: Option<ModelFormat>,
    model_config: Option<PathBuf>,
    model_weights: Option<PathBuf>,
    class_names: Option<PathBuf>,
    font: Option<PathBuf>,
    input_size: Option<u32>,
    max_processing_width: Option<u32>,
    skip_factor: Option<u32>,
    confidence_threshold: Option<f32>,
    nms_threshold: Option<f32>,
    swap_rb: Option<bool>,
    distance_classes: Option<Vec<String>>,
}

/// How the network files are laid out on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFormat {
    /// `.cfg` + `.weights` pair.
    #[default]
    Darknet,
    /// Single `.onnx` file in `model_weights`.
    Onnx,
    /// Canned empty outputs; no files needed.
    Stub,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub stream: StreamSettings,
    pub detector: DetectorSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    pub url: String,
    pub latency: Duration,
    pub timeout: Duration,
    pub tcp_timeout: Duration,
    pub retransmission: bool,
    pub reconnect_delay: Duration,
    pub soft_recovery: bool,
    pub plugin_dir: Option<PathBuf>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_STREAM_URL.to_string(),
            latency: Duration::from_millis(DEFAULT_LATENCY_MS),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            tcp_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            retransmission: true,
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            soft_recovery: true,
            plugin_dir: None,
        }
    }
}

impl StreamSettings {
    /// Parsed endpoint with the configured transport options applied.
    pub fn endpoint(&self) -> Result<StreamEndpoint> {
        let mut endpoint = StreamEndpoint::parse(&self.url)
            .with_context(|| format!("invalid stream url {:?}", self.url))?;
        endpoint.latency = self.latency;
        endpoint.timeout = self.timeout;
        endpoint.tcp_timeout = self.tcp_timeout;
        endpoint.retransmission = self.retransmission;
        Ok(endpoint)
    }

    pub fn ingest_settings(&self) -> IngestSettings {
        IngestSettings {
            reconnect_delay: self.reconnect_delay,
            soft_recovery: self.soft_recovery,
            ..IngestSettings::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSettings {
    pub enabled: bool,
    pub format: ModelFormat,
    pub model_config: PathBuf,
    pub model_weights: PathBuf,
    pub class_names: PathBuf,
    pub font: Option<PathBuf>,
    pub input_size: u32,
    pub max_processing_width: u32,
    pub skip_factor: u32,
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    pub swap_rb: bool,
    /// Classes that get a distance estimate; empty means all.
    pub distance_classes: Vec<String>,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            format: ModelFormat::default(),
            model_config: PathBuf::from(DEFAULT_MODEL_CONFIG),
            model_weights: PathBuf::from(DEFAULT_MODEL_WEIGHTS),
            class_names: PathBuf::from(DEFAULT_CLASS_NAMES),
            font: None,
            input_size: DEFAULT_INPUT_SIZE,
            max_processing_width: DEFAULT_MAX_PROCESSING_WIDTH,
            skip_factor: DEFAULT_SKIP_FACTOR,
            confidence_threshold: DEFAULT_CONFIDENCE,
            nms_threshold: DEFAULT_NMS,
            swap_rb: true,
            distance_classes: Vec::new(),
        }
    }
}

impl DetectorSettings {
    /// Move the three model files under `dir`, keeping their file names.
    pub fn reroot_models(&mut self, dir: &Path) {
        for path in [
            &mut self.model_config,
            &mut self.model_weights,
            &mut self.class_names,
        ] {
            if let Some(name) = path.file_name() {
                *path = dir.join(name);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.skip_factor == 0 {
            return Err(anyhow!("detector.skip_factor must be at least 1"));
        }
        if self.input_size == 0 {
            return Err(anyhow!("detector.input_size must be greater than zero"));
        }
        if self.max_processing_width == 0 {
            return Err(anyhow!(
                "detector.max_processing_width must be greater than zero"
            ));
        }
        check_unit_interval("detector.confidence_threshold", self.confidence_threshold)?;
        check_unit_interval("detector.nms_threshold", self.nms_threshold)?;
        Ok(())
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("STREAMSIGHT_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Like `load`, but with an explicit config file instead of
    /// `STREAMSIGHT_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AppConfigFile) -> Self {
        let stream_defaults = StreamSettings::default();
        let s = file.stream.unwrap_or_default();
        let ms = Duration::from_millis;
        let stream = StreamSettings {
            url: s.url.unwrap_or(stream_defaults.url),
            latency: s.latency_ms.map(ms).unwrap_or(stream_defaults.latency),
            timeout: s.timeout_ms.map(ms).unwrap_or(stream_defaults.timeout),
            tcp_timeout: s
                .tcp_timeout_ms
                .map(ms)
                .unwrap_or(stream_defaults.tcp_timeout),
            retransmission: s.retransmission.unwrap_or(stream_defaults.retransmission),
            reconnect_delay: s
                .reconnect_delay_ms
                .map(ms)
                .unwrap_or(stream_defaults.reconnect_delay),
            soft_recovery: s.soft_recovery.unwrap_or(stream_defaults.soft_recovery),
            plugin_dir: s.plugin_dir,
        };

        let defaults = DetectorSettings::default();
        let d = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            enabled: d.enabled.unwrap_or(defaults.enabled),
            format: d.format.unwrap_or(defaults.format),
            model_config: d.model_config.unwrap_or(defaults.model_config),
            model_weights: d.model_weights.unwrap_or(defaults.model_weights),
            class_names: d.class_names.unwrap_or(defaults.class_names),
            font: d.font,
            input_size: d.input_size.unwrap_or(defaults.input_size),
            max_processing_width: d
                .max_processing_width
                .unwrap_or(defaults.max_processing_width),
            skip_factor: d.skip_factor.unwrap_or(defaults.skip_factor),
            confidence_threshold: d
                .confidence_threshold
                .unwrap_or(defaults.confidence_threshold),
            nms_threshold: d.nms_threshold.unwrap_or(defaults.nms_threshold),
            swap_rb: d.swap_rb.unwrap_or(defaults.swap_rb),
            distance_classes: d.distance_classes.unwrap_or(defaults.distance_classes),
        };

        Self { stream, detector }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("STREAMSIGHT_URL") {
            if !url.trim().is_empty() {
                self.stream.url = url.trim().to_string();
            }
        }
        if let Ok(dir) = std::env::var("STREAMSIGHT_PLUGIN_DIR") {
            if !dir.trim().is_empty() {
                self.stream.plugin_dir = Some(PathBuf::from(dir));
            }
        }
        if let Ok(dir) = std::env::var("STREAMSIGHT_MODEL_DIR") {
            if !dir.trim().is_empty() {
                self.detector.reroot_models(Path::new(&dir));
            }
        }
        if let Ok(skip) = std::env::var("STREAMSIGHT_SKIP_FACTOR") {
            self.detector.skip_factor = skip
                .trim()
                .parse()
                .map_err(|_| anyhow!("STREAMSIGHT_SKIP_FACTOR must be a positive integer"))?;
        }
        if let Ok(conf) = std::env::var("STREAMSIGHT_CONFIDENCE") {
            self.detector.confidence_threshold = conf
                .trim()
                .parse()
                .map_err(|_| anyhow!("STREAMSIGHT_CONFIDENCE must be a number in (0, 1)"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.stream.url.trim().is_empty() {
            return Err(anyhow!("stream.url must not be empty"));
        }
        self.stream.endpoint()?;
        self.detector.validate()
    }
}

fn check_unit_interval(name: &str, value: f32) -> Result<()> {
    if value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(anyhow!("{name} must be strictly between 0 and 1, got {value}"))
    }
}

fn read_config_file(path: &Path) -> Result<AppConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
