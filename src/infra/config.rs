//! Configuration loading from TOML files
//!
//! The binary selects the config file (see `Args` in main.rs) via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use crate::domain::sensor::Sensor;
use anyhow::Context;
use regex::Regex;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self { name: default_service_name() }
    }
}

fn default_service_name() -> String {
    "loss-prevention".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Topic carrying tag event batches
    #[serde(default = "default_data_topic")]
    pub data_topic: String,
    /// Topic carrying sensor configuration snapshots
    #[serde(default = "default_sensor_topic")]
    pub sensor_topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_client_id() -> String {
    "loss-prevention".to_string()
}

fn default_data_topic() -> String {
    "rfid/inventory/events".to_string()
}

fn default_sensor_topic() -> String {
    "rfid/sensor/config".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct FiltersConfig {
    #[serde(default = "default_filter")]
    pub sku: String,
    #[serde(default = "default_filter")]
    pub epc: String,
}

impl Default for FiltersConfig {
    fn default() -> Self {
        Self { sku: default_filter(), epc: default_filter() }
    }
}

fn default_filter() -> String {
    ".*".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordingConfig {
    pub video_device: String,
    /// Requested clip length in seconds
    pub duration_secs: f64,
    #[serde(default = "default_output_root")]
    pub output_root: String,
    #[serde(default = "default_video_extension")]
    pub video_extension: String,
    #[serde(default = "default_output_codec")]
    pub output_codec: String,
    #[serde(default = "default_fps")]
    pub fps: f64,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    /// FourCC requested from the capture device (empty to leave as is)
    #[serde(default)]
    pub capture_fourcc: String,
    #[serde(default = "default_capture_buffer_size")]
    pub capture_buffer_size: u32,
    #[serde(default = "default_thumbnail_height")]
    pub thumbnail_height: u32,
    /// Detection runs on a copy downscaled by this factor on both axes
    #[serde(default = "default_image_process_scale")]
    pub image_process_scale: u32,
    #[serde(default = "default_true")]
    pub save_detections: bool,
    #[serde(default)]
    pub live_view: bool,
    #[serde(default)]
    pub fullscreen_view: bool,
    #[serde(default)]
    pub show_debug_stats: bool,
    #[serde(default)]
    pub startup_self_test: bool,
}

fn default_output_root() -> String {
    "/recordings".to_string()
}

fn default_video_extension() -> String {
    ".mp4".to_string()
}

fn default_output_codec() -> String {
    "avc1".to_string()
}

fn default_fps() -> f64 {
    15.0
}

fn default_width() -> u32 {
    1280
}

fn default_height() -> u32 {
    720
}

fn default_capture_buffer_size() -> u32 {
    3
}

fn default_thumbnail_height() -> u32 {
    150
}

fn default_image_process_scale() -> u32 {
    2
}

fn default_true() -> bool {
    true
}

/// Detection window parameters handed to the cascade engine
///
/// An all-zero value means "engine defaults".
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
pub struct DetectParams {
    #[serde(default)]
    pub scale_factor: f64,
    #[serde(default)]
    pub min_neighbors: u32,
    #[serde(default)]
    pub flags: u32,
    #[serde(default)]
    pub min_width_fraction: f64,
    #[serde(default)]
    pub min_height_fraction: f64,
    #[serde(default)]
    pub max_width_fraction: f64,
    #[serde(default)]
    pub max_height_fraction: f64,
}

impl DetectParams {
    pub const fn new(
        scale_factor: f64,
        min_neighbors: u32,
        min_width_fraction: f64,
        min_height_fraction: f64,
        max_width_fraction: f64,
        max_height_fraction: f64,
    ) -> Self {
        Self {
            scale_factor,
            min_neighbors,
            flags: 0,
            min_width_fraction,
            min_height_fraction,
            max_width_fraction,
            max_height_fraction,
        }
    }

    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

/// One detection category as written in the config file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CategoryConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub annotation: Option<String>,
    /// Packed 0xRRGGBB
    #[serde(default)]
    pub color: Option<u32>,
    #[serde(default)]
    pub params: Option<DetectParams>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "default_cascade_folder")]
    pub cascade_folder: String,
    #[serde(default)]
    pub face: CategoryConfig,
    #[serde(default)]
    pub profile_face: CategoryConfig,
    #[serde(default)]
    pub upper_body: CategoryConfig,
    #[serde(default)]
    pub full_body: CategoryConfig,
    #[serde(default)]
    pub eye: CategoryConfig,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            cascade_folder: default_cascade_folder(),
            face: CategoryConfig::default(),
            profile_face: CategoryConfig::default(),
            upper_body: CategoryConfig::default(),
            full_body: CategoryConfig::default(),
            eye: CategoryConfig::default(),
        }
    }
}

fn default_cascade_folder() -> String {
    "/data/haarcascades".to_string()
}

/// Built-in defaults for a detection category
#[derive(Debug, Clone, Copy)]
pub struct CategoryDefaults {
    pub name: &'static str,
    pub file: &'static str,
    pub annotation: &'static str,
    pub color: u32,
    pub thickness: u32,
    pub render_as_circle: bool,
    pub params: DetectParams,
}

pub const FACE: CategoryDefaults = CategoryDefaults {
    name: "face",
    file: "haarcascade_frontalface_default.xml",
    annotation: "Face",
    color: 0x0000ff,
    thickness: 2,
    render_as_circle: false,
    params: DetectParams::new(1.4, 4, 0.05, 0.05, 0.8, 0.8),
};

pub const PROFILE_FACE: CategoryDefaults = CategoryDefaults {
    name: "profile_face",
    file: "haarcascade_profileface.xml",
    annotation: "Profile Face",
    color: 0xffff00,
    thickness: 2,
    render_as_circle: false,
    params: DetectParams::new(1.4, 4, 0.1, 0.1, 0.8, 0.8),
};

pub const UPPER_BODY: CategoryDefaults = CategoryDefaults {
    name: "upper_body",
    file: "haarcascade_upperbody.xml",
    annotation: "Upper Body",
    color: 0x00ff00,
    thickness: 2,
    render_as_circle: false,
    params: DetectParams::new(1.5, 3, 0.1, 0.1, 0.75, 0.75),
};

pub const FULL_BODY: CategoryDefaults = CategoryDefaults {
    name: "full_body",
    file: "haarcascade_fullbody.xml",
    annotation: "Full Body",
    color: 0xff0000,
    thickness: 2,
    render_as_circle: false,
    params: DetectParams::new(1.4, 2, 0.1, 0.1, 0.6, 0.8),
};

pub const EYE: CategoryDefaults = CategoryDefaults {
    name: "eye",
    file: "haarcascade_eye.xml",
    annotation: "",
    color: 0xff00ff,
    thickness: 1,
    render_as_circle: true,
    params: DetectParams::new(1.5, 5, 0.01, 0.01, 0.025, 0.025),
};

/// A detection category after defaults are applied
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSettings {
    pub name: String,
    pub source_file: PathBuf,
    pub annotation: String,
    pub color: u32,
    pub thickness: u32,
    pub render_as_circle: bool,
    pub params: DetectParams,
}

impl DetectorSettings {
    fn resolve(folder: &str, defaults: CategoryDefaults, category: &CategoryConfig) -> Self {
        let file = category.file.as_deref().unwrap_or(defaults.file);
        Self {
            name: defaults.name.to_string(),
            source_file: Path::new(folder).join(file),
            annotation: category
                .annotation
                .clone()
                .unwrap_or_else(|| defaults.annotation.to_string()),
            color: category.color.unwrap_or(defaults.color),
            thickness: defaults.thickness,
            render_as_circle: defaults.render_as_circle,
            params: category.params.unwrap_or(defaults.params),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_notification_url")]
    pub url: String,
    #[serde(default = "default_service_name")]
    pub sender: String,
    #[serde(default = "default_notification_category")]
    pub category: String,
    #[serde(default = "default_notification_severity")]
    pub severity: String,
    #[serde(default = "default_notification_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_notification_url(),
            sender: default_service_name(),
            category: default_notification_category(),
            severity: default_notification_severity(),
            timeout_ms: default_notification_timeout_ms(),
        }
    }
}

fn default_notification_url() -> String {
    "http://localhost:48060/api/v1/notification".to_string()
}

fn default_notification_category() -> String {
    "SECURITY".to_string()
}

fn default_notification_severity() -> String {
    "CRITICAL".to_string()
}

fn default_notification_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

fn default_metrics_interval() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub filters: FiltersConfig,
    pub recording: RecordingConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub sensors: Vec<Sensor>,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    service_name: String,
    config_file: String,
    mqtt: MqttConfig,
    sku_filter: TagFilter,
    epc_filter: TagFilter,
    recording: RecordingConfig,
    detectors: Vec<DetectorSettings>,
    notification: NotificationConfig,
    metrics_interval_secs: u64,
    sensors: Vec<Sensor>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            config_file: "default".to_string(),
            mqtt: MqttConfig {
                host: "localhost".to_string(),
                port: 1883,
                client_id: default_client_id(),
                data_topic: default_data_topic(),
                sensor_topic: default_sensor_topic(),
                username: None,
                password: None,
            },
            sku_filter: TagFilter::default(),
            epc_filter: TagFilter::default(),
            recording: RecordingConfig {
                video_device: "/dev/video0".to_string(),
                duration_secs: 15.0,
                output_root: default_output_root(),
                video_extension: default_video_extension(),
                output_codec: default_output_codec(),
                fps: default_fps(),
                width: default_width(),
                height: default_height(),
                capture_fourcc: "MJPG".to_string(),
                capture_buffer_size: default_capture_buffer_size(),
                thumbnail_height: default_thumbnail_height(),
                image_process_scale: default_image_process_scale(),
                save_detections: true,
                live_view: false,
                fullscreen_view: false,
                show_debug_stats: false,
                startup_self_test: false,
            },
            detectors: Vec::new(),
            notification: NotificationConfig::default(),
            metrics_interval_secs: default_metrics_interval(),
            sensors: Vec::new(),
        }
    }
}

/// Pattern a tag field must match; unset matches everything
#[derive(Debug, Clone, Default)]
pub struct TagFilter(Option<Regex>);

impl TagFilter {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(|re| Self(Some(re)))
    }

    pub fn is_match(&self, value: &str) -> bool {
        self.0.as_ref().map_or(true, |re| re.is_match(value))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_ref().map_or(".*", |re| re.as_str())
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let mut config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.config_file = path.display().to_string();
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let toml_config: TomlConfig = toml::from_str(content)?;

        let sku_filter = TagFilter::new(&toml_config.filters.sku)
            .with_context(|| format!("Invalid sku filter {:?}", toml_config.filters.sku))?;
        let epc_filter = TagFilter::new(&toml_config.filters.epc)
            .with_context(|| format!("Invalid epc filter {:?}", toml_config.filters.epc))?;

        let detection = &toml_config.detection;
        let detectors = [
            (FACE, &detection.face),
            (PROFILE_FACE, &detection.profile_face),
            (UPPER_BODY, &detection.upper_body),
            (FULL_BODY, &detection.full_body),
            (EYE, &detection.eye),
        ]
        .into_iter()
        .filter(|(_, category)| category.enabled)
        .map(|(defaults, category)| {
            DetectorSettings::resolve(&detection.cascade_folder, defaults, category)
        })
        .collect();

        Ok(Self {
            service_name: toml_config.service.name,
            config_file: "inline".to_string(),
            mqtt: toml_config.mqtt,
            sku_filter,
            epc_filter,
            recording: toml_config.recording,
            detectors,
            notification: toml_config.notification,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            sensors: toml_config.sensors,
        })
    }

    /// Load configuration from a path, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    pub fn mqtt(&self) -> &MqttConfig {
        &self.mqtt
    }

    pub fn sku_filter(&self) -> &TagFilter {
        &self.sku_filter
    }

    pub fn epc_filter(&self) -> &TagFilter {
        &self.epc_filter
    }

    pub fn recording(&self) -> &RecordingConfig {
        &self.recording
    }

    /// Enabled detection categories, in category order
    pub fn detectors(&self) -> &[DetectorSettings] {
        &self.detectors
    }

    pub fn notification(&self) -> &NotificationConfig {
        &self.notification
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn sensors(&self) -> &[Sensor] {
        &self.sensors
    }

    /// Path of the video file inside a session folder
    pub fn video_file_name(&self) -> String {
        format!("video{}", self.recording.video_extension)
    }

    /// Builder method for tests to replace the recording section
    pub fn with_recording(mut self, recording: RecordingConfig) -> Self {
        self.recording = recording;
        self
    }

    /// Builder method for tests to replace the enabled detectors
    pub fn with_detectors(mut self, detectors: Vec<DetectorSettings>) -> Self {
        self.detectors = detectors;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[mqtt]
host = "broker"
port = 1883

[recording]
video_device = "/dev/video2"
duration_secs = 5
"#;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.mqtt().host, "localhost");
        assert_eq!(config.recording().fps, 15.0);
        assert_eq!(config.recording().image_process_scale, 2);
        assert!(config.detectors().is_empty());
        assert!(config.sku_filter().is_match("anything"));
        assert_eq!(config.video_file_name(), "video.mp4");
    }

    #[test]
    fn test_minimal_file_uses_defaults() {
        let config = Config::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.recording().video_device, "/dev/video2");
        assert_eq!(config.recording().duration_secs, 5.0);
        assert_eq!(config.recording().thumbnail_height, 150);
        assert_eq!(config.mqtt().data_topic, "rfid/inventory/events");
        assert!(!config.notification().enabled);
        assert!(config.sensors().is_empty());
    }

    #[test]
    fn test_disabled_categories_are_omitted() {
        let content = format!(
            "{MINIMAL}
[detection]
cascade_folder = \"/cascades\"

[detection.face]
enabled = true
color = 0x112233

[detection.upper_body]
enabled = false

[detection.eye]
enabled = true
file = \"eyes.xml\"
"
        );
        let config = Config::from_toml_str(&content).unwrap();
        let names: Vec<&str> = config.detectors().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["face", "eye"]);

        let face = &config.detectors()[0];
        assert_eq!(face.source_file, PathBuf::from("/cascades/haarcascade_frontalface_default.xml"));
        assert_eq!(face.color, 0x112233);
        assert_eq!(face.params, FACE.params);

        let eye = &config.detectors()[1];
        assert_eq!(eye.source_file, PathBuf::from("/cascades/eyes.xml"));
        assert!(eye.render_as_circle);
    }

    #[test]
    fn test_params_override() {
        let content = format!(
            "{MINIMAL}
[detection.full_body]
enabled = true

[detection.full_body.params]
scale_factor = 1.1
min_neighbors = 3
"
        );
        let config = Config::from_toml_str(&content).unwrap();
        let params = config.detectors()[0].params;
        assert_eq!(params.scale_factor, 1.1);
        assert_eq!(params.min_neighbors, 3);
        assert_eq!(params.max_width_fraction, 0.0);
    }

    #[test]
    fn test_invalid_filter_is_rejected() {
        let content = format!("{MINIMAL}\n[filters]\nsku = \"([\"\n");
        assert!(Config::from_toml_str(&content).is_err());
    }

    #[test]
    fn test_detect_params_zero_value() {
        assert!(DetectParams::default().is_default());
        assert!(!FACE.params.is_default());
    }
}
