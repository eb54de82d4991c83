//! Integration tests for configuration loading

use loss_prevention::domain::{Personality, Sensor};
use loss_prevention::infra::Config;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[service]
name = "store-42"

[mqtt]
host = "test-host"
port = 1884
data_topic = "test/events"
sensor_topic = "test/sensors"

[filters]
sku = "^0088"

[recording]
video_device = "/dev/video1"
duration_secs = 7.5
output_root = "/tmp/clips"
video_extension = ".avi"
fps = 30
image_process_scale = 4

[detection.face]
enabled = true

[notification]
enabled = true
url = "http://notify:48060/api/v1/notification"
severity = "NORMAL"

[metrics]
interval_secs = 15

[[sensors]]
device_id = "RSP-150009"
facility_id = "front"
personality = "EXIT"
aliases = ["door-left", "door-right"]
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.service_name(), "store-42");
    assert_eq!(config.config_file(), temp_file.path().display().to_string());
    assert_eq!(config.mqtt().host, "test-host");
    assert_eq!(config.mqtt().port, 1884);
    assert_eq!(config.mqtt().sensor_topic, "test/sensors");
    assert!(config.sku_filter().is_match("00888446671424"));
    assert!(!config.sku_filter().is_match("12345"));
    assert!(config.epc_filter().is_match("anything"));
    assert_eq!(config.recording().duration_secs, 7.5);
    assert_eq!(config.recording().fps, 30.0);
    assert_eq!(config.recording().image_process_scale, 4);
    assert_eq!(config.video_file_name(), "video.avi");
    assert_eq!(config.detectors().len(), 1);
    assert!(config.notification().enabled);
    assert_eq!(config.notification().severity, "NORMAL");
    assert_eq!(config.notification().category, "SECURITY");
    assert_eq!(config.metrics_interval_secs(), 15);

    let sensor = &config.sensors()[0];
    assert_eq!(sensor.personality, Personality::Exit);
    assert_eq!(sensor.antenna_alias(1), "door-right");
    assert_eq!(sensor.antenna_alias(2), "RSP-150009-2");
}

#[test]
fn test_dev_config_parses() {
    let config = Config::from_file("config/dev.toml").unwrap();
    assert_eq!(config.recording().video_device, "/dev/video0");
    assert!(config.recording().startup_self_test);
    assert_eq!(config.detectors().len(), 3);
    assert_eq!(config.sensors().len(), 2);
    assert_eq!(config.sensors()[0].device_id, "RSP-150000");
    assert_eq!(config.sensors()[0].antenna_alias(0), Sensor::new("RSP-150000").antenna_alias(0));
    assert!(config.sensors()[1].is_exit());
}

#[test]
fn test_invalid_filter_fails_to_load() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file
        .write_all(b"[mqtt]\nhost = \"h\"\nport = 1883\n[filters]\nepc = \"(unclosed\"\n[recording]\nvideo_device = \"/dev/video0\"\nduration_secs = 1\n")
        .unwrap();
    temp_file.flush().unwrap();

    assert!(Config::from_file(temp_file.path()).is_err());
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.mqtt().host, "localhost");
    assert_eq!(config.mqtt().port, 1883);
    assert_eq!(config.recording().video_device, "/dev/video0");
    assert!(config.sensors().is_empty());
}
