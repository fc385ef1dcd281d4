//! Integration tests for the configuration file.

use deskbike::metrics::accumulator::AccumulatorSettings;
use deskbike::sensors::types::LinkConfig;
use deskbike::storage::config::{
    load_config_from, save_config, save_rider, AppConfig, RiderConfig, DEFAULT_WEIGHT_KG,
};

#[test]
fn test_missing_file_gives_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config_from(&dir.path().join("config.toml")).unwrap();

    assert_eq!(config.device, LinkConfig::default());
    assert_eq!(config.accumulator, AccumulatorSettings::default());
    assert!(!config.mqtt.enabled);
    assert_eq!(config.rider.to_rider_config(), RiderConfig::default());
}

#[test]
fn test_partial_file_fills_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[device]
address = "C4:12:9A:00:3B:7E"

[rider]
weight_kg = 82.5

[mqtt]
enabled = true
broker_host = "homeassistant.local"
topic_prefix = "home/deskbike"
"#,
    )
    .unwrap();

    let config = load_config_from(&path).unwrap();

    assert_eq!(config.device.address.as_deref(), Some("C4:12:9A:00:3B:7E"));
    assert_eq!(config.device.retry_interval_secs, 60);
    assert!(config.mqtt.enabled);
    assert_eq!(config.mqtt.broker_port, 1883);
    assert_eq!(config.mqtt.command_topic(), "home/deskbike/command");
    assert_eq!(config.storage.autosave_interval_secs, 300);

    let rider = config.rider.to_rider_config();
    assert_eq!(rider.weight_kg, 82.5);
    assert_eq!(rider.resistance_percent, 100.0);
}

#[test]
fn test_invalid_rider_weight_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[rider]\nweight_kg = 0.0\nresistance_percent = 35.0\n").unwrap();

    let rider = load_config_from(&path).unwrap().rider.to_rider_config();

    assert_eq!(rider.weight_kg, DEFAULT_WEIGHT_KG);
    assert_eq!(rider.resistance_percent, 35.0);
}

#[test]
fn test_malformed_file_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[rider\nweight_kg = ").unwrap();

    assert!(load_config_from(&path).is_err());
}

#[test]
fn test_save_and_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = AppConfig::default();
    config.rider.weight_kg = Some(64.0);
    config.accumulator.wrap_tolerance = 2048;
    config.mqtt.enabled = true;

    save_config(&config, &path).unwrap();
    let loaded = load_config_from(&path).unwrap();

    assert_eq!(loaded, config);
}

#[test]
fn test_save_rider_creates_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    let rider = RiderConfig {
        weight_kg: 91.0,
        resistance_percent: 60.0,
    };

    save_rider(&rider, &path).unwrap();

    let loaded = load_config_from(&path).unwrap();
    assert_eq!(loaded.rider.to_rider_config(), rider);
    assert_eq!(loaded.device, AppConfig::default().device);
}
