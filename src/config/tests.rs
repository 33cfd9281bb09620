//! Tests for config functionality.

use crate::config::LockConfig;
use crate::error::LockError;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_default_config() {
    let config = LockConfig::default();

    assert_eq!(config.check_interval(), Duration::from_secs(60));
    assert_eq!(config.uncertain_check_interval(), Duration::from_secs(20));
    assert_eq!(config.reassert_delay(), Duration::from_millis(100));
    assert_eq!(config.message_timeout(), Duration::from_secs(4));
    assert_eq!(config.accept_poll(), Duration::from_millis(50));
    assert!(config.listen_for_lost_lock);
    assert!(config.validate().is_ok());
}

#[test]
fn test_parse_minimal_yaml() {
    let config = LockConfig::from_yaml("").unwrap();
    assert_eq!(config, LockConfig::default());
}

#[test]
fn test_parse_partial_yaml() {
    let yaml = r#"
check_interval_secs: 5
message_timeout_ms: 250
"#;
    let config = LockConfig::from_yaml(yaml).unwrap();

    assert_eq!(config.check_interval_secs, 5);
    assert_eq!(config.message_timeout_ms, 250);

    // Unspecified values should use defaults
    assert_eq!(config.uncertain_check_interval_secs, 20);
    assert_eq!(config.reassert_delay_ms, 100);
    assert!(config.listen_for_lost_lock);
}

#[test]
fn test_unknown_fields_are_ignored() {
    let yaml = r#"
reassert_delay_ms: 10
some_future_setting: true
"#;
    let config = LockConfig::from_yaml(yaml).unwrap();
    assert_eq!(config.reassert_delay_ms, 10);
}

#[test]
fn test_zero_intervals_rejected() {
    for yaml in [
        "check_interval_secs: 0",
        "uncertain_check_interval_secs: 0",
        "message_timeout_ms: 0",
        "accept_poll_ms: 0",
    ] {
        let result = LockConfig::from_yaml(yaml);
        assert!(
            matches!(result, Err(LockError::Config(_))),
            "expected config error for {yaml}"
        );
    }
}

#[test]
fn test_zero_reassert_delay_allowed() {
    let config = LockConfig::from_yaml("reassert_delay_ms: 0").unwrap();
    assert_eq!(config.reassert_delay(), Duration::ZERO);
}

#[test]
fn test_invalid_yaml_is_config_error() {
    let result = LockConfig::from_yaml("check_interval_secs: [not, a, number]");
    assert!(matches!(result, Err(LockError::Config(_))));
}

#[test]
fn test_yaml_round_trip_through_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("dirlock.yaml");

    let config = LockConfig {
        check_interval_secs: 7,
        listen_for_lost_lock: false,
        ..LockConfig::default()
    };
    std::fs::write(&path, config.to_yaml().unwrap()).unwrap();

    let loaded = LockConfig::load(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_load_missing_file_fails() {
    let temp_dir = TempDir::new().unwrap();
    let result = LockConfig::load(temp_dir.path().join("missing.yaml"));
    let err = result.unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));
}

#[test]
fn test_zero_values_clamp_in_accessors() {
    let config = LockConfig {
        check_interval_secs: 0,
        uncertain_check_interval_secs: 0,
        accept_poll_ms: 0,
        message_timeout_ms: 0,
        reassert_delay_ms: 0,
        listen_for_lost_lock: true,
    };
    assert!(config.validate().is_err());

    assert_eq!(config.check_interval(), Duration::from_secs(1));
    assert_eq!(config.uncertain_check_interval(), Duration::from_secs(1));
    assert_eq!(config.accept_poll(), Duration::from_millis(1));
    assert_eq!(config.message_timeout(), Duration::from_millis(1));
    assert_eq!(config.reassert_delay(), Duration::ZERO);
}
