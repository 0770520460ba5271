//! Tests for configuration validation

use std::path::PathBuf;

use prometheus_process_pool::config::{PoolConfig, DEFAULT_POOL_SIZE};

#[test]
fn test_pool_config_defaults() {
    let cfg = PoolConfig::default();
    assert_eq!(cfg.size, DEFAULT_POOL_SIZE);
    assert!(cfg.working_directory.is_none());
    assert!(cfg.environment.is_none());
    assert!(cfg.extra_args.is_empty());
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_pool_config_from_json() {
    let cfg = PoolConfig::from_json_str(
        r#"{
            "size": 3,
            "working_directory": "/srv/app",
            "environment": {"MODE": "batch"},
            "extra_args": ["--quiet"],
            "hardware_concurrency": 2
        }"#,
    )
    .unwrap();

    assert_eq!(cfg.size, 3);
    assert_eq!(cfg.working_directory, Some(PathBuf::from("/srv/app")));
    assert_eq!(cfg.extra_args, vec!["--quiet".to_string()]);
    assert_eq!(cfg.effective_size(), 2);

    let options = cfg.spawn_options();
    assert_eq!(
        options.environment.unwrap().get("MODE").map(String::as_str),
        Some("batch")
    );
}

#[test]
fn test_pool_config_partial_json_uses_defaults() {
    let cfg = PoolConfig::from_json_str(r#"{"extra_args": ["-v"]}"#).unwrap();
    assert_eq!(cfg.size, DEFAULT_POOL_SIZE);
    assert_eq!(cfg.extra_args, vec!["-v".to_string()]);
}

#[test]
fn test_pool_config_invalid_json() {
    assert!(PoolConfig::from_json_str("{not json").is_err());
    assert!(PoolConfig::from_json_str(r#"{"hardware_concurrency": 0}"#).is_err());
}

#[test]
fn test_pool_config_invalid_working_directory() {
    let cfg = PoolConfig::new().with_working_directory("");
    assert!(cfg.validate().is_err());
}
