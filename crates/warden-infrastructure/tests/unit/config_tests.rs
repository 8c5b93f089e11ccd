//! Configuration loading and validation.

use std::io::Write;

use warden_infrastructure::config::{AppConfig, ConfigLoader};

#[test]
fn defaults_are_valid() {
    let config = AppConfig::default();
    config.validate().unwrap();
    assert_eq!(config.process.poll_interval_secs, 5);
    assert_eq!(config.dns.upstream_servers.len(), 2);
    assert_eq!(config.quota.flush_interval_secs, 5);
}

#[test]
fn loads_a_partial_yaml_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "process:\n  poll_interval_secs: 10\ndns:\n  block_unknown: true\n  cache_ttl_secs: 60"
    )
    .unwrap();

    let config = ConfigLoader::new()
        .with_config_path(file.path())
        .load()
        .unwrap();
    assert_eq!(config.process.poll_interval_secs, 10);
    assert!(config.dns.block_unknown);
    assert_eq!(config.dns.cache_ttl_secs, 60);
    // Untouched sections keep their defaults.
    assert_eq!(config.process.max_concurrent_checks, 8);
}

#[test]
fn missing_explicit_file_is_an_error() {
    let result = ConfigLoader::new()
        .with_config_path("/nonexistent/warden.yaml")
        .load();
    assert!(result.is_err());
}

#[test]
fn unknown_keys_are_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "process:\n  pol_interval_secs: 10").unwrap();
    assert!(
        ConfigLoader::new()
            .with_config_path(file.path())
            .load()
            .is_err()
    );
}

#[test]
fn zero_poll_interval_is_rejected() {
    let mut config = AppConfig::default();
    config.process.poll_interval_secs = 0;
    assert!(config.validate().is_err());
}

#[test]
fn empty_upstreams_are_rejected() {
    let mut config = AppConfig::default();
    config.dns.upstream_servers.clear();
    assert!(config.validate().is_err());
}

#[test]
fn emergency_mode_excludes_log_all_activity() {
    let mut config = AppConfig::default();
    config.service.emergency_mode = true;
    config.validate().unwrap();

    config.service.log_all_activity = true;
    assert!(config.validate().is_err());
}

#[test]
fn bad_log_level_is_rejected() {
    let mut config = AppConfig::default();
    config.logging.level = "verbose".to_owned();
    assert!(config.validate().is_err());
}
