//! Unit tests for configuration parsing, validation, and pool sizing.

use std::io::Write;
use std::time::Duration;

use plugin_uplink::{UplinkConfig, UplinkError};

#[test]
fn minimal_config_applies_defaults() {
    let config = UplinkConfig::from_toml_str(r#"endpoint = "orchestrator:7001""#).expect("parse");

    assert_eq!(config.retry_interval(), Duration::from_secs(5));
    assert_eq!(config.heartbeat_interval(), Duration::from_secs(30));
    assert_eq!(config.heartbeat_failure_threshold, 3);
    assert_eq!(config.shutdown_grace(), Duration::from_secs(10));
    assert!(config.max_pool_size() >= 1, "auto-sized pool is never zero");
}

#[test]
fn pool_sizing_follows_core_formula() {
    let config = UplinkConfig::from_toml_str(
        r#"
endpoint = "orchestrator:7001"
worker_threads = 8
"#,
    )
    .expect("parse");

    assert_eq!(config.max_pool_size(), 8);
    assert_eq!(config.core_pool_size(), 5); // 8/2 + 1
    assert_eq!(config.queue_capacity(), 5);
}

#[test]
fn single_worker_pool_has_unit_queue() {
    let config = UplinkConfig::from_toml_str(
        r#"
endpoint = "orchestrator:7001"
worker_threads = 1
"#,
    )
    .expect("parse");

    assert_eq!(config.max_pool_size(), 1);
    assert_eq!(config.core_pool_size(), 1);
    assert_eq!(config.queue_capacity(), 1);
}

#[test]
fn empty_endpoint_is_rejected() {
    let result = UplinkConfig::from_toml_str(r#"endpoint = "  ""#);
    assert!(matches!(result, Err(UplinkError::Config(_))));
}

#[test]
fn zero_intervals_are_rejected() {
    for field in [
        "retry_interval_seconds",
        "heartbeat_interval_seconds",
        "heartbeat_failure_threshold",
    ] {
        let raw = format!("endpoint = \"orchestrator:7001\"\n{field} = 0\n");
        let result = UplinkConfig::from_toml_str(&raw);
        assert!(
            matches!(result, Err(UplinkError::Config(_))),
            "{field} = 0 must fail validation"
        );
    }
}

#[test]
fn invalid_toml_is_a_config_error() {
    let result = UplinkConfig::from_toml_str("endpoint = [broken");
    assert!(matches!(result, Err(UplinkError::Config(_))));
}

#[test]
fn load_from_path_reads_a_file() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    writeln!(file, "endpoint = \"orchestrator:7001\"").expect("write");
    writeln!(file, "retry_interval_seconds = 2").expect("write");

    let config = UplinkConfig::load_from_path(file.path()).expect("load");
    assert_eq!(config.endpoint, "orchestrator:7001");
    assert_eq!(config.retry_interval(), Duration::from_secs(2));
}

#[test]
fn load_from_missing_path_is_a_config_error() {
    let result = UplinkConfig::load_from_path("/nonexistent/uplink.toml");
    assert!(matches!(result, Err(UplinkError::Config(_))));
}
