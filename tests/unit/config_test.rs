//! Tests for configuration validation and overrides

use std::collections::HashMap;

use ingest_runtime::config::{
    env_key, ConfigError, PoolConfig, RuntimeConfig, WheelConfig, PARSING_SLOTS_PER_CORE,
};

fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |name| map.get(name).cloned()
}

#[test]
fn test_pool_config_validation() {
    assert!(PoolConfig::new(4, 0).validate().is_ok());
    assert!(PoolConfig::new(0, 10).validate().is_err());
    assert!(PoolConfig::new(1, 1).with_stack_size(0).validate().is_err());
    assert!(PoolConfig::new(1, 1).with_stack_size(256 * 1024).validate().is_ok());
}

#[test]
fn test_default_sizing_scales_with_cores() {
    let cpus = num_cpus::get();
    let config = RuntimeConfig::default();

    assert_eq!(config.parsing.capacity, PARSING_SLOTS_PER_CORE * cpus);
    assert_eq!(config.parsing.queue_limit, 100 * cpus);
    assert_eq!(config.writing.capacity, cpus);
    assert_eq!(config.writing.queue_limit, cpus);
    assert_eq!(config.wheel.tick_interval_ms, 1_000);
    assert_eq!(config.wheel.buckets, 512);
    assert!(config.validate().is_ok());
}

#[test]
fn test_parsing_pool_oversubscribed_by_default() {
    let parsing = PoolConfig::parsing_default();
    let writing = PoolConfig::writing_default();
    assert!(parsing.capacity > writing.capacity);
    assert!(parsing.queue_limit > writing.queue_limit);
}

#[test]
fn test_wheel_config_validation() {
    let mut config = WheelConfig::default();
    assert!(config.validate().is_ok());
    config.tick_interval_ms = 0;
    assert!(config.validate().is_err());

    let config = WheelConfig {
        dispatch_threads: 0,
        ..WheelConfig::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_from_json_with_partial_sections() {
    let config = RuntimeConfig::from_json_str(
        r#"{
            "wheel": { "tick_interval_ms": 250, "buckets": 128, "dispatch_threads": 2 },
            "writing": { "capacity": 3, "queue_limit": 6 }
        }"#,
    )
    .unwrap();

    assert_eq!(config.wheel.tick_interval_ms, 250);
    assert_eq!(config.writing, PoolConfig::new(3, 6));
    assert_eq!(config.parsing, PoolConfig::parsing_default());
}

#[test]
fn test_from_json_rejects_bad_input() {
    assert!(matches!(
        RuntimeConfig::from_json_str("{ not json"),
        Err(ConfigError::Parse(_))
    ));
    assert!(matches!(
        RuntimeConfig::from_json_str(r#"{ "parsing": { "capacity": 0, "queue_limit": 1 } }"#),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn test_overrides_use_upper_snake_case_keys() {
    assert_eq!(env_key("timer-tick-interval-ms"), "TIMER_TICK_INTERVAL_MS");

    let mut config = RuntimeConfig::default();
    config.apply_overrides(lookup(&[
        ("PARSING_CAPACITY", "6"),
        ("WRITING_QUEUE_LIMIT", "12"),
        ("TIMER_TICK_INTERVAL_MS", "200"),
    ]));

    assert_eq!(config.parsing.capacity, 6);
    assert_eq!(config.writing.queue_limit, 12);
    assert_eq!(config.wheel.tick_interval(), std::time::Duration::from_millis(200));
}

#[test]
fn test_unparseable_override_is_ignored() {
    let mut config = RuntimeConfig::default();
    let before = config.clone();
    config.apply_overrides(lookup(&[("WRITING_CAPACITY", "lots"), ("TIMER_BUCKETS", "-1")]));
    assert_eq!(config, before);
}
