//! Integration tests for configuration validation

#![allow(clippy::expect_used)]

use std::collections::HashMap;
use std::time::Duration;

use legacy_gameserver::config::{ChannelConfig, ServerConfig};
use legacy_gameserver::ServerError;

fn channel(world_id: u8, channel_id: u8, address: &str) -> ChannelConfig {
    ChannelConfig {
        world_id,
        channel_id,
        address: address.to_string(),
    }
}

fn has_error(config: &ServerConfig, needle: &str) -> bool {
    config.validate().iter().any(|e| e.contains(needle))
}

#[test]
fn test_default_config_validates() {
    let config = ServerConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
    assert!(config.validate_strict().is_ok());
}

#[test]
fn test_no_channels() {
    let mut config = ServerConfig::default();
    config.channels.clear();
    assert!(has_error(&config, "At least one channel must be configured"));
}

#[test]
fn test_invalid_login_address() {
    let mut config = ServerConfig::default();
    config.login.address = "invalid_address".to_string();
    assert!(has_error(&config, "Invalid login address format"));
}

#[test]
fn test_duplicate_channel() {
    let mut config = ServerConfig::default();
    config.channels.push(channel(0, 1, "127.0.0.1:7600"));
    assert!(has_error(&config, "Duplicate channel 0/1"));
}

#[test]
fn test_channels_sharing_an_address() {
    let mut config = ServerConfig::default();
    config.channels.push(channel(0, 2, "127.0.0.1:7575"));
    assert!(has_error(&config, "Channels share address"));
}

#[test]
fn test_channel_must_be_ipv4() {
    let mut config = ServerConfig::default();
    config.channels.push(channel(0, 2, "[::1]:7577"));
    assert!(has_error(&config, "must be IPv4"));
}

#[test]
fn test_unspecified_channel_address() {
    let mut config = ServerConfig::default();
    config.channels.push(channel(0, 2, "0.0.0.0:7577"));
    assert!(has_error(&config, "unspecified address"));
}

#[test]
fn test_short_field_tick() {
    let mut config = ServerConfig::default();
    config.timeouts.field_tick = Duration::from_millis(5);
    assert!(has_error(&config, "Field tick too short (minimum: 10ms)"));
}

#[test]
fn test_keepalive_must_beat_idle_timeout() {
    let mut config = ServerConfig::default();
    config.timeouts.keepalive = config.timeouts.read_idle;
    assert!(has_error(
        &config,
        "Keepalive interval must be shorter than the read idle timeout"
    ));
}

#[test]
fn test_zero_timeout() {
    let mut config = ServerConfig::default();
    config.timeouts.migration_ttl = Duration::ZERO;
    assert!(config
        .validate()
        .iter()
        .any(|e| e.starts_with("Timeout") && e.contains("must be greater than 0")));
}

#[test]
fn test_zero_rate() {
    let mut config = ServerConfig::default();
    config.rates.exp = 0;
    assert!(has_error(&config, "Rate 'exp' must be at least 1"));
}

#[test]
fn test_multiple_errors_are_all_reported() {
    let mut config = ServerConfig::default();
    config.login.address = "nope".to_string();
    config.rates.meso = 0;
    config.logging.app_name = String::new();

    let errors = config.validate();
    assert!(errors.len() >= 3, "Should report every problem: {errors:?}");

    match config.validate_strict() {
        Err(ServerError::ConfigError(msg)) => {
            assert!(msg.contains("Configuration validation failed"));
            assert!(msg.contains("Application name cannot be empty"));
        }
        other => panic!("expected a config error, got {other:?}"),
    }
}

#[test]
fn test_toml_roundtrip_keeps_channels() {
    let text = ServerConfig::example_config();
    let parsed = ServerConfig::from_toml(&text).expect("example config should parse");
    assert_eq!(parsed.channels.len(), ServerConfig::default().channels.len());
    assert_eq!(parsed.timeouts.migration_ttl, Duration::from_secs(30));
    assert!(parsed.validate().is_empty());
}

#[test]
fn test_partial_toml_uses_defaults() {
    let parsed = ServerConfig::from_toml(
        r#"
        [rates]
        exp = 4
        meso = 1
        drop = 1
        "#,
    )
    .expect("partial config should parse");
    assert_eq!(parsed.rates.exp, 4);
    assert!(!parsed.channels.is_empty());
    assert!(parsed.validate().is_empty());
}

#[test]
fn test_malformed_toml_is_config_error() {
    assert!(matches!(
        ServerConfig::from_toml("channels = 3"),
        Err(ServerError::ConfigError(_))
    ));
}

#[test]
fn test_env_overrides() {
    let env: HashMap<&str, &str> = HashMap::from([
        ("GAMESERVER_EXP_RATE", "3"),
        ("GAMESERVER_CHANNEL_BASE_PORT", "9000"),
        ("GAMESERVER_READ_IDLE_MS", "60000"),
        ("GAMESERVER_WORLD_NAME", "Bera"),
    ]);
    let mut config = ServerConfig::default();
    config.apply_env(|key| env.get(key).map(|v| v.to_string()));

    assert_eq!(config.rates.exp, 3);
    assert_eq!(config.login.world_name, "Bera");
    assert_eq!(config.timeouts.read_idle, Duration::from_secs(60));
    assert_eq!(config.channels[0].address, "127.0.0.1:9000");
    assert_eq!(config.channels[1].address, "127.0.0.1:9001");
}

#[test]
fn test_channel_lookup() {
    let config = ServerConfig::default();
    assert!(config.channel(0, 1).is_some());
    assert!(config.channel(3, 1).is_none());
    let ids: Vec<u8> = config.world_channels(0).iter().map(|c| c.channel_id).collect();
    assert_eq!(ids, vec![0, 1]);
}
