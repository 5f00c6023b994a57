//! # Configuration Management
//!
//! Centralized configuration for the login and channel servers.
//!
//! ## Configuration Sources
//! - TOML files via [`ServerConfig::from_file`]
//! - Direct instantiation with defaults
//! - `GAMESERVER_*` environment overrides via [`ServerConfig::from_env`]
//!
//! ## Compatibility Constants
//! The game version, patch string and locale must match the client build
//! exactly; a mismatch makes every header fail version validation.

use crate::error::{Result, ServerError};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Map every character falls back to when its own map cannot be resolved.
pub const DEFAULT_MAP_ID: i32 = 100_000_000;

/// First object id a field hands out.
pub const OBJECT_ID_SEED: i32 = 1000;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Client compatibility constants
    #[serde(default)]
    pub game: GameConfig,

    /// Login listener
    #[serde(default)]
    pub login: LoginConfig,

    /// Channel listeners
    #[serde(default = "default_channels")]
    pub channels: Vec<ChannelConfig>,

    /// Deadlines and intervals
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Field simulation settings
    #[serde(default)]
    pub world: WorldConfig,

    /// Collaborator locations
    #[serde(default)]
    pub storage: StorageConfig,

    /// Rate multipliers
    #[serde(default)]
    pub rates: RateConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            game: GameConfig::default(),
            login: LoginConfig::default(),
            channels: default_channels(),
            timeouts: TimeoutConfig::default(),
            world: WorldConfig::default(),
            storage: StorageConfig::default(),
            rates: RateConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_channels() -> Vec<ChannelConfig> {
    vec![
        ChannelConfig {
            world_id: 0,
            channel_id: 0,
            address: String::from("127.0.0.1:7575"),
        },
        ChannelConfig {
            world_id: 0,
            channel_id: 1,
            address: String::from("127.0.0.1:7576"),
        },
    ]
}

impl ServerConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ServerError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ServerError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ServerError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Defaults overridden by `GAMESERVER_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply environment-style overrides from an arbitrary lookup.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("GAMESERVER_GAME_VERSION").and_then(|v| v.parse().ok()) {
            self.game.version = v;
        }
        if let Some(v) = lookup("GAMESERVER_PATCH") {
            self.game.patch = v;
        }
        if let Some(v) = lookup("GAMESERVER_LOCALE").and_then(|v| v.parse().ok()) {
            self.game.locale = v;
        }
        if let Some(v) = lookup("GAMESERVER_LOGIN_ADDRESS") {
            self.login.address = v;
        }
        if let Some(v) = lookup("GAMESERVER_WORLD_NAME") {
            self.login.world_name = v;
        }
        if let Some(v) = lookup("GAMESERVER_CHANNEL_BASE_PORT").and_then(|v| v.parse::<u16>().ok())
        {
            for (i, channel) in self.channels.iter_mut().enumerate() {
                if let Ok(mut addr) = channel.address.parse::<SocketAddr>() {
                    addr.set_port(v.saturating_add(i as u16));
                    channel.address = addr.to_string();
                }
            }
        }
        if let Some(v) = lookup("GAMESERVER_DATABASE_URL") {
            self.storage.database_url = v;
        }
        if let Some(v) = lookup("GAMESERVER_WZ_PATH") {
            self.storage.wz_path = v;
        }
        if let Some(v) = lookup("GAMESERVER_SCRIPT_PATH") {
            self.storage.script_path = v;
        }
        if let Some(v) = lookup("GAMESERVER_SEED_FILE") {
            self.storage.seed_file = Some(v);
        }
        if let Some(v) = lookup("GAMESERVER_EXP_RATE").and_then(|v| v.parse().ok()) {
            self.rates.exp = v;
        }
        if let Some(v) = lookup("GAMESERVER_MESO_RATE").and_then(|v| v.parse().ok()) {
            self.rates.meso = v;
        }
        if let Some(v) = lookup("GAMESERVER_DROP_RATE").and_then(|v| v.parse().ok()) {
            self.rates.drop = v;
        }
        if let Some(v) = lookup("GAMESERVER_READ_IDLE_MS").and_then(|v| v.parse::<u64>().ok()) {
            self.timeouts.read_idle = Duration::from_millis(v);
        }
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ServerError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ServerError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Channel entry for a world/channel pair
    pub fn channel(&self, world_id: u8, channel_id: u8) -> Option<&ChannelConfig> {
        self.channels
            .iter()
            .find(|c| c.world_id == world_id && c.channel_id == channel_id)
    }

    /// Channels belonging to one world, in channel order
    pub fn world_channels(&self, world_id: u8) -> Vec<&ChannelConfig> {
        let mut channels: Vec<_> = self
            .channels
            .iter()
            .filter(|c| c.world_id == world_id)
            .collect();
        channels.sort_by_key(|c| c.channel_id);
        channels
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        errors.extend(self.game.validate());
        errors.extend(self.login.validate());

        if self.channels.is_empty() {
            errors.push("At least one channel must be configured".to_string());
        }
        for channel in &self.channels {
            errors.extend(channel.validate());
        }
        for (i, a) in self.channels.iter().enumerate() {
            for b in &self.channels[i + 1..] {
                if a.world_id == b.world_id && a.channel_id == b.channel_id {
                    errors.push(format!(
                        "Duplicate channel {}/{}",
                        a.world_id, a.channel_id
                    ));
                }
                if a.address == b.address {
                    errors.push(format!("Channels share address '{}'", a.address));
                }
            }
            if a.address == self.login.address {
                errors.push(format!(
                    "Channel {}/{} shares the login address",
                    a.world_id, a.channel_id
                ));
            }
        }

        errors.extend(self.timeouts.validate());
        errors.extend(self.world.validate());
        errors.extend(self.rates.validate());
        errors.extend(self.logging.validate());

        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ServerError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Client compatibility constants
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GameConfig {
    /// Major client version
    pub version: u16,
    /// Minor patch string sent in the handshake
    pub patch: String,
    /// Client locale byte
    pub locale: u8,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            version: 83,
            patch: String::from("1"),
            locale: 8,
        }
    }
}

impl GameConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.version == 0 {
            errors.push("Game version cannot be 0".to_string());
        }
        if self.patch.is_empty() {
            errors.push("Patch string cannot be empty".to_string());
        } else if self.patch.len() > u16::MAX as usize {
            errors.push("Patch string too long".to_string());
        }
        errors
    }
}

/// Login listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoginConfig {
    /// Listen address (e.g., "0.0.0.0:8484")
    pub address: String,
    /// World name shown in the world list
    pub world_name: String,
    /// Event message shown under the world list
    pub event_message: String,
    /// Per-connection outbound queue depth
    pub send_queue: usize,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:8484"),
            world_name: String::from("Scania"),
            event_message: String::new(),
            send_queue: 256,
        }
    }
}

impl LoginConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.address.parse::<SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid login address format: '{}' (expected format: '0.0.0.0:8484')",
                self.address
            ));
        }
        if self.world_name.is_empty() {
            errors.push("World name cannot be empty".to_string());
        }
        if self.send_queue == 0 {
            errors.push("Send queue must be greater than 0".to_string());
        }
        errors
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.address.parse().map_err(|e| {
            ServerError::ConfigError(format!("Invalid login address '{}': {e}", self.address))
        })
    }
}

/// One channel listener
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ChannelConfig {
    pub world_id: u8,
    pub channel_id: u8,
    /// Listen address, also advertised to clients on redirect
    pub address: String,
}

impl ChannelConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        match self.address.parse::<SocketAddr>() {
            Ok(addr) if addr.ip().is_unspecified() => errors.push(format!(
                "Channel {}/{} advertises an unspecified address '{}'",
                self.world_id, self.channel_id, self.address
            )),
            Ok(addr) if !addr.is_ipv4() => errors.push(format!(
                "Channel {}/{} address must be IPv4: '{}'",
                self.world_id, self.channel_id, self.address
            )),
            Ok(_) => {}
            Err(_) => errors.push(format!(
                "Invalid channel address format: '{}'",
                self.address
            )),
        }
        errors
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.address.parse().map_err(|e| {
            ServerError::ConfigError(format!("Invalid channel address '{}': {e}", self.address))
        })
    }
}

/// Deadlines and intervals
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutConfig {
    #[serde(with = "duration_serde")]
    pub read_idle: Duration,
    #[serde(with = "duration_serde")]
    pub write: Duration,
    #[serde(with = "duration_serde")]
    pub dialog: Duration,
    #[serde(with = "duration_serde")]
    pub migration_ttl: Duration,
    #[serde(with = "duration_serde")]
    pub migration_sweep: Duration,
    #[serde(with = "duration_serde")]
    pub field_tick: Duration,
    #[serde(with = "duration_serde")]
    pub keepalive: Duration,
    #[serde(with = "duration_serde")]
    pub shutdown: Duration,
    #[serde(with = "duration_serde")]
    pub metrics_interval: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            read_idle: timeout::READ_IDLE_TIMEOUT,
            write: timeout::WRITE_TIMEOUT,
            dialog: timeout::DIALOG_TIMEOUT,
            migration_ttl: timeout::MIGRATION_TTL,
            migration_sweep: timeout::MIGRATION_SWEEP_INTERVAL,
            field_tick: timeout::FIELD_TICK_INTERVAL,
            keepalive: timeout::KEEPALIVE_INTERVAL,
            shutdown: timeout::SHUTDOWN_TIMEOUT,
            metrics_interval: Duration::from_secs(60),
        }
    }
}

impl TimeoutConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let positive = [
            ("read_idle", self.read_idle),
            ("write", self.write),
            ("dialog", self.dialog),
            ("migration_ttl", self.migration_ttl),
            ("migration_sweep", self.migration_sweep),
            ("field_tick", self.field_tick),
            ("keepalive", self.keepalive),
            ("metrics_interval", self.metrics_interval),
        ];
        for (name, value) in positive {
            if value.is_zero() {
                errors.push(format!("Timeout '{name}' must be greater than 0"));
            }
        }
        if self.field_tick < Duration::from_millis(10) {
            errors.push("Field tick too short (minimum: 10ms)".to_string());
        }
        if self.keepalive >= self.read_idle {
            errors.push("Keepalive interval must be shorter than the read idle timeout".to_string());
        }
        errors
    }
}

/// Field simulation settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorldConfig {
    /// Map used when a character's own map cannot be resolved
    pub default_map: i32,
    /// First object id handed out by a field
    pub object_id_seed: i32,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            default_map: DEFAULT_MAP_ID,
            object_id_seed: OBJECT_ID_SEED,
        }
    }
}

impl WorldConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.default_map < 0 {
            errors.push("Default map id cannot be negative".to_string());
        }
        if self.object_id_seed < 1 {
            errors.push("Object id seed must be positive".to_string());
        }
        errors
    }
}

/// Collaborator locations
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    pub database_url: String,
    /// Directory holding map data (`maps.toml`)
    pub wz_path: String,
    pub script_path: String,
    /// Optional TOML file with accounts and characters to preload
    pub seed_file: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: String::from("memory://"),
            wz_path: String::from("data/wz"),
            script_path: String::from("data/scripts"),
            seed_file: None,
        }
    }
}

/// Rate multipliers
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateConfig {
    pub exp: u32,
    pub meso: u32,
    pub drop: u32,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            exp: 1,
            meso: 1,
            drop: 1,
        }
    }
}

impl RateConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        for (name, value) in [("exp", self.exp), ("meso", self.meso), ("drop", self.drop)] {
            if value == 0 {
                errors.push(format!("Rate '{name}' must be at least 1"));
            } else if value > 1000 {
                errors.push(format!("Rate '{name}' too large: {value} (maximum: 1000)"));
            }
        }
        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,

    /// Whether to print the event target
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("legacy-gameserver"),
            log_level: Level::INFO,
            json_format: false,
            with_target: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
