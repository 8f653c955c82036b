//! # Configuration Management
//!
//! Centralized configuration for the world socket layer.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment overrides via `from_env()` (`REALM_GATE_*`)
//!
//! ## Sections
//! - `server`: listener address, connection cap, shutdown and store timeouts
//! - `world`: the server-wide values the handshake, keepalive monitor and
//!   dispatcher consult (accepted builds, expansion cap, security gate,
//!   overspeed-ping cap, malformed-packet policy)
//! - `logging`: subscriber setup
//!
//! ## Security Considerations
//! - `max_overspeed_pings = 0` disables the ping flood check entirely
//! - `kick_on_bad_packet = false` only tolerates malformed packets from
//!   authenticated peers; unauthenticated peers are always disconnected

use crate::error::{ProtocolError, Result};
use crate::protocol::session::SecurityLevel;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Client build accepted out of the box.
pub const DEFAULT_CLIENT_BUILD: u16 = 15595;

/// Highest expansion tier the protocol knows about.
pub const MAX_EXPANSION: u8 = 3;

/// Default overspeed-ping cap.
pub const DEFAULT_MAX_OVERSPEED_PINGS: u32 = 2;

/// Default bound on a single account store or world registry call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default grace period for open connections on shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RealmConfig {
    /// Listener configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Server-wide values consumed by the session layer
    #[serde(default)]
    pub world: WorldSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RealmConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("REALM_GATE_SERVER_ADDRESS") {
            config.server.address = addr;
        }

        if let Ok(value) = std::env::var("REALM_GATE_MAX_CONNECTIONS") {
            if let Ok(val) = value.parse::<usize>() {
                config.server.max_connections = val;
            }
        }

        if let Ok(value) = std::env::var("REALM_GATE_STORE_TIMEOUT_MS") {
            if let Ok(val) = value.parse::<u64>() {
                config.server.store_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(value) = std::env::var("REALM_GATE_ACCEPTED_BUILDS") {
            let builds = value
                .split(',')
                .map(|b| b.trim().parse::<u16>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| {
                    ProtocolError::ConfigError(format!("Invalid REALM_GATE_ACCEPTED_BUILDS: {e}"))
                })?;
            config.world.accepted_builds = builds;
        }

        if let Ok(value) = std::env::var("REALM_GATE_EXPANSION") {
            if let Ok(val) = value.parse::<u8>() {
                config.world.expansion = val;
            }
        }

        if let Ok(value) = std::env::var("REALM_GATE_MAX_OVERSPEED_PINGS") {
            if let Ok(val) = value.parse::<u32>() {
                config.world.max_overspeed_pings = val;
            }
        }

        if let Ok(value) = std::env::var("REALM_GATE_KICK_ON_BAD_PACKET") {
            if let Ok(val) = value.parse::<bool>() {
                config.world.kick_on_bad_packet = val;
            }
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.world.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Listen address (e.g., "0.0.0.0:8085")
    pub address: String,

    /// Maximum number of concurrent connections
    pub max_connections: usize,

    /// Timeout for graceful server shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,

    /// Upper bound on a single account store or world registry call
    #[serde(with = "duration_serde")]
    pub store_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:8085"),
            max_connections: 5000,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Validate listener configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:8085')",
                self.address
            ));
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > 100_000 {
            errors.push(format!(
                "Max connections very high: {} (ensure system resources can support this)",
                self.max_connections
            ));
        }

        if self.shutdown_timeout.as_secs() < 1 {
            errors.push("Shutdown timeout too short (minimum: 1s)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        if self.store_timeout.as_millis() < 10 {
            errors.push("Store timeout too short (minimum: 10ms)".to_string());
        } else if self.store_timeout.as_secs() > 60 {
            errors.push("Store timeout too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// Server-wide values the session layer reads from the world
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct WorldSettings {
    /// Client builds allowed to authenticate
    pub accepted_builds: Vec<u16>,

    /// Expansion tier the server runs; accounts are capped to it
    pub expansion: u8,

    /// Minimum account security level allowed to log in
    pub min_security: SecurityLevel,

    /// Consecutive fast pings tolerated before a player is kicked (0 = off)
    pub max_overspeed_pings: u32,

    /// Disconnect authenticated peers that send malformed packets
    pub kick_on_bad_packet: bool,
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self {
            accepted_builds: vec![DEFAULT_CLIENT_BUILD],
            expansion: MAX_EXPANSION,
            min_security: SecurityLevel::Player,
            max_overspeed_pings: DEFAULT_MAX_OVERSPEED_PINGS,
            kick_on_bad_packet: false,
        }
    }
}

impl WorldSettings {
    pub fn is_acceptable_build(&self, build: u16) -> bool {
        self.accepted_builds.contains(&build)
    }

    /// Validate world settings
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.accepted_builds.is_empty() {
            errors.push("At least one accepted client build must be configured".to_string());
        }

        if self.expansion > MAX_EXPANSION {
            errors.push(format!(
                "Invalid expansion: {} (valid range: 0-{MAX_EXPANSION})",
                self.expansion
            ));
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

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("realm-gate"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
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

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
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
