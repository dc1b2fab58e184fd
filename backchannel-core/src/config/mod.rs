//! Configuration for the backchannel server.
//!
//! Loaded from a TOML file with environment-variable overrides
//! (`BACKCHANNEL_<SECTION>_<KEY>`), validated before use.

use serde::{Deserialize, Serialize};
use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// WebSocket server configuration
    pub server: ServerConfig,

    /// Account store configuration
    pub store: StoreConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// WebSocket server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the listener to
    pub bind_address: IpAddr,

    /// WebSocket listen port
    pub ws_port: u16,

    /// Period of the heartbeat sweep that reaps unresponsive connections
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,
}

/// Account store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the persisted account collection
    pub data_path: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include target module
    pub with_target: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            store: StoreConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            ws_port: 8999,
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("./database.json"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_target: true,
        }
    }
}

impl Config {
    /// Load configuration: file if present, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError(e.to_string()))?;

        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        Ok(config)
    }

    /// Apply environment-variable overrides
    ///
    /// Variables follow the pattern `BACKCHANNEL_<SECTION>_<KEY>`,
    /// e.g. `BACKCHANNEL_SERVER_WS_PORT=9000`.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(addr) = env::var("BACKCHANNEL_SERVER_BIND_ADDRESS") {
            self.server.bind_address = addr
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid bind address: {}", e)))?;
        }
        if let Ok(port) = env::var("BACKCHANNEL_SERVER_WS_PORT") {
            self.server.ws_port = port
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid ws port: {}", e)))?;
        }
        if let Ok(path) = env::var("BACKCHANNEL_STORE_DATA_PATH") {
            self.store.data_path = PathBuf::from(path);
        }
        if let Ok(level) = env::var("BACKCHANNEL_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(json) = env::var("BACKCHANNEL_LOG_JSON") {
            self.logging.json_format = json
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid JSON flag: {}", e)))?;
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.heartbeat_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "heartbeat_interval must be greater than 0".to_string(),
            ));
        }

        if self.store.data_path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "store data_path must not be empty".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }
}
