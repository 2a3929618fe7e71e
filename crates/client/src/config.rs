//! Configuration management for the wterm client.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/wterm/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dialect::Dialect;
use crate::tracker::InFlightPolicy;

/// Default WebSocket endpoint of a local wterm server.
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:32300/ws";

/// Default HTTP base for download and upload URLs.
pub const DEFAULT_HTTP_BASE_URL: &str = "http://localhost:32300";

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("server_url must start with ws:// or wss://, got {0}")]
    InvalidServerUrl(String),

    #[error("http_base_url must start with http:// or https://, got {0}")]
    InvalidHttpBaseUrl(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the wterm client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// Server connection settings.
    pub connection: ConnectionConfig,

    /// File-transfer settings.
    pub files: FilesConfig,

    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Server connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectionConfig {
    /// WebSocket URL of the server.
    pub server_url: String,

    /// Wire dialect spoken by the server.
    pub dialect: Dialect,

    /// HTTP base that download and upload paths are joined onto.
    pub http_base_url: String,
}

/// File-transfer settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct FilesConfig {
    /// What happens when a file operation is issued while one is outstanding.
    pub in_flight_policy: InFlightPolicy,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log file. Logs go to stderr when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            dialect: Dialect::default(),
            http_base_url: DEFAULT_HTTP_BASE_URL.to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            file: None,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("wterm")
        .join("config.toml")
}

impl ClientConfig {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - WTERM_SERVER_URL: Override the server URL
    /// - WTERM_DIALECT: Override the dialect (standard, goTTYd)
    /// - WTERM_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    ///
    /// Empty values are ignored. An unparseable dialect is logged and ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("WTERM_SERVER_URL") {
            if !url.is_empty() {
                tracing::info!("Overriding server_url from environment: {}", url);
                self.connection.server_url = url;
            }
        }

        if let Ok(dialect) = std::env::var("WTERM_DIALECT") {
            if !dialect.is_empty() {
                match dialect.parse::<Dialect>() {
                    Ok(parsed) => {
                        tracing::info!("Overriding dialect from environment: {}", parsed);
                        self.connection.dialect = parsed;
                    }
                    Err(e) => tracing::warn!("Ignoring WTERM_DIALECT: {}", e),
                }
            }
        }

        if let Ok(level) = std::env::var("WTERM_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.logging.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = &self.connection.server_url;
        if !url.starts_with("ws://") && !url.starts_with("wss://") {
            return Err(ConfigError::InvalidServerUrl(url.clone()));
        }

        let base = &self.connection.http_base_url;
        if !base.starts_with("http://") && !base.starts_with("https://") {
            return Err(ConfigError::InvalidHttpBaseUrl(base.clone()));
        }

        let level = self.logging.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.logging.log_level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
