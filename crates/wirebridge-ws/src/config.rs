//! Endpoint configuration.
//!
//! [`WsConfig`] holds every tunable of an endpoint. It deserializes from TOML
//! or JSON with all fields optional; durations are stored as integer
//! `_secs`/`_ms` fields.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use wirebridge_codec::decode::{DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_HEADER_LINE};
use wirebridge_codec::{DecoderConfig, Role};

use crate::telemetry::LogConfig;

/// Errors that can occur while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file not found.
    #[error("configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// Failed to read configuration file.
    #[error("failed to read configuration file: {path}")]
    ReadError {
        /// Path to the file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML configuration: {0}")]
    TomlError(#[from] toml::de::Error),

    /// JSON parsing error.
    #[error("failed to parse JSON configuration: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Invalid configuration value.
    #[error("invalid configuration value for {field}: {reason}")]
    InvalidValue {
        /// The field with the invalid value.
        field: String,
        /// Explanation of why the value is invalid.
        reason: String,
    },

    /// Environment variable parsing error.
    #[error("failed to parse environment variable {var}: {reason}")]
    EnvParseError {
        /// The environment variable name.
        var: String,
        /// Explanation of the parsing error.
        reason: String,
    },

    /// Unsupported configuration format.
    #[error("unsupported configuration format: {0}")]
    UnsupportedFormat(String),
}

impl ConfigError {
    /// Create an invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an environment variable parse error.
    pub fn env_parse_error(var: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EnvParseError {
            var: var.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(remote = "Role", rename_all = "lowercase")]
enum RoleDef {
    Server,
    Client,
}

/// Configuration for an endpoint and the connections it accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WsConfig {
    /// Which side of the connection this endpoint plays (default: server).
    #[serde(with = "RoleDef")]
    pub role: Role,
    /// Validate text payloads and close reasons as UTF-8 (default: false).
    pub validate_utf8: bool,
    /// Expect an HTTP upgrade request before the first frame (default: true).
    pub expect_handshake: bool,
    /// Maximum HTTP header line length in bytes (default: 2048).
    pub max_header_line: usize,
    /// Maximum frame payload size in bytes (default: 16 MB).
    pub max_frame_size: usize,
    /// Idle interval after which a ping is sent (default: 25000 ms).
    pub ping_interval_ms: u64,
    /// How long to wait for the peer's Close reply (default: 5000 ms).
    pub close_timeout_ms: u64,
    /// Maximum frames held while waiting for a missing sequence number (default: 1024).
    pub max_pending_frames: usize,
    /// Maximum concurrently registered connections (default: 10000).
    pub max_connections: usize,
    /// Capacity of each connection's inbound message channel (default: 256).
    pub inbound_capacity: usize,
    /// Capacity of the connection event channel (default: 64).
    pub event_capacity: usize,
    /// Logging settings.
    pub logging: LogConfig,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            role: Role::Server,
            validate_utf8: false,
            expect_handshake: true,
            max_header_line: DEFAULT_MAX_HEADER_LINE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            ping_interval_ms: 25_000,
            close_timeout_ms: 5000,
            max_pending_frames: 1024,
            max_connections: 10_000,
            inbound_capacity: 256,
            event_capacity: 64,
            logging: LogConfig::default(),
        }
    }
}

impl WsConfig {
    /// Create a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document. Missing fields take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML or JSON file, chosen by extension.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        crate::loader::ConfigLoader::new().with_file(path)?.load()
    }

    /// Set the endpoint role.
    pub fn role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// Set whether UTF-8 is validated.
    pub fn validate_utf8(mut self, validate: bool) -> Self {
        self.validate_utf8 = validate;
        self
    }

    /// Set whether an HTTP upgrade request precedes the first frame.
    pub fn expect_handshake(mut self, expect: bool) -> Self {
        self.expect_handshake = expect;
        self
    }

    /// Set the maximum HTTP header line length.
    pub fn max_header_line(mut self, len: usize) -> Self {
        self.max_header_line = len;
        self
    }

    /// Set the maximum frame size.
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Set the idle ping interval.
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the close handshake timeout.
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the resequencer bound.
    pub fn max_pending_frames(mut self, max: usize) -> Self {
        self.max_pending_frames = max;
        self
    }

    /// Set the maximum number of connections.
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Idle ping interval as a [`Duration`].
    pub fn ping_interval_duration(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    /// Close handshake timeout as a [`Duration`].
    pub fn close_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    /// Decoder settings derived from this configuration.
    pub fn decoder_config(&self) -> DecoderConfig {
        DecoderConfig::new()
            .validate_utf8(self.validate_utf8)
            .expect_headers(self.expect_handshake)
            .max_header_line(self.max_header_line)
            .max_frame_size(self.max_frame_size)
    }

    /// Check the configuration for values that cannot work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("max_header_line", self.max_header_line as u64),
            ("max_frame_size", self.max_frame_size as u64),
            ("ping_interval_ms", self.ping_interval_ms),
            ("max_pending_frames", self.max_pending_frames as u64),
            ("max_connections", self.max_connections as u64),
            ("inbound_capacity", self.inbound_capacity as u64),
            ("event_capacity", self.event_capacity as u64),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::invalid_value(field, "must be greater than zero"));
            }
        }
        Ok(())
    }
}
