//! Layered configuration loading.
//!
//! Defaults, then an optional file (TOML or JSON), then environment
//! variables of the form `PREFIX__KEY` or `PREFIX__LOGGING__KEY`.

use std::env;
use std::fs;
use std::path::Path;

use wirebridge_codec::Role;

use crate::config::{ConfigError, WsConfig};

/// Configuration loader with layered approach.
///
/// # Example
///
/// ```no_run
/// use wirebridge_ws::ConfigLoader;
///
/// # fn main() -> Result<(), wirebridge_ws::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_optional_file("wirebridge.toml")?
///     .with_env_prefix("WIREBRIDGE")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config: WsConfig,
    env_prefix: Option<String>,
}

impl ConfigLoader {
    /// Create a new loader starting from defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a file; the format follows the extension.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_string();
        self.config = parse(&content, &format)?;
        Ok(self)
    }

    /// Load configuration from a file if it exists.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Load configuration from a string in the given format ("toml" or "json").
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.config = parse(content, format)?;
        Ok(self)
    }

    /// Apply overrides from environment variables starting with `prefix`.
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Apply environment overrides, validate, and return the configuration.
    pub fn load(mut self) -> Result<WsConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            let vars: Vec<(String, String)> = env::vars()
                .filter(|(k, _)| k.starts_with(&prefix))
                .collect();
            for (key, value) in vars {
                self.apply_env_var(&key, &value, &prefix)?;
            }
        }
        self.config.validate()?;
        Ok(self.config)
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let Some(rest) = key.strip_prefix(prefix).and_then(|k| k.strip_prefix("__")) else {
            return Ok(());
        };
        let parts: Vec<&str> = rest.split("__").collect();
        let config = &mut self.config;

        match parts.as_slice() {
            ["ROLE"] => {
                config.role = match value.to_lowercase().as_str() {
                    "server" => Role::Server,
                    "client" => Role::Client,
                    _ => return Err(ConfigError::env_parse_error(key, "expected 'server' or 'client'")),
                };
            }
            ["VALIDATE_UTF8"] => config.validate_utf8 = parse_bool(key, value)?,
            ["EXPECT_HANDSHAKE"] => config.expect_handshake = parse_bool(key, value)?,
            ["MAX_HEADER_LINE"] => config.max_header_line = parse_int(key, value)?,
            ["MAX_FRAME_SIZE"] => config.max_frame_size = parse_int(key, value)?,
            ["PING_INTERVAL_MS"] => config.ping_interval_ms = parse_int(key, value)?,
            ["CLOSE_TIMEOUT_MS"] => config.close_timeout_ms = parse_int(key, value)?,
            ["MAX_PENDING_FRAMES"] => config.max_pending_frames = parse_int(key, value)?,
            ["MAX_CONNECTIONS"] => config.max_connections = parse_int(key, value)?,
            ["INBOUND_CAPACITY"] => config.inbound_capacity = parse_int(key, value)?,
            ["EVENT_CAPACITY"] => config.event_capacity = parse_int(key, value)?,
            ["LOGGING", "ENABLED"] => config.logging.enabled = parse_bool(key, value)?,
            ["LOGGING", "LEVEL"] => config.logging.level = value.to_string(),
            ["LOGGING", "JSON_FORMAT"] => config.logging.json_format = parse_bool(key, value)?,
            _ => {}
        }
        Ok(())
    }
}

fn parse(content: &str, format: &str) -> Result<WsConfig, ConfigError> {
    match format.to_lowercase().as_str() {
        "toml" => Ok(toml::from_str(content)?),
        "json" => Ok(serde_json::from_str(content)?),
        other => Err(ConfigError::UnsupportedFormat(other.to_string())),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::env_parse_error(key, "expected boolean")),
    }
}

fn parse_int<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::env_parse_error(key, "expected integer"))
}
