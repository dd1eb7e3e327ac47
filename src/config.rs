//! Client configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (`mrc.toml` by default)
//! 2. environment variables prefixed with `MRC_`
//!
//! Every field has a default, so an absent file yields
//! [`ClientConfig::default`].
//!
//! # Environment Variable Overrides
//!
//! The first `_` after the prefix separates the section from the key:
//!
//! ```text
//! MRC_CONNECTION_PROTOCOL=ncacn_ip_tcp
//! MRC_CONNECTION_NETWORK_ADDRESS=metropro-01
//! MRC_CONNECTION_END_POINT=5000
//! MRC_LOGGING_LEVEL=debug
//! ```
//!
//! # Example
//!
//! ```toml
//! [connection]
//! protocol = "ncacn_ip_tcp"
//! network_address = "metropro-01"
//! end_point = "5000"
//!
//! [callbacks]
//! mask = ["script_end", "begin_acquire", "end_acquire"]
//!
//! [script]
//! context = "desktop"
//! poll_interval_ms = 50
//! ```

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::ScriptContext;
use crate::status::{StatusKind, StatusMask};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "mrc.toml";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    Load(#[from] figment::Error),
    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Top-level client configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Transport parameters
    pub connection: ConnectionConfig,
    /// Status notifications
    pub callbacks: CallbackConfig,
    /// Script execution
    pub script: ScriptConfig,
    /// Log output of the `mrc` binary
    pub logging: LoggingConfig,
}

/// Transport parameters passed to the client library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Protocol sequence: `ncalrpc` (local), `ncacn_ip_tcp` (network) or `local`
    pub protocol: String,
    /// Server host; empty for local protocols
    pub network_address: String,
    /// `localhost` for local protocols, the port number for TCP
    pub end_point: String,
    /// Verify reachability while connecting
    pub ping_on_connect: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            protocol: "ncalrpc".to_string(),
            network_address: String::new(),
            end_point: "localhost".to_string(),
            ping_on_connect: true,
        }
    }
}

/// Status notification settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackConfig {
    /// Register the entry point on connect
    pub enabled: bool,
    /// Status kinds to enable, by name
    pub mask: Vec<String>,
    /// Correlation id; defaults to the handle value
    pub correlation_id: Option<i32>,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mask: StatusKind::ALL
                .iter()
                .map(|kind| kind.name().to_string())
                .collect(),
            correlation_id: None,
        }
    }
}

/// Script execution settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    /// Frame scripts run in
    pub context: ScriptContext,
    /// Buffer size for script output and stop strings, terminator included
    pub output_buffer_size: usize,
    /// Interval between `is_running` polls
    pub poll_interval_ms: u64,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            context: ScriptContext::default(),
            output_buffer_size: crate::codes::MRC_SCRIPT_OUTPUT_BUFSIZ,
            poll_interval_ms: 100,
        }
    }
}

/// Logging settings for the binary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl ClientConfig {
    /// Load from [`DEFAULT_CONFIG_FILE`] and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load from a specific file and the environment, then validate.
    ///
    /// Environment variables take precedence over the file. A missing file
    /// is not an error.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("MRC_").map(|key| key.as_str().replacen('_', ".", 1).into()))
            .extract()
            .map_err(ConfigError::Load)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - protocol and end point are present
    /// - no network address with the local RPC protocol
    /// - log level is valid
    /// - buffer size and poll interval are usable
    /// - every mask entry names a status kind
    pub fn validate(&self) -> Result<(), ConfigError> {
        let connection = &self.connection;
        if connection.protocol.is_empty() {
            return Err(ConfigError::Validation(
                "connection.protocol must not be empty".to_string(),
            ));
        }
        if connection.end_point.is_empty() {
            return Err(ConfigError::Validation(
                "connection.end_point must not be empty".to_string(),
            ));
        }
        if connection.protocol == "ncalrpc" && !connection.network_address.is_empty() {
            return Err(ConfigError::Validation(format!(
                "network_address '{}' cannot be used with protocol 'ncalrpc'",
                connection.network_address
            )));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        if self.script.output_buffer_size < 2 {
            return Err(ConfigError::Validation(format!(
                "Invalid output_buffer_size {}. Must be at least 2",
                self.script.output_buffer_size
            )));
        }
        if self.script.poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        self.status_mask().map(|_| ())
    }

    /// The configured callback mask.
    pub fn status_mask(&self) -> Result<StatusMask, ConfigError> {
        let mut mask = StatusMask::NONE;
        for name in &self.callbacks.mask {
            let kind = StatusKind::from_name(name).ok_or_else(|| {
                ConfigError::Validation(format!("Unknown status kind '{name}' in callbacks.mask"))
            })?;
            mask = mask | kind;
        }
        Ok(mask)
    }

    /// The configured poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.script.poll_interval_ms)
    }
}
