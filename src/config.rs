//! Server configuration
//!
//! Values come from built-in defaults, optionally a TOML file, then
//! CLI overrides on top. Validation happens once at startup; a bad
//! configuration is terminal.

use crate::error::ConfigError;
use crate::net::types::{DEFAULT_DISCOVERY_PORT, DEFAULT_MESSAGE_HISTORY, DEFAULT_PORT, MIN_PORT};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,
    /// TCP listen port
    pub port: u16,
    /// Global concurrent-connection cap
    pub max_clients: usize,
    pub max_connections_per_ip: usize,
    /// New-connection rate per IP before a temporary block kicks in
    pub max_connections_per_minute: usize,
    /// Socket read timeout; an expiry is not a disconnect
    pub connection_timeout_seconds: u64,
    pub temporary_block_duration_minutes: u64,
    pub rate_limit_messages_per_minute: u32,
    /// Extra bucket capacity above the sustained rate
    pub burst_allowance: u32,
    pub max_username_length: usize,
    pub max_message_length: usize,
    /// Clamped to the hard cap at use sites
    pub message_history_size: usize,
    pub discovery_port: u16,
    pub discovery_broadcast_interval_seconds: u64,
    /// Reaper cadence
    pub cleanup_interval_seconds: u64,
    /// When set, a validation failure ends the session instead of
    /// dropping the frame
    pub strict_validation: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_clients: 100,
            max_connections_per_ip: 5,
            max_connections_per_minute: 10,
            connection_timeout_seconds: 30,
            temporary_block_duration_minutes: 5,
            rate_limit_messages_per_minute: 60,
            burst_allowance: 10,
            max_username_length: 50,
            max_message_length: 1000,
            message_history_size: DEFAULT_MESSAGE_HISTORY,
            discovery_port: DEFAULT_DISCOVERY_PORT,
            discovery_broadcast_interval_seconds: 5,
            cleanup_interval_seconds: 30,
            strict_validation: false,
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().display().to_string();
        let data = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path_str.clone(),
            source,
        })?;
        toml::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path_str,
            source,
        })
    }

    /// Startup validation. Ports below 1024 are rejected rather than
    /// warned about: the server should never need privileges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port < MIN_PORT {
            return Err(ConfigError::InvalidPort(self.port));
        }
        if self.max_clients < 1 {
            return Err(ConfigError::InvalidMaxClients(self.max_clients));
        }
        if self.rate_limit_messages_per_minute < 1 {
            return Err(ConfigError::InvalidRateLimit(
                self.rate_limit_messages_per_minute,
            ));
        }
        Ok(())
    }
}
