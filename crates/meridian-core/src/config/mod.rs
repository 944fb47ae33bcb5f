//! Application configuration with layered loading.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: `Default` implementations and serde defaults
//! 2. **Config file**: TOML file named by the `MERIDIAN_CONFIG` env var
//! 3. **Environment variables**: `MERIDIAN__*` env vars override specific fields
//!
//! # Configuration Sections
//!
//! - [`ServerConfig`]: admin HTTP listener
//! - [`LoggingConfig`]: log level and format
//! - [`MetricsConfig`]: Prometheus exposition
//! - [`HttpClientConfig`]: shared outbound HTTP client
//! - [`HealthCheckConfig`]: health-check defaults, overridable per network
//! - [`NetworkConfig`]: networks and their providers
//! - [`SessionClientConfig`]: SIWE session credential pools
//!
//! # Example
//!
//! ```toml
//! [server]
//! bind_port = 8545
//!
//! [health_check]
//! interval_seconds = 10
//! block_lag_limit = 10
//!
//! [[networks]]
//! name = "ethereum"
//! runtime = "ethereum"
//!
//! [[networks.providers]]
//! url = "https://eth.example.com"
//! priority = 0
//!
//! [[sessions]]
//! name = "primary"
//! auth_url = "https://auth.example.com/session"
//! private_key = "0x..."
//! session_count = 4
//! ```

use serde::{Deserialize, Serialize};
use std::{collections::HashSet, path::Path};
use thiserror::Error;

use crate::{
    auth::SessionClientConfig,
    upstream::{HealthCheckConfig, HttpClientConfig, NetworkConfig},
};

/// Configuration loading and validation failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Admin HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// IP address to bind. Defaults to `127.0.0.1`.
    pub bind_address: String,

    /// Port to listen on. Must be greater than 0. Defaults to `3030`.
    pub bind_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_address: "127.0.0.1".to_string(), bind_port: 3030 }
    }
}

/// Application logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (e.g., "trace", "debug", "info", "warn", "error"). Defaults to `"info"`.
    pub level: String,

    /// Output format: `"json"` or `"pretty"`. Defaults to `"pretty"`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "pretty".to_string() }
    }
}

/// Prometheus metrics configuration.
///
/// When enabled, metrics are rendered at `/metrics` on the admin listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Root application configuration.
///
/// Environment overrides use the `MERIDIAN` prefix with `__` as separator, e.g.
/// `MERIDIAN__SERVER__BIND_PORT=8080`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
    pub http_client: HttpClientConfig,
    /// Defaults applied to every network before its own overrides.
    pub health_check: HealthCheckConfig,
    pub networks: Vec<NetworkConfig>,
    pub sessions: Vec<SessionClientConfig>,
}

impl AppConfig {
    /// Loads configuration from a TOML file with environment variable overrides.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if a source cannot be read, parsed, or deserialized.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(
                config::File::with_name(&config_path.as_ref().to_string_lossy()).required(false),
            )
            .add_source(config::Environment::with_prefix("MERIDIAN").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Parses configuration from TOML text, without environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if the text is not valid configuration.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(contents, config::FileFormat::Toml))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Loads configuration from `config/config.toml`, or the path in `MERIDIAN_CONFIG`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if the configuration cannot be loaded or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("MERIDIAN_CONFIG").unwrap_or_else(|_| "config/config.toml".to_string());
        Self::from_file(&config_path)
    }

    /// Returns the parsed socket address for the admin listener.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the address cannot be parsed.
    pub fn socket_addr(&self) -> Result<std::net::SocketAddr, ConfigError> {
        format!("{}:{}", self.server.bind_address, self.server.bind_port).parse().map_err(|_| {
            ConfigError::Invalid(format!(
                "invalid socket address: {}:{}",
                self.server.bind_address, self.server.bind_port
            ))
        })
    }

    /// Validates the configuration for correctness and consistency.
    ///
    /// Checks include:
    /// - Network and session names are non-empty and unique
    /// - Provider URLs are `http(s)` and hosts are unique within a network
    /// - Health-check defaults and per-network overrides are usable
    /// - Session clients have a positive session count and a parseable auth URL
    /// - Logging format is either `"json"` or `"pretty"`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.bind_port == 0 {
            return Err(ConfigError::Invalid("bind port must be greater than 0".into()));
        }

        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err(ConfigError::Invalid("logging format must be 'json' or 'pretty'".into()));
        }

        self.health_check
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("health_check: {e}")))?;

        let mut network_names = HashSet::new();
        for network in &self.networks {
            validate_network(network, &self.health_check)?;
            if !network_names.insert(network.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate network: {}", network.name)));
            }
        }

        let mut session_names = HashSet::new();
        for session in &self.sessions {
            if session.name.trim().is_empty() {
                return Err(ConfigError::Invalid("session client name must not be empty".into()));
            }
            session
                .validate()
                .map_err(|e| ConfigError::Invalid(format!("session {}: {e}", session.name)))?;
            if !session_names.insert(session.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate session client: {}",
                    session.name
                )));
            }
        }

        Ok(())
    }
}

fn validate_network(
    network: &NetworkConfig,
    defaults: &HealthCheckConfig,
) -> Result<(), ConfigError> {
    if network.name.trim().is_empty() {
        return Err(ConfigError::Invalid("network name must not be empty".into()));
    }
    network
        .health_check
        .apply(defaults)
        .validate()
        .map_err(|e| ConfigError::Invalid(format!("network {}: {e}", network.name)))?;

    let mut hosts = HashSet::new();
    for provider in &network.providers {
        if !provider.url.starts_with("http://") && !provider.url.starts_with("https://") {
            return Err(ConfigError::Invalid(format!(
                "invalid provider URL for network {}: {}",
                network.name, provider.url
            )));
        }
        let host = provider
            .resolve_host()
            .map_err(|e| ConfigError::Invalid(format!("network {}: {e}", network.name)))?;
        if !hosts.insert(host.clone()) {
            return Err(ConfigError::Invalid(format!(
                "duplicate provider host {host} in network {}",
                network.name
            )));
        }
    }
    Ok(())
}
