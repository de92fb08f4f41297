//! Core configuration types and loading.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use super::defaults::{
    default_idle_timeout_secs, default_max_concurrent_requests, default_max_connections,
    default_protocol_label, default_server_name,
};
use super::listen::{ListenConfig, TlsConfig};
use super::metrics::MetricsConfig;
use super::validation::{ValidationError, validate};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {}", format_errors(.0))]
    Invalid(Vec<ValidationError>),
}

fn format_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server identity and admission limits.
    #[serde(default)]
    pub server: ServerConfig,
    /// Plaintext listen configuration.
    pub listen: ListenConfig,
    /// Optional TLS listen configuration.
    pub tls: Option<TlsConfig>,
    /// Lifecycle metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load and validate configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        validate(&config).map_err(ConfigError::Invalid)?;
        Ok(config)
    }
}

/// Server identity and admission configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server name, used in logs.
    #[serde(default = "default_server_name")]
    pub name: String,
    /// Connections served at once; further accepts wait in the admission queue.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Requests dispatched at once across all connections; further requests
    /// wait in the dispatch queue.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    /// Seconds without a line before a connection is closed.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Protocol version label reported on queued-requests.
    #[serde(default = "default_protocol_label")]
    pub protocol_label: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            max_connections: default_max_connections(),
            max_concurrent_requests: default_max_concurrent_requests(),
            idle_timeout_secs: default_idle_timeout_secs(),
            protocol_label: default_protocol_label(),
        }
    }
}
