//! Configuration loading and management.
//!
//! This module is split into logical submodules:
//! - [`types`]: Core config struct definitions (Config, ServerConfig)
//! - [`listen`]: Network listener configuration (ListenConfig, TlsConfig)
//! - [`metrics`]: Meter identity, exported tag keys and histogram buckets
//! - [`validation`]: Startup validation
//! - [`defaults`]: Serde default values

mod defaults;
mod listen;
mod metrics;
mod types;
mod validation;

pub use listen::{ListenConfig, TlsConfig};
pub use metrics::{BucketsConfig, MetricsConfig};
pub use types::{Config, ConfigError, ServerConfig};
pub use validation::ValidationError;
