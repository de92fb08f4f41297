//! Default value functions for configuration.
//!
//! Separated into its own module for clarity and reuse.

/// Returns `true` (for serde defaults).
pub fn default_true() -> bool {
    true
}

// =============================================================================
// Server Defaults
// =============================================================================

pub fn default_server_name() -> String {
    "connmeter".to_string()
}

pub fn default_max_connections() -> usize {
    1024
}

pub fn default_max_concurrent_requests() -> usize {
    64
}

pub fn default_idle_timeout_secs() -> u64 {
    120
}

pub fn default_protocol_label() -> String {
    "LINE/1".to_string()
}

// =============================================================================
// Metrics Defaults
// =============================================================================

pub fn default_meter_name() -> String {
    crate::metrics::METER_NAME.to_string()
}

pub fn default_meter_version() -> Option<String> {
    Some(env!("CARGO_PKG_VERSION").to_string())
}

pub fn default_max_custom_tag_values() -> usize {
    100
}

/// Covers: 10ms to 1h
pub const DEFAULT_CONNECTION_DURATION_BUCKETS: &[f64] = &[
    0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0, 3600.0,
];

/// Covers: 1ms to 10s
pub const DEFAULT_TLS_HANDSHAKE_DURATION_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];
