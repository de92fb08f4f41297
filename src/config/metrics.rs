//! Metrics configuration.

use super::defaults::{
    DEFAULT_CONNECTION_DURATION_BUCKETS, DEFAULT_TLS_HANDSHAKE_DURATION_BUCKETS,
    default_max_custom_tag_values, default_meter_name, default_meter_version, default_true,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::warn;

/// Metrics configuration (`[metrics]`).
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Record lifecycle metrics. When false the server runs with a no-op recorder.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Meter name the server instruments are grouped under.
    #[serde(default = "default_meter_name")]
    pub meter_name: String,
    /// Meter version (defaults to the crate version).
    #[serde(default = "default_meter_version")]
    pub meter_version: Option<String>,
    /// Custom connection tag keys exported as labels on connection-duration.
    /// Tags with other keys still reach in-process listeners.
    ///
    /// Every distinct value of a listed key opens a new exported series that
    /// lives until the meter is disposed. Values can come from remote peers,
    /// so each key is capped by `max_custom_tag_values`.
    #[serde(default)]
    pub custom_tag_keys: Vec<String>,
    /// Distinct exported values per custom tag key; further values are
    /// exported as `_other`.
    #[serde(default = "default_max_custom_tag_values")]
    pub max_custom_tag_values: usize,
    /// Constant labels attached to every exported family.
    #[serde(default)]
    pub default_tags: BTreeMap<String, String>,
    /// Histogram bucket overrides.
    #[serde(default)]
    pub buckets: BucketsConfig,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            meter_name: default_meter_name(),
            meter_version: default_meter_version(),
            custom_tag_keys: Vec::new(),
            max_custom_tag_values: default_max_custom_tag_values(),
            default_tags: BTreeMap::new(),
            buckets: BucketsConfig::default(),
        }
    }
}

/// Histogram bucket overrides (`[metrics.buckets]`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BucketsConfig {
    pub connection_duration: Option<Vec<f64>>,
    pub tls_handshake_duration: Option<Vec<f64>>,
}

impl MetricsConfig {
    pub fn connection_duration_buckets(&self) -> Vec<f64> {
        validate_buckets(
            self.buckets.connection_duration.as_deref(),
            DEFAULT_CONNECTION_DURATION_BUCKETS,
            "connection_duration",
        )
    }

    pub fn tls_handshake_duration_buckets(&self) -> Vec<f64> {
        validate_buckets(
            self.buckets.tls_handshake_duration.as_deref(),
            DEFAULT_TLS_HANDSHAKE_DURATION_BUCKETS,
            "tls_handshake_duration",
        )
    }
}

/// Use the configured buckets if they are usable, otherwise the defaults.
///
/// Unusable means empty, containing non-positive or non-finite values, or
/// not strictly increasing.
pub(crate) fn validate_buckets(buckets: Option<&[f64]>, default: &[f64], name: &str) -> Vec<f64> {
    let Some(buckets) = buckets else {
        return default.to_vec();
    };

    if buckets.is_empty() {
        warn!("{} buckets are empty, falling back to defaults", name);
        return default.to_vec();
    }

    if buckets.iter().any(|&b| !b.is_finite() || b <= 0.0) {
        warn!("{} buckets contain invalid values, falling back to defaults", name);
        return default.to_vec();
    }

    if !buckets.windows(2).all(|w| w[0] < w[1]) {
        warn!(
            "{} buckets are not strictly increasing, falling back to defaults",
            name
        );
        return default.to_vec();
    }

    buckets.to_vec()
}
