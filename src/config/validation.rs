//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use super::Config;
use crate::meter::{SCOPE_NAME_LABEL, SCOPE_VERSION_LABEL, is_valid_name};
use crate::metrics::tag_keys;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("server.max_connections must be at least 1")]
    ZeroMaxConnections,
    #[error("server.max_concurrent_requests must be at least 1")]
    ZeroMaxConcurrentRequests,
    #[error("metrics.max_custom_tag_values must be at least 1")]
    ZeroMaxCustomTagValues,
    #[error("server.protocol_label is required")]
    MissingProtocolLabel,
    #[error("metrics.meter_name is not a valid name: '{0}'")]
    InvalidMeterName(String),
    #[error("metrics.custom_tag_keys contains an invalid key: '{0}'")]
    InvalidTagKey(String),
    #[error("metrics.custom_tag_keys contains a reserved key: '{0}'")]
    ReservedTagKey(String),
    #[error("metrics.custom_tag_keys contains a duplicate key: '{0}'")]
    DuplicateTagKey(String),
    #[error("metrics.default_tags key '{0}' is invalid or collides with an instrument tag")]
    InvalidDefaultTag(String),
    #[error("tls.cert_path does not exist: {0}")]
    TlsCertNotFound(String),
    #[error("tls.key_path does not exist: {0}")]
    TlsKeyNotFound(String),
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.max_connections == 0 {
        errors.push(ValidationError::ZeroMaxConnections);
    }
    if config.server.max_concurrent_requests == 0 {
        errors.push(ValidationError::ZeroMaxConcurrentRequests);
    }
    if config.server.protocol_label.trim().is_empty() {
        errors.push(ValidationError::MissingProtocolLabel);
    }

    let metrics = &config.metrics;
    if !is_valid_name(&metrics.meter_name) {
        errors.push(ValidationError::InvalidMeterName(metrics.meter_name.clone()));
    }

    if metrics.max_custom_tag_values == 0 {
        errors.push(ValidationError::ZeroMaxCustomTagValues);
    }

    let mut seen = HashSet::new();
    for key in &metrics.custom_tag_keys {
        if !is_valid_name(key) {
            errors.push(ValidationError::InvalidTagKey(key.clone()));
        } else if tag_keys::is_reserved(key) || is_scope_label(key) {
            errors.push(ValidationError::ReservedTagKey(key.clone()));
        } else if !seen.insert(key.as_str()) {
            errors.push(ValidationError::DuplicateTagKey(key.clone()));
        }
    }

    for key in metrics.default_tags.keys() {
        if !is_valid_name(key)
            || tag_keys::is_reserved(key)
            || is_scope_label(key)
            || seen.contains(key.as_str())
        {
            errors.push(ValidationError::InvalidDefaultTag(key.clone()));
        }
    }

    // TLS validation
    if let Some(ref tls) = config.tls {
        if !Path::new(&tls.cert_path).exists() {
            errors.push(ValidationError::TlsCertNotFound(tls.cert_path.clone()));
        }
        if !Path::new(&tls.key_path).exists() {
            errors.push(ValidationError::TlsKeyNotFound(tls.key_path.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Keys that would export as one of the meter scope labels.
fn is_scope_label(key: &str) -> bool {
    let exported: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    exported == SCOPE_NAME_LABEL || exported == SCOPE_VERSION_LABEL
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Config {
        toml::from_str(toml).unwrap()
    }

    #[test]
    fn test_valid_config_passes() {
        let config = parse(
            r#"
[listen]
address = "127.0.0.1:7000"
"#,
        );
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_reserved_custom_tag_key_fails() {
        let config = parse(
            r#"
[listen]
address = "127.0.0.1:7000"

[metrics]
custom_tag_keys = ["endpoint", "tenant", "tenant", "bad key"]
"#,
        );
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, ValidationError::ReservedTagKey(k) if k == "endpoint")));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::DuplicateTagKey(k) if k == "tenant")));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::InvalidTagKey(_))));
    }

    #[test]
    fn test_default_tag_colliding_with_custom_key_fails() {
        let config = parse(
            r#"
[listen]
address = "127.0.0.1:7000"

[metrics]
custom_tag_keys = ["tenant"]

[metrics.default_tags]
tenant = "x"
version = "y"
"#,
        );
        let errors = validate(&config).unwrap_err();
        assert_eq!(
            errors
                .iter()
                .filter(|e| matches!(e, ValidationError::InvalidDefaultTag(_)))
                .count(),
            2
        );
    }

    #[test]
    fn test_scope_label_keys_fail() {
        let config = parse(
            r#"
[listen]
address = "127.0.0.1:7000"

[metrics]
custom_tag_keys = ["otel_scope_name"]
max_custom_tag_values = 0

[metrics.default_tags]
"otel.scope.version" = "x"
"#,
        );
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, ValidationError::ReservedTagKey(k) if k == "otel_scope_name")));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::InvalidDefaultTag(k) if k == "otel.scope.version")));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::ZeroMaxCustomTagValues)));
    }

    #[test]
    fn test_zero_limits_fail() {
        let config = parse(
            r#"
[server]
max_connections = 0
max_concurrent_requests = 0

[listen]
address = "127.0.0.1:7000"
"#,
        );
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, ValidationError::ZeroMaxConnections)));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::ZeroMaxConcurrentRequests)));
    }

    #[test]
    fn test_missing_tls_files_fail() {
        let config = parse(
            r#"
[listen]
address = "127.0.0.1:7000"

[tls]
address = "127.0.0.1:7001"
cert_path = "/nonexistent/cert.pem"
key_path = "/nonexistent/key.pem"
"#,
        );
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, ValidationError::TlsCertNotFound(_))));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::TlsKeyNotFound(_))));
    }
}
