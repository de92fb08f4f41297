//! Unified error handling for connmeter.
//!
//! Errors only surface while meters and instruments are being built at
//! startup. Once the server is running, recording never returns an error:
//! misuse and disposed-meter recordings degrade to no-ops.

use crate::meter::InstrumentKind;
use thiserror::Error;

// ============================================================================
// Registry Errors (instrument creation)
// ============================================================================

/// Errors that can occur while creating instruments.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("invalid instrument name: {0:?}")]
    InvalidName(String),

    #[error("invalid or duplicate tag key {key:?} on instrument {instrument}")]
    InvalidTagKey { instrument: String, key: String },

    #[error("instrument {name} already exists as a {existing}, requested a {requested}")]
    KindMismatch {
        name: String,
        existing: InstrumentKind,
        requested: InstrumentKind,
    },

    #[error("metric registration failed: {0}")]
    Registration(#[from] prometheus::Error),
}

impl MetricsError {
    /// Get a static error code string for log labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidName(_) => "invalid_name",
            Self::InvalidTagKey { .. } => "invalid_tag_key",
            Self::KindMismatch { .. } => "kind_mismatch",
            Self::Registration(_) => "registration_failed",
        }
    }
}
