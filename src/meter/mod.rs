//! Instrument registry.
//!
//! - [`MeterRegistry`]: lifecycle-managed cache of meters keyed by (name, version)
//! - [`Meter`]: creates and deduplicates instruments
//! - [`Counter`], [`UpDownCounter`], [`Histogram`]: recording sinks backed by Prometheus vectors
//! - [`InstrumentRecorder`]: in-process listener used by reporters and tests

mod instrument;
mod listener;
mod provider;
mod registry;
mod tag;

pub use instrument::{
    Counter, Histogram, InstrumentDescriptor, InstrumentKind, InstrumentOptions,
    OVERFLOW_LABEL_VALUE, UpDownCounter,
};
pub use listener::{InstrumentRecorder, Measurement, MeasurementValue};
pub use provider::{Meter, MeterOptions, SCOPE_NAME_LABEL, SCOPE_VERSION_LABEL};
pub use registry::MeterRegistry;
pub use tag::{Tag, TagValue, find_tag, is_valid_name};
