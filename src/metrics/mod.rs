//! Connection lifecycle metrics.
//!
//! - [`instruments`]: the fixed server instrument set and tag keys
//! - [`ConnectionMetricsContext`]: per-connection state handed to each hook
//! - [`TagAccumulator`]: custom dimensions collected during a connection
//! - [`LifecycleRecorder`]: hooks called by the transport and protocol layers
//! - [`ServerMetrics`] / [`NoopRecorder`]: recording and disabled implementations

mod context;
pub mod instruments;
mod noop;
mod recorder;
mod tags;

pub use context::ConnectionMetricsContext;
pub use instruments::{INSTRUMENTS, InstrumentDefinition, METER_NAME, ServerInstruments, tag_keys};
pub use noop::NoopRecorder;
pub use recorder::{LifecycleRecorder, ServerMetrics};
pub use tags::TagAccumulator;
