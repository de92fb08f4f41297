//! Instrument kinds and their recording paths.
//!
//! Each instrument wraps a Prometheus vector keyed by its declared tag
//! keys, so exported values can be gathered at any time, and fans every
//! measurement out to attached [`InstrumentRecorder`](super::InstrumentRecorder)s.
//! Recording never fails: label mismatches and disposed meters turn the
//! call into a no-op with a debug diagnostic.

use super::listener::{MeasurementValue, Subscription};
use super::tag::Tag;
use parking_lot::{Mutex, RwLock};
use prometheus::{HistogramVec, IntCounterVec, IntGaugeVec};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Exported in place of a label value once the key's distinct-value cap is reached.
pub const OVERFLOW_LABEL_VALUE: &str = "_other";

/// The three instrument shapes a meter can create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentKind {
    Counter,
    UpDownCounter,
    Histogram,
}

impl InstrumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::UpDownCounter => "up-down counter",
            Self::Histogram => "histogram",
        }
    }
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Creation parameters for an instrument.
#[derive(Debug, Clone, Default)]
pub struct InstrumentOptions {
    pub name: String,
    pub unit: String,
    pub description: String,
    /// Tag keys projected into exported labels, in label order.
    pub tag_keys: Vec<String>,
    /// Histogram bucket upper bounds; ignored by counters.
    pub buckets: Option<Vec<f64>>,
    /// Distinct exported values kept per tag key; later values export as
    /// [`OVERFLOW_LABEL_VALUE`]. Unlimited when `None`.
    pub max_label_values: Option<usize>,
}

impl InstrumentOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn tag_keys<S: AsRef<str>>(mut self, keys: &[S]) -> Self {
        self.tag_keys = keys.iter().map(|k| k.as_ref().to_owned()).collect();
        self
    }

    pub fn buckets(mut self, buckets: Vec<f64>) -> Self {
        self.buckets = Some(buckets);
        self
    }

    pub fn max_label_values(mut self, max: usize) -> Self {
        self.max_label_values = Some(max);
        self
    }
}

/// Immutable identity of a created instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentDescriptor {
    pub meter: String,
    pub name: String,
    pub kind: InstrumentKind,
    pub unit: String,
    pub description: String,
    pub tag_keys: Vec<String>,
}

/// State shared by every instrument kind.
pub(crate) struct InstrumentCore<T> {
    descriptor: InstrumentDescriptor,
    disposed: Arc<AtomicBool>,
    subscribers: RwLock<Vec<Arc<Subscription<T>>>>,
    max_label_values: Option<usize>,
    /// Exported values seen so far, one set per tag key.
    label_values_seen: Mutex<Vec<HashSet<String>>>,
}

impl<T: MeasurementValue> InstrumentCore<T> {
    pub(crate) fn new(
        descriptor: InstrumentDescriptor,
        disposed: Arc<AtomicBool>,
        subscribers: Vec<Arc<Subscription<T>>>,
        max_label_values: Option<usize>,
    ) -> Self {
        let seen = vec![HashSet::new(); descriptor.tag_keys.len()];
        Self {
            descriptor,
            disposed,
            subscribers: RwLock::new(subscribers),
            max_label_values,
            label_values_seen: Mutex::new(seen),
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub(crate) fn attach(&self, subscription: &Arc<Subscription<T>>) {
        let mut subs = self.subscribers.write();
        if subs.iter().any(|s| Arc::ptr_eq(s, subscription)) {
            return;
        }
        subs.retain(|s| s.is_active());
        subs.push(Arc::clone(subscription));
    }

    /// Project a tag set onto the declared label keys. The last tag with a
    /// given key wins; missing keys export as the empty string.
    fn label_values(&self, tags: &[Tag]) -> Vec<String> {
        self.descriptor
            .tag_keys
            .iter()
            .map(|key| {
                tags.iter()
                    .rev()
                    .find(|t| t.key == key.as_str())
                    .map(|t| t.value.to_string())
                    .unwrap_or_default()
            })
            .collect()
    }

    /// Label values for a recording. Values past the per-key cap are
    /// replaced by [`OVERFLOW_LABEL_VALUE`] so the series count stays bounded.
    fn admit(&self, tags: &[Tag]) -> Vec<String> {
        let mut values = self.label_values(tags);
        let Some(max) = self.max_label_values else {
            return values;
        };
        let mut seen = self.label_values_seen.lock();
        for (known, value) in seen.iter_mut().zip(values.iter_mut()) {
            if known.contains(value.as_str()) {
                continue;
            }
            if known.len() < max {
                known.insert(value.clone());
            } else {
                debug!(instrument = %self.descriptor.name, value = %value, "Label value cap reached");
                *value = OVERFLOW_LABEL_VALUE.to_owned();
            }
        }
        values
    }

    fn publish(&self, value: T, tags: &[Tag]) {
        for sub in self.subscribers.read().iter() {
            sub.push(value, tags);
        }
    }
}

/// Monotonic counter.
#[derive(Clone)]
pub struct Counter {
    core: Arc<InstrumentCore<i64>>,
    vec: IntCounterVec,
}

impl Counter {
    pub(crate) fn new(core: InstrumentCore<i64>, vec: IntCounterVec) -> Self {
        Self {
            core: Arc::new(core),
            vec,
        }
    }

    pub(crate) fn core(&self) -> &InstrumentCore<i64> {
        &self.core
    }

    pub fn descriptor(&self) -> &InstrumentDescriptor {
        &self.core.descriptor
    }

    /// Add a non-negative amount.
    pub fn add(&self, value: i64, tags: &[Tag]) {
        if self.core.is_disposed() {
            return;
        }
        if value < 0 {
            debug!(instrument = %self.core.descriptor.name, value, "Negative increment ignored on counter");
            return;
        }
        let labels = self.core.admit(tags);
        let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
        match self.vec.get_metric_with_label_values(&labels) {
            Ok(c) => c.inc_by(value as u64),
            Err(e) => debug!(instrument = %self.core.descriptor.name, error = %e, "Counter label mismatch"),
        }
        self.core.publish(value, tags);
    }
}

/// Counter that accepts signed deltas; tracks in-progress counts.
#[derive(Clone)]
pub struct UpDownCounter {
    core: Arc<InstrumentCore<i64>>,
    vec: IntGaugeVec,
}

impl UpDownCounter {
    pub(crate) fn new(core: InstrumentCore<i64>, vec: IntGaugeVec) -> Self {
        Self {
            core: Arc::new(core),
            vec,
        }
    }

    pub(crate) fn core(&self) -> &InstrumentCore<i64> {
        &self.core
    }

    pub fn descriptor(&self) -> &InstrumentDescriptor {
        &self.core.descriptor
    }

    pub fn add(&self, delta: i64, tags: &[Tag]) {
        if self.core.is_disposed() {
            return;
        }
        let labels = self.core.admit(tags);
        let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
        match self.vec.get_metric_with_label_values(&labels) {
            Ok(g) => g.add(delta),
            Err(e) => debug!(instrument = %self.core.descriptor.name, error = %e, "Up-down counter label mismatch"),
        }
        self.core.publish(delta, tags);
    }

    /// Current exported value for a tag set.
    pub fn value(&self, tags: &[Tag]) -> i64 {
        let labels = self.core.label_values(tags);
        let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
        self.vec
            .get_metric_with_label_values(&labels)
            .map(|g| g.get())
            .unwrap_or(0)
    }
}

/// Distribution of sampled values.
#[derive(Clone)]
pub struct Histogram {
    core: Arc<InstrumentCore<f64>>,
    vec: HistogramVec,
}

impl Histogram {
    pub(crate) fn new(core: InstrumentCore<f64>, vec: HistogramVec) -> Self {
        Self {
            core: Arc::new(core),
            vec,
        }
    }

    pub(crate) fn core(&self) -> &InstrumentCore<f64> {
        &self.core
    }

    pub fn descriptor(&self) -> &InstrumentDescriptor {
        &self.core.descriptor
    }

    pub fn record(&self, value: f64, tags: &[Tag]) {
        if self.core.is_disposed() {
            return;
        }
        if !value.is_finite() {
            debug!(instrument = %self.core.descriptor.name, value, "Non-finite sample ignored");
            return;
        }
        let labels = self.core.admit(tags);
        let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
        match self.vec.get_metric_with_label_values(&labels) {
            Ok(h) => h.observe(value),
            Err(e) => debug!(instrument = %self.core.descriptor.name, error = %e, "Histogram label mismatch"),
        }
        self.core.publish(value, tags);
    }

    /// Number of samples exported for a tag set.
    pub fn sample_count(&self, tags: &[Tag]) -> u64 {
        let labels = self.core.label_values(tags);
        let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
        self.vec
            .get_metric_with_label_values(&labels)
            .map(|h| h.get_sample_count())
            .unwrap_or(0)
    }
}

/// Type-erased instrument as stored in a meter.
#[derive(Clone)]
pub enum InstrumentHandle {
    Counter(Counter),
    UpDownCounter(UpDownCounter),
    Histogram(Histogram),
}

impl InstrumentHandle {
    pub(crate) fn kind(&self) -> InstrumentKind {
        match self {
            Self::Counter(_) => InstrumentKind::Counter,
            Self::UpDownCounter(_) => InstrumentKind::UpDownCounter,
            Self::Histogram(_) => InstrumentKind::Histogram,
        }
    }

    pub(crate) fn descriptor(&self) -> &InstrumentDescriptor {
        match self {
            Self::Counter(c) => c.descriptor(),
            Self::UpDownCounter(c) => c.descriptor(),
            Self::Histogram(h) => h.descriptor(),
        }
    }
}
