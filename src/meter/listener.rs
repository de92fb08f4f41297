//! In-process measurement listeners.
//!
//! An [`InstrumentRecorder`] subscribes to one instrument by (meter name,
//! instrument name) and keeps every measurement recorded into it, in
//! order. Subscriptions made before the instrument exists attach when it
//! is created.

use super::instrument::InstrumentHandle;
use super::tag::{Tag, TagValue, find_tag};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A single recorded value with the tags it was recorded under.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement<T> {
    pub value: T,
    pub tags: Vec<Tag>,
}

impl<T> Measurement<T> {
    /// Look up a tag by key.
    pub fn tag(&self, key: &str) -> Option<&TagValue> {
        find_tag(&self.tags, key)
    }
}

/// Value types an instrument can record: `i64` for counters and
/// up-down counters, `f64` for histograms.
pub trait MeasurementValue: Copy + Send + Sync + fmt::Debug + 'static + Sealed {}

impl MeasurementValue for i64 {}
impl MeasurementValue for f64 {}

pub trait Sealed: Sized {
    fn subscriptions(table: &ListenerTable) -> &RwLock<Vec<Arc<Subscription<Self>>>>;

    fn attach(handle: &InstrumentHandle, subscription: &Arc<Subscription<Self>>);
}

impl Sealed for i64 {
    fn subscriptions(table: &ListenerTable) -> &RwLock<Vec<Arc<Subscription<Self>>>> {
        &table.long
    }

    fn attach(handle: &InstrumentHandle, subscription: &Arc<Subscription<Self>>) {
        match handle {
            InstrumentHandle::Counter(c) => c.core().attach(subscription),
            InstrumentHandle::UpDownCounter(c) => c.core().attach(subscription),
            InstrumentHandle::Histogram(_) => {}
        }
    }
}

impl Sealed for f64 {
    fn subscriptions(table: &ListenerTable) -> &RwLock<Vec<Arc<Subscription<Self>>>> {
        &table.double
    }

    fn attach(handle: &InstrumentHandle, subscription: &Arc<Subscription<Self>>) {
        if let InstrumentHandle::Histogram(h) = handle {
            h.core().attach(subscription);
        }
    }
}

/// One listener's interest in one instrument.
pub struct Subscription<T> {
    meter: String,
    instrument: String,
    active: AtomicBool,
    measurements: Mutex<Vec<Measurement<T>>>,
}

impl<T: Copy> Subscription<T> {
    fn new(meter: &str, instrument: &str) -> Self {
        Self {
            meter: meter.to_owned(),
            instrument: instrument.to_owned(),
            active: AtomicBool::new(true),
            measurements: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn matches(&self, meter: &str, instrument: &str) -> bool {
        self.meter == meter && self.instrument == instrument
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn push(&self, value: T, tags: &[Tag]) {
        if !self.is_active() {
            return;
        }
        self.measurements.lock().push(Measurement {
            value,
            tags: tags.to_vec(),
        });
    }
}

/// Every live subscription, shared by the registry and all of its meters.
#[derive(Default)]
pub struct ListenerTable {
    long: RwLock<Vec<Arc<Subscription<i64>>>>,
    double: RwLock<Vec<Arc<Subscription<f64>>>>,
}

impl ListenerTable {
    /// Subscriptions interested in the given instrument.
    pub(crate) fn matching<T: MeasurementValue>(
        &self,
        meter: &str,
        instrument: &str,
    ) -> Vec<Arc<Subscription<T>>> {
        T::subscriptions(self)
            .read()
            .iter()
            .filter(|s| s.is_active() && s.matches(meter, instrument))
            .cloned()
            .collect()
    }

    pub(crate) fn subscribe<T: MeasurementValue>(
        &self,
        meter: &str,
        instrument: &str,
    ) -> Arc<Subscription<T>> {
        let subscription = Arc::new(Subscription::new(meter, instrument));
        let mut subs = T::subscriptions(self).write();
        subs.retain(|s| s.is_active());
        subs.push(Arc::clone(&subscription));
        subscription
    }
}

/// Collects the measurements of one instrument.
///
/// Dropping the recorder detaches it; instruments stop delivering to it.
pub struct InstrumentRecorder<T: MeasurementValue> {
    subscription: Arc<Subscription<T>>,
}

impl<T: MeasurementValue> InstrumentRecorder<T> {
    pub(crate) fn from_subscription(subscription: Arc<Subscription<T>>) -> Self {
        Self { subscription }
    }

    /// Subscribe to `instrument` of every meter named `meter` in `registry`.
    pub fn new(registry: &super::MeterRegistry, meter: &str, instrument: &str) -> Self {
        registry.subscribe(meter, instrument)
    }

    /// Snapshot of all measurements so far, in recording order.
    pub fn measurements(&self) -> Vec<Measurement<T>> {
        self.subscription.measurements.lock().clone()
    }

    /// Snapshot of the recorded values only.
    pub fn values(&self) -> Vec<T> {
        self.subscription
            .measurements
            .lock()
            .iter()
            .map(|m| m.value)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.subscription.measurements.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.subscription.measurements.lock().clear();
    }
}

impl<T: MeasurementValue> Drop for InstrumentRecorder<T> {
    fn drop(&mut self) {
        self.subscription.active.store(false, Ordering::Release);
    }
}
