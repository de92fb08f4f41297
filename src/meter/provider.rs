//! Meters: named, versioned owners of instruments.

use super::instrument::{
    Counter, Histogram, InstrumentCore, InstrumentDescriptor, InstrumentHandle, InstrumentKind,
    InstrumentOptions, UpDownCounter,
};
use super::listener::ListenerTable;
use super::tag::{Tag, is_valid_name, sanitize};
use crate::error::MetricsError;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use prometheus::proto::MetricFamily;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Constant label naming the meter every exported series came from.
pub const SCOPE_NAME_LABEL: &str = "otel_scope_name";
/// Constant label carrying the meter version, when it has one.
pub const SCOPE_VERSION_LABEL: &str = "otel_scope_version";

/// Identity and defaults of a meter.
#[derive(Debug, Clone, Default)]
pub struct MeterOptions {
    pub name: String,
    pub version: Option<String>,
    /// Attached to every exported family of the meter as constant labels.
    pub tags: Vec<(String, String)>,
}

impl MeterOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }
}

impl From<&str> for MeterOptions {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// A named, versioned group of instruments.
///
/// Cheap to clone; clones share the same instruments. Once disposed,
/// every instrument created by the meter silently drops recordings.
#[derive(Clone)]
pub struct Meter {
    inner: Arc<MeterInner>,
}

struct MeterInner {
    name: String,
    version: Option<String>,
    tags: Vec<Tag>,
    default_tags: Vec<(String, String)>,
    const_labels: HashMap<String, String>,
    prom: Registry,
    instruments: DashMap<String, InstrumentHandle>,
    disposed: Arc<AtomicBool>,
    listeners: Arc<ListenerTable>,
}

impl Meter {
    pub(crate) fn new(options: MeterOptions, listeners: Arc<ListenerTable>) -> Self {
        let mut const_labels: HashMap<String, String> = options
            .tags
            .iter()
            .map(|(k, v)| (sanitize(k), v.clone()))
            .collect();
        const_labels.insert(SCOPE_NAME_LABEL.to_owned(), options.name.clone());
        if let Some(version) = &options.version {
            const_labels.insert(SCOPE_VERSION_LABEL.to_owned(), version.clone());
        }
        let tags = options
            .tags
            .iter()
            .map(|(k, v)| Tag::new(k.clone(), v.clone()))
            .collect();
        Self {
            inner: Arc::new(MeterInner {
                name: options.name,
                version: options.version,
                tags,
                default_tags: options.tags,
                const_labels,
                prom: Registry::new(),
                instruments: DashMap::new(),
                disposed: Arc::new(AtomicBool::new(false)),
                listeners,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn version(&self) -> Option<&str> {
        self.inner.version.as_deref()
    }

    /// Default tags given at creation.
    pub fn tags(&self) -> &[Tag] {
        &self.inner.tags
    }

    /// Whether the meter was created with exactly these default tags.
    pub(crate) fn has_default_tags(&self, tags: &[(String, String)]) -> bool {
        self.inner.default_tags == tags
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Whether two handles refer to the same meter instance.
    pub fn ptr_eq(a: &Meter, b: &Meter) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Create a monotonic counter, or return the existing one of that name.
    pub fn create_counter(&self, options: InstrumentOptions) -> Result<Counter, MetricsError> {
        match self.get_or_build(options, InstrumentKind::Counter)? {
            InstrumentHandle::Counter(c) => Ok(c),
            other => Err(self.mismatch(&other, InstrumentKind::Counter)),
        }
    }

    /// Create an up-down counter, or return the existing one of that name.
    pub fn create_up_down_counter(
        &self,
        options: InstrumentOptions,
    ) -> Result<UpDownCounter, MetricsError> {
        match self.get_or_build(options, InstrumentKind::UpDownCounter)? {
            InstrumentHandle::UpDownCounter(c) => Ok(c),
            other => Err(self.mismatch(&other, InstrumentKind::UpDownCounter)),
        }
    }

    /// Create a histogram, or return the existing one of that name.
    pub fn create_histogram(&self, options: InstrumentOptions) -> Result<Histogram, MetricsError> {
        match self.get_or_build(options, InstrumentKind::Histogram)? {
            InstrumentHandle::Histogram(h) => Ok(h),
            other => Err(self.mismatch(&other, InstrumentKind::Histogram)),
        }
    }

    /// Descriptors of every instrument created so far, sorted by name.
    pub fn instruments(&self) -> Vec<InstrumentDescriptor> {
        let mut out: Vec<_> = self
            .inner
            .instruments
            .iter()
            .map(|e| e.value().descriptor().clone())
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Current exported values of this meter's instruments.
    pub fn gather(&self) -> Vec<MetricFamily> {
        self.inner.prom.gather()
    }

    pub(crate) fn instrument(&self, name: &str) -> Option<InstrumentHandle> {
        self.inner.instruments.get(name).map(|e| e.value().clone())
    }

    /// Flag the meter disposed. Returns `false` if it already was.
    pub(crate) fn dispose(&self) -> bool {
        let first = !self.inner.disposed.swap(true, Ordering::AcqRel);
        if first {
            info!(
                meter = %self.inner.name,
                instruments = self.inner.instruments.len(),
                "Meter disposed"
            );
        }
        first
    }

    fn mismatch(&self, existing: &InstrumentHandle, requested: InstrumentKind) -> MetricsError {
        MetricsError::KindMismatch {
            name: existing.descriptor().name.clone(),
            existing: existing.kind(),
            requested,
        }
    }

    fn get_or_build(
        &self,
        options: InstrumentOptions,
        kind: InstrumentKind,
    ) -> Result<InstrumentHandle, MetricsError> {
        if !is_valid_name(&options.name) {
            return Err(MetricsError::InvalidName(options.name));
        }
        let mut seen = HashSet::new();
        for key in &options.tag_keys {
            if !is_valid_name(key) || !seen.insert(sanitize(key)) {
                return Err(MetricsError::InvalidTagKey {
                    instrument: options.name.clone(),
                    key: key.clone(),
                });
            }
        }

        match self.inner.instruments.entry(options.name.clone()) {
            Entry::Occupied(existing) => {
                let handle = existing.get().clone();
                if handle.kind() != kind {
                    return Err(self.mismatch(&handle, kind));
                }
                if handle.descriptor().tag_keys != options.tag_keys {
                    debug!(
                        meter = %self.inner.name,
                        instrument = %options.name,
                        "Instrument already exists with different tag keys; keeping the original"
                    );
                }
                Ok(handle)
            }
            Entry::Vacant(slot) => {
                let handle = self.build(options, kind)?;
                debug!(
                    meter = %self.inner.name,
                    instrument = %handle.descriptor().name,
                    kind = %kind,
                    "Instrument created"
                );
                Ok(slot.insert(handle).value().clone())
            }
        }
    }

    fn build(
        &self,
        options: InstrumentOptions,
        kind: InstrumentKind,
    ) -> Result<InstrumentHandle, MetricsError> {
        let help = if options.description.is_empty() {
            options.name.clone()
        } else {
            options.description.clone()
        };
        let labels: Vec<String> = options.tag_keys.iter().map(|k| sanitize(k)).collect();
        let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
        let base = format!("{}_{}", sanitize(&self.inner.name), sanitize(&options.name));

        let descriptor = InstrumentDescriptor {
            meter: self.inner.name.clone(),
            name: options.name,
            kind,
            unit: options.unit,
            description: options.description,
            tag_keys: options.tag_keys,
        };
        let disposed = Arc::clone(&self.inner.disposed);

        let handle = match kind {
            InstrumentKind::Counter => {
                let opts = Opts::new(format!("{base}_total"), help)
                    .const_labels(self.inner.const_labels.clone());
                let vec = IntCounterVec::new(opts, &labels)?;
                self.inner.prom.register(Box::new(vec.clone()))?;
                let subs = self.inner.listeners.matching(&descriptor.meter, &descriptor.name);
                InstrumentHandle::Counter(Counter::new(
                    InstrumentCore::new(descriptor, disposed, subs, options.max_label_values),
                    vec,
                ))
            }
            InstrumentKind::UpDownCounter => {
                let opts =
                    Opts::new(base, help).const_labels(self.inner.const_labels.clone());
                let vec = IntGaugeVec::new(opts, &labels)?;
                self.inner.prom.register(Box::new(vec.clone()))?;
                let subs = self.inner.listeners.matching(&descriptor.meter, &descriptor.name);
                InstrumentHandle::UpDownCounter(UpDownCounter::new(
                    InstrumentCore::new(descriptor, disposed, subs, options.max_label_values),
                    vec,
                ))
            }
            InstrumentKind::Histogram => {
                let name = if descriptor.unit == "s" {
                    format!("{base}_seconds")
                } else {
                    base
                };
                let mut opts =
                    HistogramOpts::new(name, help).const_labels(self.inner.const_labels.clone());
                if let Some(buckets) = options.buckets {
                    opts = opts.buckets(buckets);
                }
                let vec = HistogramVec::new(opts, &labels)?;
                self.inner.prom.register(Box::new(vec.clone()))?;
                let subs = self.inner.listeners.matching(&descriptor.meter, &descriptor.name);
                InstrumentHandle::Histogram(Histogram::new(
                    InstrumentCore::new(descriptor, disposed, subs, options.max_label_values),
                    vec,
                ))
            }
        };
        Ok(handle)
    }
}

impl std::fmt::Debug for Meter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Meter")
            .field("name", &self.inner.name)
            .field("version", &self.inner.version)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meter() -> Meter {
        Meter::new(MeterOptions::new("test.meter"), Arc::new(ListenerTable::default()))
    }

    #[test]
    fn test_same_name_same_kind_returns_existing() {
        let m = meter();
        let a = m
            .create_up_down_counter(InstrumentOptions::new("current").tag_keys(&["endpoint"]))
            .unwrap();
        let b = m
            .create_up_down_counter(InstrumentOptions::new("current").tag_keys(&["endpoint"]))
            .unwrap();
        let tags = [Tag::new("endpoint", "a")];
        a.add(1, &tags);
        b.add(1, &tags);
        assert_eq!(a.value(&tags), 2);
        assert_eq!(m.instruments().len(), 1);
    }

    #[test]
    fn test_kind_mismatch_is_an_error() {
        let m = meter();
        m.create_histogram(InstrumentOptions::new("duration").unit("s"))
            .unwrap();
        let err = m
            .create_counter(InstrumentOptions::new("duration"))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            MetricsError::KindMismatch {
                existing: InstrumentKind::Histogram,
                requested: InstrumentKind::Counter,
                ..
            }
        ));
    }

    #[test]
    fn test_invalid_names_rejected() {
        let m = meter();
        assert!(matches!(
            m.create_counter(InstrumentOptions::new("bad name")),
            Err(MetricsError::InvalidName(_))
        ));
        assert!(matches!(
            m.create_counter(InstrumentOptions::new("ok").tag_keys(&["a-b", "a.b"])),
            Err(MetricsError::InvalidTagKey { .. })
        ));
    }

    #[test]
    fn test_disposed_meter_drops_recordings() {
        let m = meter();
        let c = m
            .create_up_down_counter(InstrumentOptions::new("current"))
            .unwrap();
        c.add(1, &[]);
        assert!(m.dispose());
        assert!(!m.dispose());
        c.add(1, &[]);
        assert_eq!(c.value(&[]), 1);
    }

    #[test]
    fn test_label_value_cap_folds_new_values_into_overflow() {
        let m = meter();
        let sub = crate::meter::InstrumentRecorder::from_subscription(
            m.inner.listeners.subscribe::<f64>("test.meter", "duration"),
        );
        let h = m
            .create_histogram(
                InstrumentOptions::new("duration")
                    .unit("s")
                    .tag_keys(&["tenant"])
                    .max_label_values(2),
            )
            .unwrap();
        for tenant in ["a", "b", "c", "a", "d"] {
            h.record(0.1, &[Tag::new("tenant", tenant)]);
        }

        let count = |v: &'static str| h.sample_count(&[Tag::new("tenant", v)]);
        assert_eq!(count("a"), 2);
        assert_eq!(count("b"), 1);
        assert_eq!(count("c"), 0);
        assert_eq!(count(crate::meter::OVERFLOW_LABEL_VALUE), 2);
        assert_eq!(m.gather()[0].get_metric().len(), 3);

        let seen: Vec<String> = sub
            .measurements()
            .iter()
            .filter_map(|m| m.tag("tenant").map(|v| v.to_string()))
            .collect();
        assert_eq!(seen, vec!["a", "b", "c", "a", "d"]);
    }

    #[test]
    fn test_gather_uses_prometheus_names() {
        let m = Meter::new(
            MeterOptions::new("test.meter").tag("region", "eu"),
            Arc::new(ListenerTable::default()),
        );
        let h = m
            .create_histogram(
                InstrumentOptions::new("connection-duration")
                    .unit("s")
                    .tag_keys(&["endpoint"])
                    .buckets(vec![0.1, 1.0]),
            )
            .unwrap();
        h.record(0.5, &[Tag::new("endpoint", "127.0.0.1:0")]);
        let families = m.gather();
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].get_name(), "test_meter_connection_duration_seconds");
        assert_eq!(h.sample_count(&[Tag::new("endpoint", "127.0.0.1:0")]), 1);
    }
}
