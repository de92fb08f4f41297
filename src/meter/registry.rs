//! The meter registry: creates, caches, enumerates and disposes meters.
//!
//! One registry is created at startup and handed to the server by
//! reference. Lookups take a shared read lock; creation takes the write
//! lock and re-checks, so concurrent callers asking for the same
//! (name, version) always end up with the same [`Meter`].
//!
//! After [`MeterRegistry::dispose_all`] the cache is empty: later lookups
//! build fresh, live meters, while instruments handed out before disposal
//! keep accepting (and dropping) recordings.

use super::listener::{InstrumentRecorder, ListenerTable, MeasurementValue, Sealed};
use super::provider::{Meter, MeterOptions};
use parking_lot::RwLock;
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, TextEncoder};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

type MeterKey = (String, Option<String>);

/// Process-wide store of meters.
#[derive(Default)]
pub struct MeterRegistry {
    meters: RwLock<HashMap<MeterKey, Meter>>,
    listeners: Arc<ListenerTable>,
}

impl MeterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the meter identified by `options.name` and `options.version`,
    /// creating it on first use.
    pub fn get_or_create(&self, options: impl Into<MeterOptions>) -> Meter {
        let options = options.into();
        let key = (options.name.clone(), options.version.clone());

        if let Some(meter) = self.meters.read().get(&key) {
            return Self::cached(meter, &options);
        }

        let mut meters = self.meters.write();
        if let Some(meter) = meters.get(&key) {
            return Self::cached(meter, &options);
        }
        debug!(meter = %options.name, version = ?options.version, "Meter created");
        let meter = Meter::new(options, Arc::clone(&self.listeners));
        meters.insert(key, meter.clone());
        meter
    }

    fn cached(meter: &Meter, options: &MeterOptions) -> Meter {
        if !meter.has_default_tags(&options.tags) {
            debug!(
                meter = %options.name,
                version = ?options.version,
                "Meter already exists with different default tags; keeping the original"
            );
        }
        meter.clone()
    }

    /// Shorthand for [`get_or_create`](Self::get_or_create) without default tags.
    pub fn meter(&self, name: &str, version: Option<&str>) -> Meter {
        let mut options = MeterOptions::new(name);
        options.version = version.map(str::to_owned);
        self.get_or_create(options)
    }

    /// Live meters, in no particular order.
    pub fn meters(&self) -> Vec<Meter> {
        self.meters.read().values().cloned().collect()
    }

    /// Current values of every live instrument, sorted by family name.
    ///
    /// Families with the same exported name (one instrument under several
    /// meter versions, or meter names that sanitize alike) are merged into
    /// one family; their series stay apart through the scope labels.
    pub fn gather(&self) -> Vec<MetricFamily> {
        let mut families: Vec<MetricFamily> =
            self.meters().iter().flat_map(Meter::gather).collect();
        families.sort_by(|a, b| a.get_name().cmp(b.get_name()));

        let mut merged: Vec<MetricFamily> = Vec::with_capacity(families.len());
        for mut family in families {
            match merged.last_mut() {
                Some(last) if last.get_name() == family.get_name() => {
                    if last.get_field_type() == family.get_field_type() {
                        for metric in family.take_metric() {
                            last.mut_metric().push(metric);
                        }
                    } else {
                        warn!(
                            family = %family.get_name(),
                            "Metric family exported with conflicting types; keeping the first"
                        );
                    }
                }
                _ => merged.push(family),
            }
        }
        merged
    }

    /// Gather every live instrument and encode it in Prometheus text format.
    pub fn encode_text(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.gather(), &mut buffer) {
            error!(error = %e, "Failed to encode Prometheus metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    /// Observe every measurement recorded into `instrument` of any meter
    /// named `meter`, including instruments created later.
    pub fn subscribe<T: MeasurementValue>(
        &self,
        meter: &str,
        instrument: &str,
    ) -> InstrumentRecorder<T> {
        let subscription = self.listeners.subscribe::<T>(meter, instrument);
        for m in self.meters().iter().filter(|m| m.name() == meter) {
            if let Some(handle) = m.instrument(instrument) {
                <T as Sealed>::attach(&handle, &subscription);
            }
        }
        InstrumentRecorder::from_subscription(subscription)
    }

    /// Dispose every cached meter and empty the cache. Safe to call more
    /// than once and on a registry that never created anything.
    pub fn dispose_all(&self) {
        let drained: Vec<Meter> = self.meters.write().drain().map(|(_, m)| m).collect();
        let disposed = drained.iter().filter(|m| m.dispose()).count();
        if disposed > 0 {
            info!(count = disposed, "Meter registry disposed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meter::{InstrumentOptions, Tag};
    use std::thread;

    #[test]
    fn test_same_identity_returns_same_meter() {
        let registry = MeterRegistry::new();
        let a = registry.meter("X", Some("1.0"));
        let b = registry.meter("X", Some("1.0"));
        let c = registry.meter("X", Some("2.0"));
        let d = registry.meter("X", None);
        assert!(Meter::ptr_eq(&a, &b));
        assert!(!Meter::ptr_eq(&a, &c));
        assert!(!Meter::ptr_eq(&a, &d));
        assert_eq!(registry.meters().len(), 3);
    }

    #[test]
    fn test_concurrent_lookups_converge() {
        let registry = Arc::new(MeterRegistry::new());
        let meters: Vec<Meter> = thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| registry.meter("concurrent", Some("1.0"))))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(meters.windows(2).all(|w| Meter::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn test_dispose_all_is_idempotent_and_safe_when_empty() {
        let registry = MeterRegistry::new();
        registry.dispose_all();
        registry.dispose_all();
        assert!(registry.meters().is_empty());
    }

    #[test]
    fn test_lookup_after_dispose_returns_fresh_meter() {
        let registry = MeterRegistry::new();
        let before = registry.meter("X", Some("1.0"));
        let counter = before
            .create_up_down_counter(InstrumentOptions::new("current"))
            .unwrap();

        registry.dispose_all();
        assert!(before.is_disposed());
        counter.add(1, &[Tag::new("endpoint", "a")]);

        let after = registry.meter("X", Some("1.0"));
        assert!(!after.is_disposed());
        assert!(!Meter::ptr_eq(&before, &after));
        let fresh = after
            .create_up_down_counter(InstrumentOptions::new("current"))
            .unwrap();
        fresh.add(1, &[]);
        assert_eq!(fresh.value(&[]), 1);
    }

    #[test]
    fn test_subscribe_before_and_after_creation() {
        let registry = MeterRegistry::new();
        let early = registry.subscribe::<i64>("m", "current");

        let meter = registry.meter("m", None);
        let counter = meter
            .create_up_down_counter(InstrumentOptions::new("current").tag_keys(&["endpoint"]))
            .unwrap();
        counter.add(1, &[Tag::new("endpoint", "a")]);

        let late = registry.subscribe::<i64>("m", "current");
        counter.add(-1, &[Tag::new("endpoint", "a")]);

        assert_eq!(early.values(), vec![1, -1]);
        assert_eq!(late.values(), vec![-1]);
        assert_eq!(
            early.measurements()[0].tag("endpoint").and_then(|v| v.as_str()),
            Some("a")
        );
    }

    #[test]
    fn test_dropped_recorder_stops_receiving() {
        let registry = MeterRegistry::new();
        let meter = registry.meter("m", None);
        let hist = meter
            .create_histogram(InstrumentOptions::new("duration").unit("s"))
            .unwrap();
        let recorder = registry.subscribe::<f64>("m", "duration");
        hist.record(0.25, &[]);
        assert_eq!(recorder.values(), vec![0.25]);
        drop(recorder);

        let other = registry.subscribe::<f64>("m", "duration");
        hist.record(0.5, &[]);
        assert_eq!(other.values(), vec![0.5]);
    }

    #[test]
    fn test_gather_spans_all_meters() {
        let registry = MeterRegistry::new();
        registry
            .meter("a", None)
            .create_up_down_counter(InstrumentOptions::new("one"))
            .unwrap()
            .add(1, &[]);
        registry
            .meter("b", None)
            .create_up_down_counter(InstrumentOptions::new("two"))
            .unwrap()
            .add(1, &[]);
        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|f| f.get_name().to_owned())
            .collect();
        assert_eq!(names, vec!["a_one", "b_two"]);
    }

    #[test]
    fn test_encode_text_contains_families() {
        let registry = MeterRegistry::new();
        registry
            .meter("svc", None)
            .create_up_down_counter(InstrumentOptions::new("current").tag_keys(&["endpoint"]))
            .unwrap()
            .add(2, &[Tag::new("endpoint", "127.0.0.1:0")]);
        let text = registry.encode_text();
        assert!(text.contains("svc_current{endpoint=\"127.0.0.1:0\",otel_scope_name=\"svc\"} 2"));
    }

    #[test]
    fn test_versions_of_one_meter_share_a_family() {
        let registry = MeterRegistry::new();
        for version in ["1.0", "2.0"] {
            registry
                .meter("X", Some(version))
                .create_up_down_counter(InstrumentOptions::new("current"))
                .unwrap()
                .add(1, &[]);
        }

        let families = registry.gather();
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].get_metric().len(), 2);

        let text = registry.encode_text();
        assert_eq!(text.matches("# TYPE X_current gauge").count(), 1);
        assert_eq!(text.matches("# HELP X_current").count(), 1);
        assert!(text.contains("X_current{otel_scope_name=\"X\",otel_scope_version=\"1.0\"} 1"));
        assert!(text.contains("X_current{otel_scope_name=\"X\",otel_scope_version=\"2.0\"} 1"));
    }

    #[test]
    fn test_meter_names_that_sanitize_alike_stay_distinct() {
        let registry = MeterRegistry::new();
        for name in ["a.b", "a_b"] {
            registry
                .meter(name, None)
                .create_up_down_counter(InstrumentOptions::new("current"))
                .unwrap()
                .add(1, &[]);
        }

        let families = registry.gather();
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].get_name(), "a_b_current");
        assert_eq!(families[0].get_metric().len(), 2);
        let text = registry.encode_text();
        assert!(text.contains("a_b_current{otel_scope_name=\"a.b\"} 1"));
        assert!(text.contains("a_b_current{otel_scope_name=\"a_b\"} 1"));
    }

    #[test]
    fn test_lookup_with_other_default_tags_keeps_first_meter() {
        let registry = MeterRegistry::new();
        let first = registry.get_or_create(MeterOptions::new("m").tag("region", "eu"));
        let second = registry.get_or_create(MeterOptions::new("m").tag("region", "us"));
        assert!(Meter::ptr_eq(&first, &second));
        assert_eq!(second.tags()[0].value.as_str(), Some("eu"));
        assert!(first.has_default_tags(&[("region".to_owned(), "eu".to_owned())]));
        assert!(!first.has_default_tags(&[("region".to_owned(), "us".to_owned())]));
    }
}
