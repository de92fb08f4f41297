//! Per-connection metrics record.
//!
//! Owned by the transport for the lifetime of one connection and shared
//! (as `Arc`) with any concurrent stage that handles it. The recorder only
//! borrows it at transition calls. All state transitions are one-shot
//! flags so repeated or out-of-order calls are detected, not double counted.

use super::instruments::tag_keys;
use super::tags::TagAccumulator;
use crate::meter::{Tag, TagValue};
use parking_lot::Mutex;
use std::borrow::Cow;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

pub struct ConnectionMetricsContext {
    id: u64,
    endpoint: Arc<str>,
    started_at: OnceLock<Instant>,
    active: AtomicBool,
    stopped: AtomicBool,
    upgraded: AtomicBool,
    tls_started_at: Mutex<Option<Instant>>,
    pending_requests: Mutex<Vec<(String, u32)>>,
    tags: TagAccumulator,
}

impl ConnectionMetricsContext {
    pub fn new(id: u64, endpoint: impl Into<Arc<str>>) -> Self {
        Self {
            id,
            endpoint: endpoint.into(),
            started_at: OnceLock::new(),
            active: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            upgraded: AtomicBool::new(false),
            tls_started_at: Mutex::new(None),
            pending_requests: Mutex::new(Vec::new()),
            tags: TagAccumulator::new(),
        }
    }

    /// Create a record whose start instant was captured earlier (e.g. at accept).
    pub fn with_start(id: u64, endpoint: impl Into<Arc<str>>, started_at: Instant) -> Self {
        let ctx = Self::new(id, endpoint);
        let _ = ctx.started_at.set(started_at);
        ctx
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn tags(&self) -> &TagAccumulator {
        &self.tags
    }

    /// Attach a custom dimension to the connection-duration measurement.
    pub fn add_tag(&self, key: impl Into<Cow<'static, str>>, value: impl Into<TagValue>) {
        self.tags.add(key, value);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn is_upgraded(&self) -> bool {
        self.upgraded.load(Ordering::Acquire)
    }

    pub fn is_tls_in_progress(&self) -> bool {
        self.tls_started_at.lock().is_some()
    }

    /// Time since the connection started, if it has.
    pub fn elapsed(&self) -> Option<Duration> {
        self.started_at.get().map(Instant::elapsed)
    }

    /// Number of requests still sitting in the dispatch queue.
    pub fn pending_requests(&self) -> u32 {
        self.pending_requests.lock().iter().map(|(_, n)| n).sum()
    }

    pub(crate) fn endpoint_tag(&self) -> Tag {
        Tag::new(tag_keys::ENDPOINT, self.endpoint.to_string())
    }

    /// Returns `true` on the first start of a connection that has not stopped.
    pub(crate) fn mark_started(&self) -> bool {
        if self.is_stopped() || self.active.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.started_at.get_or_init(Instant::now);
        true
    }

    /// Returns `true` on the first stop.
    pub(crate) fn mark_stopped(&self) -> bool {
        !self.stopped.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn begin_tls(&self) -> bool {
        let mut slot = self.tls_started_at.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(Instant::now());
        true
    }

    /// Close the TLS span, returning its start instant if one was open.
    pub(crate) fn end_tls(&self) -> Option<Instant> {
        self.tls_started_at.lock().take()
    }

    pub(crate) fn begin_upgrade(&self) -> bool {
        !self.upgraded.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn end_upgrade(&self) -> bool {
        self.upgraded.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn push_pending_request(&self, version: &str) {
        let mut pending = self.pending_requests.lock();
        match pending.iter_mut().find(|(v, _)| v == version) {
            Some((_, n)) => *n += 1,
            None => pending.push((version.to_owned(), 1)),
        }
    }

    /// Returns `true` if a pending request for `version` was removed.
    pub(crate) fn pop_pending_request(&self, version: &str) -> bool {
        let mut pending = self.pending_requests.lock();
        match pending.iter_mut().find(|(v, n)| v == version && *n > 0) {
            Some((_, n)) => {
                *n -= 1;
                true
            }
            None => false,
        }
    }

    pub(crate) fn drain_pending_requests(&self) -> Vec<(String, u32)> {
        let mut pending = self.pending_requests.lock();
        pending.drain(..).filter(|(_, n)| *n > 0).collect()
    }
}

impl std::fmt::Debug for ConnectionMetricsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionMetricsContext")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("active", &self.is_active())
            .field("stopped", &self.is_stopped())
            .field("upgraded", &self.is_upgraded())
            .finish()
    }
}
