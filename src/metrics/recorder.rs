//! Lifecycle recorder: turns connection lifecycle transitions into
//! instrument operations.
//!
//! Every operation is synchronous, never fails and never blocks on other
//! connections. Misuse (a stop without a start, a second stop, a transition
//! on a stopped connection) is ignored with a debug diagnostic so that
//! instrumentation can never disturb connection handling.

use super::context::ConnectionMetricsContext;
use super::instruments::{ServerInstruments, tag_keys};
use crate::config::MetricsConfig;
use crate::error::MetricsError;
use crate::meter::{MeterRegistry, Tag};
use tracing::debug;

/// Hooks called by the transport, TLS, dispatch and upgrade layers.
pub trait LifecycleRecorder: Send + Sync {
    /// A connection entered the admission queue.
    fn connection_queued(&self, endpoint: &str);

    /// A connection left the admission queue (admitted or dropped).
    fn connection_dequeued(&self, endpoint: &str);

    /// A connection was admitted and is now active.
    fn connection_start(&self, conn: &ConnectionMetricsContext);

    /// A connection ended. Closes any open TLS span, pending queued
    /// requests and upgrade before recording the connection duration.
    fn connection_stop(&self, conn: &ConnectionMetricsContext);

    fn tls_handshake_start(&self, conn: &ConnectionMetricsContext);

    /// The handshake reached a terminal state; both outcomes record a duration.
    fn tls_handshake_stop(&self, conn: &ConnectionMetricsContext, success: bool);

    /// A request entered the dispatch queue.
    fn request_queued_start(&self, conn: &ConnectionMetricsContext, protocol_version: &str);

    /// A request left the dispatch queue.
    fn request_queued_stop(&self, conn: &ConnectionMetricsContext, protocol_version: &str);

    fn upgrade_start(&self, conn: &ConnectionMetricsContext);

    fn upgrade_stop(&self, conn: &ConnectionMetricsContext);
}

/// Recorder backed by the server instrument set.
#[derive(Clone)]
pub struct ServerMetrics {
    instruments: ServerInstruments,
}

impl ServerMetrics {
    /// Build the instrument set on `registry` using `config`.
    pub fn new(registry: &MeterRegistry, config: &MetricsConfig) -> Result<Self, MetricsError> {
        Ok(Self::from_instruments(ServerInstruments::new(registry, config)?))
    }

    pub fn from_instruments(instruments: ServerInstruments) -> Self {
        Self { instruments }
    }

    pub fn instruments(&self) -> &ServerInstruments {
        &self.instruments
    }

    fn close_upgrade(&self, conn: &ConnectionMetricsContext, endpoint: &Tag) -> bool {
        if !conn.end_upgrade() {
            return false;
        }
        self.instruments
            .current_upgraded_requests
            .add(-1, std::slice::from_ref(endpoint));
        true
    }
}

fn version_tag(protocol_version: &str) -> [Tag; 1] {
    [Tag::new(tag_keys::VERSION, protocol_version.to_owned())]
}

fn endpoint_tag(endpoint: &str) -> [Tag; 1] {
    [Tag::new(tag_keys::ENDPOINT, endpoint.to_owned())]
}

impl LifecycleRecorder for ServerMetrics {
    fn connection_queued(&self, endpoint: &str) {
        self.instruments
            .queued_connections
            .add(1, &endpoint_tag(endpoint));
    }

    fn connection_dequeued(&self, endpoint: &str) {
        self.instruments
            .queued_connections
            .add(-1, &endpoint_tag(endpoint));
    }

    fn connection_start(&self, conn: &ConnectionMetricsContext) {
        if !conn.mark_started() {
            debug!(conn_id = conn.id(), endpoint = %conn.endpoint(), "Connection start ignored: already started or stopped");
            return;
        }
        self.instruments
            .current_connections
            .add(1, &[conn.endpoint_tag()]);
    }

    fn connection_stop(&self, conn: &ConnectionMetricsContext) {
        if !conn.mark_stopped() {
            debug!(conn_id = conn.id(), endpoint = %conn.endpoint(), "Duplicate connection stop ignored");
            return;
        }
        let custom = conn.tags().seal();
        let endpoint = conn.endpoint_tag();
        let fixed = std::slice::from_ref(&endpoint);

        if conn.end_tls().is_some() {
            debug!(conn_id = conn.id(), "TLS handshake aborted by connection close");
            self.instruments.current_tls_handshakes.add(-1, fixed);
        }

        for (version, pending) in conn.drain_pending_requests() {
            debug!(conn_id = conn.id(), %version, pending, "Draining queued requests at connection close");
            let tags = version_tag(&version);
            for _ in 0..pending {
                self.instruments.queued_requests.add(-1, &tags);
            }
        }

        self.close_upgrade(conn, &endpoint);

        if !conn.is_active() {
            debug!(conn_id = conn.id(), endpoint = %conn.endpoint(), "Connection stopped without start");
            return;
        }
        self.instruments.current_connections.add(-1, fixed);

        let elapsed = conn.elapsed().unwrap_or_default().as_secs_f64();
        let mut tags = Vec::with_capacity(1 + custom.len());
        tags.push(endpoint);
        tags.extend(custom);
        self.instruments.connection_duration.record(elapsed, &tags);
    }

    fn tls_handshake_start(&self, conn: &ConnectionMetricsContext) {
        if conn.is_stopped() {
            debug!(conn_id = conn.id(), "TLS handshake start on stopped connection ignored");
            return;
        }
        if !conn.begin_tls() {
            debug!(conn_id = conn.id(), "TLS handshake already in progress");
            return;
        }
        self.instruments
            .current_tls_handshakes
            .add(1, &[conn.endpoint_tag()]);
    }

    fn tls_handshake_stop(&self, conn: &ConnectionMetricsContext, success: bool) {
        let Some(started) = conn.end_tls() else {
            debug!(conn_id = conn.id(), success, "TLS handshake stop without start ignored");
            return;
        };
        let tags = [conn.endpoint_tag()];
        self.instruments.current_tls_handshakes.add(-1, &tags);
        self.instruments
            .tls_handshake_duration
            .record(started.elapsed().as_secs_f64(), &tags);
    }

    fn request_queued_start(&self, conn: &ConnectionMetricsContext, protocol_version: &str) {
        if conn.is_stopped() {
            debug!(conn_id = conn.id(), %protocol_version, "Request queued on stopped connection ignored");
            return;
        }
        conn.push_pending_request(protocol_version);
        self.instruments
            .queued_requests
            .add(1, &version_tag(protocol_version));
    }

    fn request_queued_stop(&self, conn: &ConnectionMetricsContext, protocol_version: &str) {
        if !conn.pop_pending_request(protocol_version) {
            debug!(conn_id = conn.id(), %protocol_version, "Request dequeue without queue ignored");
            return;
        }
        self.instruments
            .queued_requests
            .add(-1, &version_tag(protocol_version));
    }

    fn upgrade_start(&self, conn: &ConnectionMetricsContext) {
        if conn.is_stopped() {
            debug!(conn_id = conn.id(), "Upgrade on stopped connection ignored");
            return;
        }
        if !conn.begin_upgrade() {
            debug!(conn_id = conn.id(), "Connection already upgraded");
            return;
        }
        self.instruments
            .current_upgraded_requests
            .add(1, &[conn.endpoint_tag()]);
    }

    fn upgrade_stop(&self, conn: &ConnectionMetricsContext) {
        if !self.close_upgrade(conn, &conn.endpoint_tag()) {
            debug!(conn_id = conn.id(), "Upgrade stop without upgrade ignored");
        }
    }
}
