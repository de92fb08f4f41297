//! Scoped guards and span constructors around lifecycle events.
//!
//! Each guard fires its start hook on construction and its stop hook on
//! drop, so every early return in the transport path still closes the
//! span it opened.

use crate::metrics::{ConnectionMetricsContext, LifecycleRecorder};
use std::sync::Arc;

/// Guard for a connection waiting in the admission queue.
///
/// Dequeues when dropped, whether the connection was admitted or not.
pub struct QueuedConnection {
    recorder: Arc<dyn LifecycleRecorder>,
    endpoint: Arc<str>,
}

impl QueuedConnection {
    pub fn new(recorder: Arc<dyn LifecycleRecorder>, endpoint: Arc<str>) -> Self {
        recorder.connection_queued(&endpoint);
        Self { recorder, endpoint }
    }
}

impl Drop for QueuedConnection {
    fn drop(&mut self) {
        self.recorder.connection_dequeued(&self.endpoint);
    }
}

/// Guard for an active connection. Records the connection duration when dropped.
pub struct ConnectionScope {
    recorder: Arc<dyn LifecycleRecorder>,
    conn: Arc<ConnectionMetricsContext>,
}

impl ConnectionScope {
    pub fn start(recorder: Arc<dyn LifecycleRecorder>, conn: Arc<ConnectionMetricsContext>) -> Self {
        recorder.connection_start(&conn);
        Self { recorder, conn }
    }

    pub fn context(&self) -> &Arc<ConnectionMetricsContext> {
        &self.conn
    }

    pub fn recorder(&self) -> &Arc<dyn LifecycleRecorder> {
        &self.recorder
    }
}

impl Drop for ConnectionScope {
    fn drop(&mut self) {
        self.recorder.connection_stop(&self.conn);
    }
}

/// Guard for an in-flight TLS handshake.
///
/// An incomplete guard closes nothing on drop; the connection stop closes
/// the handshake span without a duration.
pub struct TlsHandshakeScope<'a> {
    recorder: &'a dyn LifecycleRecorder,
    conn: &'a ConnectionMetricsContext,
}

impl<'a> TlsHandshakeScope<'a> {
    pub fn start(recorder: &'a dyn LifecycleRecorder, conn: &'a ConnectionMetricsContext) -> Self {
        recorder.tls_handshake_start(conn);
        Self { recorder, conn }
    }

    /// Record the handshake outcome and its duration.
    pub fn complete(self, success: bool) {
        self.recorder.tls_handshake_stop(self.conn, success);
    }
}

/// Guard for a request waiting for a dispatch slot.
pub struct QueuedRequest<'a> {
    recorder: &'a dyn LifecycleRecorder,
    conn: &'a ConnectionMetricsContext,
    version: &'a str,
}

impl<'a> QueuedRequest<'a> {
    pub fn new(
        recorder: &'a dyn LifecycleRecorder,
        conn: &'a ConnectionMetricsContext,
        version: &'a str,
    ) -> Self {
        recorder.request_queued_start(conn, version);
        Self {
            recorder,
            conn,
            version,
        }
    }

    /// The request left the queue and is being handled.
    pub fn dispatch(self) {}
}

impl Drop for QueuedRequest<'_> {
    fn drop(&mut self) {
        self.recorder.request_queued_stop(self.conn, self.version);
    }
}

/// Standardized span constructors.
pub mod spans {
    use tracing::{Span, info_span};

    /// Create a span for a client connection.
    pub fn connection(id: u64, peer: &str, endpoint: &str) -> Span {
        info_span!("connection", id, peer = %peer, endpoint = %endpoint)
    }

    /// Create a span for a listener.
    pub fn listener(endpoint: &str, tls: bool) -> Span {
        info_span!("listener", endpoint = %endpoint, tls)
    }
}
