//! No-op recorder used when metrics are disabled.
//!
//! All hooks succeed but record nothing.

use super::{ConnectionMetricsContext, LifecycleRecorder};

pub struct NoopRecorder;

impl LifecycleRecorder for NoopRecorder {
    fn connection_queued(&self, _endpoint: &str) {}

    fn connection_dequeued(&self, _endpoint: &str) {}

    fn connection_start(&self, _conn: &ConnectionMetricsContext) {}

    fn connection_stop(&self, _conn: &ConnectionMetricsContext) {}

    fn tls_handshake_start(&self, _conn: &ConnectionMetricsContext) {}

    fn tls_handshake_stop(&self, _conn: &ConnectionMetricsContext, _success: bool) {}

    fn request_queued_start(&self, _conn: &ConnectionMetricsContext, _protocol_version: &str) {}

    fn request_queued_stop(&self, _conn: &ConnectionMetricsContext, _protocol_version: &str) {}

    fn upgrade_start(&self, _conn: &ConnectionMetricsContext) {}

    fn upgrade_stop(&self, _conn: &ConnectionMetricsContext) {}
}
