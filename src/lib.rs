//! connmeter - connection lifecycle metrics for network servers.
//!
//! Counts and times every connection a server handles: how many are
//! queued, active, mid-TLS-handshake or upgraded, how long each lasted,
//! and how many requests are waiting for dispatch. Instruments are owned
//! by an explicit [`meter::MeterRegistry`] and exported through Prometheus
//! families; the transport calls into a [`metrics::LifecycleRecorder`].

pub mod config;
pub mod error;
pub mod meter;
pub mod metrics;
pub mod network;
pub mod telemetry;
