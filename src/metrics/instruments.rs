//! The fixed instrument set owned by the server.
//!
//! Every instrument the server records into is declared here at compile
//! time. [`ServerInstruments::new`] builds them once at startup, so name,
//! kind or tag-key problems surface before the first connection.

use crate::config::MetricsConfig;
use crate::error::MetricsError;
use crate::meter::{
    Histogram, InstrumentKind, InstrumentOptions, Meter, MeterOptions, MeterRegistry,
    UpDownCounter,
};

/// Default meter name for server instruments.
pub const METER_NAME: &str = "connmeter.server";

/// Tag keys set by the server itself.
pub mod tag_keys {
    /// Configured local endpoint the connection was accepted on.
    pub const ENDPOINT: &str = "endpoint";
    /// Protocol version label of a queued request.
    pub const VERSION: &str = "version";

    /// Keys custom connection tags may not use.
    pub const RESERVED: &[&str] = &[ENDPOINT, VERSION];

    pub fn is_reserved(key: &str) -> bool {
        RESERVED.contains(&key)
    }
}

/// Static declaration of one server instrument.
#[derive(Debug, Clone, Copy)]
pub struct InstrumentDefinition {
    pub name: &'static str,
    pub kind: InstrumentKind,
    pub unit: &'static str,
    pub description: &'static str,
    pub tag_keys: &'static [&'static str],
}

impl InstrumentDefinition {
    fn options(&self) -> InstrumentOptions {
        InstrumentOptions::new(self.name)
            .unit(self.unit)
            .description(self.description)
            .tag_keys(self.tag_keys)
    }
}

pub const CONNECTION_DURATION: InstrumentDefinition = InstrumentDefinition {
    name: "connection-duration",
    kind: InstrumentKind::Histogram,
    unit: "s",
    description: "Duration of connections on the server",
    tag_keys: &[tag_keys::ENDPOINT],
};

pub const CURRENT_CONNECTIONS: InstrumentDefinition = InstrumentDefinition {
    name: "current-connections",
    kind: InstrumentKind::UpDownCounter,
    unit: "{connection}",
    description: "Number of connections that are currently active on the server",
    tag_keys: &[tag_keys::ENDPOINT],
};

pub const QUEUED_CONNECTIONS: InstrumentDefinition = InstrumentDefinition {
    name: "queued-connections",
    kind: InstrumentKind::UpDownCounter,
    unit: "{connection}",
    description: "Number of connections that are currently queued and waiting to start",
    tag_keys: &[tag_keys::ENDPOINT],
};

pub const QUEUED_REQUESTS: InstrumentDefinition = InstrumentDefinition {
    name: "queued-requests",
    kind: InstrumentKind::UpDownCounter,
    unit: "{request}",
    description: "Number of requests that are currently queued and waiting to start",
    tag_keys: &[tag_keys::VERSION],
};

pub const TLS_HANDSHAKE_DURATION: InstrumentDefinition = InstrumentDefinition {
    name: "tls-handshake-duration",
    kind: InstrumentKind::Histogram,
    unit: "s",
    description: "Duration of TLS handshakes on the server",
    tag_keys: &[tag_keys::ENDPOINT],
};

pub const CURRENT_TLS_HANDSHAKES: InstrumentDefinition = InstrumentDefinition {
    name: "current-tls-handshakes",
    kind: InstrumentKind::UpDownCounter,
    unit: "{handshake}",
    description: "Number of TLS handshakes that are currently in progress on the server",
    tag_keys: &[tag_keys::ENDPOINT],
};

pub const CURRENT_UPGRADED_REQUESTS: InstrumentDefinition = InstrumentDefinition {
    name: "current-upgraded-requests",
    kind: InstrumentKind::UpDownCounter,
    unit: "{request}",
    description: "Number of upgraded requests that are currently active on the server",
    tag_keys: &[tag_keys::ENDPOINT],
};

/// Every server instrument, in declaration order.
pub const INSTRUMENTS: [InstrumentDefinition; 7] = [
    CONNECTION_DURATION,
    CURRENT_CONNECTIONS,
    QUEUED_CONNECTIONS,
    QUEUED_REQUESTS,
    TLS_HANDSHAKE_DURATION,
    CURRENT_TLS_HANDSHAKES,
    CURRENT_UPGRADED_REQUESTS,
];

/// Handles to the seven server instruments.
#[derive(Clone)]
pub struct ServerInstruments {
    meter: Meter,
    pub connection_duration: Histogram,
    pub current_connections: UpDownCounter,
    pub queued_connections: UpDownCounter,
    pub queued_requests: UpDownCounter,
    pub tls_handshake_duration: Histogram,
    pub current_tls_handshakes: UpDownCounter,
    pub current_upgraded_requests: UpDownCounter,
}

impl ServerInstruments {
    /// Look up (or create) the configured meter and build every instrument.
    pub fn new(registry: &MeterRegistry, config: &MetricsConfig) -> Result<Self, MetricsError> {
        let mut options = MeterOptions::new(config.meter_name.clone());
        options.version = config.meter_version.clone();
        for (key, value) in &config.default_tags {
            options = options.tag(key.clone(), value.clone());
        }
        let meter = registry.get_or_create(options);
        Self::from_meter(meter, config)
    }

    /// Build every instrument on an existing meter.
    pub fn from_meter(meter: Meter, config: &MetricsConfig) -> Result<Self, MetricsError> {
        let mut duration_keys: Vec<String> = CONNECTION_DURATION
            .tag_keys
            .iter()
            .map(|k| k.to_string())
            .collect();
        duration_keys.extend(config.custom_tag_keys.iter().cloned());

        let connection_duration = meter.create_histogram(
            CONNECTION_DURATION
                .options()
                .tag_keys(&duration_keys)
                .buckets(config.connection_duration_buckets())
                .max_label_values(config.max_custom_tag_values),
        )?;
        let tls_handshake_duration = meter.create_histogram(
            TLS_HANDSHAKE_DURATION
                .options()
                .buckets(config.tls_handshake_duration_buckets()),
        )?;

        Ok(Self {
            connection_duration,
            current_connections: meter.create_up_down_counter(CURRENT_CONNECTIONS.options())?,
            queued_connections: meter.create_up_down_counter(QUEUED_CONNECTIONS.options())?,
            queued_requests: meter.create_up_down_counter(QUEUED_REQUESTS.options())?,
            tls_handshake_duration,
            current_tls_handshakes: meter
                .create_up_down_counter(CURRENT_TLS_HANDSHAKES.options())?,
            current_upgraded_requests: meter
                .create_up_down_counter(CURRENT_UPGRADED_REQUESTS.options())?,
            meter,
        })
    }

    pub fn meter(&self) -> &Meter {
        &self.meter
    }
}
