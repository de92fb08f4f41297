//! Test server management.
//!
//! Runs a gateway in-process on ephemeral ports with its own meter
//! registry, so each test observes only its own measurements.

use connmeter::config::Config;
use connmeter::meter::{InstrumentRecorder, MeasurementValue, MeterRegistry};
use connmeter::metrics::{METER_NAME, ServerMetrics};
use connmeter::network::Gateway;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Endpoint tag reported by every test listener.
pub const ENDPOINT: &str = "127.0.0.1:0";

/// A running in-process gateway.
pub struct TestServer {
    registry: MeterRegistry,
    metrics: ServerMetrics,
    addr: SocketAddr,
    tls_addr: Option<SocketAddr>,
    task: JoinHandle<()>,
}

impl TestServer {
    /// Spawn a plaintext gateway with default settings.
    pub async fn spawn() -> anyhow::Result<Self> {
        Self::spawn_with("").await
    }

    /// Spawn a gateway; `extra` is appended to the base configuration.
    pub async fn spawn_with(extra: &str) -> anyhow::Result<Self> {
        let config = Config::parse(&format!(
            "[listen]\naddress = \"{ENDPOINT}\"\n{extra}"
        ))?;
        Self::spawn_config(config).await
    }

    /// Spawn a gateway with an additional TLS listener using the test
    /// certificate in `tests/data`.
    pub async fn spawn_tls() -> anyhow::Result<Self> {
        let data = data_dir();
        let extra = format!(
            "[tls]\naddress = \"{ENDPOINT}\"\ncert_path = \"{}\"\nkey_path = \"{}\"\n",
            data.join("cert.pem").display(),
            data.join("key.pem").display()
        );
        Self::spawn_with(&extra).await
    }

    pub async fn spawn_config(config: Config) -> anyhow::Result<Self> {
        let registry = MeterRegistry::new();
        let metrics = ServerMetrics::new(&registry, &config.metrics)?;
        let gateway = Gateway::bind(&config, Arc::new(metrics.clone())).await?;
        let addr = gateway.local_addr()?;
        let tls_addr = gateway.tls_local_addr().transpose()?;
        let task = tokio::spawn(async move {
            let _ = gateway.run().await;
        });

        Ok(Self {
            registry,
            metrics,
            addr,
            tls_addr,
            task,
        })
    }

    /// Get the plaintext server address.
    pub fn address(&self) -> SocketAddr {
        self.addr
    }

    /// Get the TLS server address, if a TLS listener was configured.
    pub fn tls_address(&self) -> Option<SocketAddr> {
        self.tls_addr
    }

    pub fn registry(&self) -> &MeterRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &ServerMetrics {
        &self.metrics
    }

    /// Subscribe to one of the server instruments.
    pub fn recorder<T: MeasurementValue>(&self, instrument: &str) -> InstrumentRecorder<T> {
        self.registry.subscribe(METER_NAME, instrument)
    }

    /// Create a new test client connected to this server.
    pub async fn connect(&self) -> anyhow::Result<super::client::TestClient> {
        super::client::TestClient::connect(self.addr).await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub fn data_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/data")
}

/// Poll `condition` until it holds or five seconds pass.
pub async fn wait_for<F>(mut condition: F) -> anyhow::Result<()>
where
    F: FnMut() -> bool,
{
    for _ in 0..100 {
        if condition() {
            return Ok(());
        }
        sleep(Duration::from_millis(50)).await;
    }
    anyhow::bail!("Condition not met within 5 seconds")
}
