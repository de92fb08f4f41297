//! connmeterd - line-protocol gateway reporting connection lifecycle metrics.

use connmeter::config::Config;
use connmeter::meter::MeterRegistry;
use connmeter::metrics::{LifecycleRecorder, NoopRecorder, ServerMetrics};
use connmeter::network::Gateway;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "connmeter.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    info!(
        server = %config.server.name,
        listen = %config.listen.address,
        metrics = config.metrics.enabled,
        "Starting connmeterd"
    );

    let registry = MeterRegistry::new();
    let recorder: Arc<dyn LifecycleRecorder> = if config.metrics.enabled {
        let metrics = ServerMetrics::new(&registry, &config.metrics).map_err(|e| {
            error!(error = %e, code = e.error_code(), "Failed to create instruments");
            e
        })?;
        Arc::new(metrics)
    } else {
        info!("Metrics disabled");
        Arc::new(NoopRecorder)
    };

    let gateway = Gateway::bind(&config, recorder).await?;

    tokio::select! {
        result = gateway.run() => result?,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutdown requested");
        }
    }

    if config.metrics.enabled {
        info!(snapshot = %registry.encode_text(), "Final metrics snapshot");
    }
    registry.dispose_all();

    Ok(())
}
