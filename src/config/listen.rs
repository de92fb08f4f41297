//! Network listener configuration.

use serde::Deserialize;
use std::net::SocketAddr;

/// Plaintext listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    /// Address to bind to (e.g., "0.0.0.0:7000").
    ///
    /// The configured string, not the bound address, is what connections
    /// report as their `endpoint` tag.
    pub address: SocketAddr,
}

/// TLS listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    /// Address to bind to for TLS (e.g., "0.0.0.0:7001").
    pub address: SocketAddr,
    /// Path to certificate file (PEM format).
    pub cert_path: String,
    /// Path to private key file (PEM format, PKCS#8).
    pub key_path: String,
}
