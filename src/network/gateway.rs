//! Gateway - TCP/TLS listener that accepts incoming connections.
//!
//! The Gateway binds to sockets and spawns a task per accepted socket.
//! Each task waits in the admission queue for a connection slot, then
//! opens the connection span, performs the TLS handshake when the
//! listener is secure, and hands the stream to a [`Connection`].
//!
//! Every connection reports the configured listen address (not the bound
//! one) as its `endpoint` tag.

use crate::config::{Config, TlsConfig};
use crate::metrics::{ConnectionMetricsContext, LifecycleRecorder};
use crate::network::connection::{Connection, ServerContext};
use crate::telemetry::{ConnectionScope, QueuedConnection, TlsHandshakeScope, spans};
use rustls_pemfile::{certs, pkcs8_private_keys};
use std::io::{BufReader, Cursor};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tracing::{Instrument, debug, error, info, instrument, warn};

/// A bound listener and the endpoint name its connections report.
struct Listener {
    socket: TcpListener,
    endpoint: Arc<str>,
}

impl Listener {
    async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let socket = TcpListener::bind(addr).await?;
        Ok(Self {
            socket,
            endpoint: Arc::from(addr.to_string()),
        })
    }
}

/// The Gateway accepts incoming TCP/TLS connections and spawns handlers.
pub struct Gateway {
    plaintext_listener: Listener,
    tls_listener: Option<(Listener, TlsAcceptor)>,
    server: Arc<ServerContext>,
}

impl Gateway {
    /// Bind the listeners named in `config`.
    pub async fn bind(config: &Config, recorder: Arc<dyn LifecycleRecorder>) -> anyhow::Result<Self> {
        let plaintext_listener = Listener::bind(config.listen.address).await?;
        info!(endpoint = %plaintext_listener.endpoint, "Plaintext listener bound");

        let tls_listener = if let Some(tls_cfg) = &config.tls {
            let tls_acceptor = Self::load_tls(tls_cfg)?;
            let listener = Listener::bind(tls_cfg.address).await?;
            info!(endpoint = %listener.endpoint, "TLS listener bound");
            Some((listener, tls_acceptor))
        } else {
            None
        };

        let server = Arc::new(ServerContext::new(
            recorder,
            config.server.max_connections,
            config.server.max_concurrent_requests,
            Duration::from_secs(config.server.idle_timeout_secs),
            config.server.protocol_label.clone(),
        ));

        Ok(Self {
            plaintext_listener,
            tls_listener,
            server,
        })
    }

    /// Load TLS certificates and create TlsAcceptor.
    fn load_tls(config: &TlsConfig) -> anyhow::Result<TlsAcceptor> {
        let cert_file = std::fs::read(&config.cert_path)?;
        let cert_reader = &mut BufReader::new(Cursor::new(cert_file));
        let certs: Vec<CertificateDer> = certs(cert_reader).collect::<Result<Vec<_>, _>>()?;

        if certs.is_empty() {
            anyhow::bail!("No certificates found in {}", config.cert_path);
        }

        let key_file = std::fs::read(&config.key_path)?;
        let key_reader = &mut BufReader::new(Cursor::new(key_file));
        let key = pkcs8_private_keys(key_reader)
            .next()
            .transpose()?
            .map(PrivateKeyDer::from)
            .ok_or_else(|| anyhow::anyhow!("No private keys found in {}", config.key_path))?;

        let tls_config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)?;

        Ok(TlsAcceptor::from(Arc::new(tls_config)))
    }

    /// Address the plaintext listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.plaintext_listener.socket.local_addr()
    }

    /// Address the TLS listener is bound to, if one is configured.
    pub fn tls_local_addr(&self) -> Option<std::io::Result<SocketAddr>> {
        self.tls_listener
            .as_ref()
            .map(|(listener, _)| listener.socket.local_addr())
    }

    /// Run the gateway, accepting connections forever.
    #[instrument(skip(self), name = "gateway")]
    pub async fn run(self) -> anyhow::Result<()> {
        if let Some((tls_listener, tls_acceptor)) = self.tls_listener {
            let server = Arc::clone(&self.server);
            let span = spans::listener(&tls_listener.endpoint, true);
            tokio::spawn(accept_loop(tls_listener, server, Some(tls_acceptor)).instrument(span));
        }

        let span = spans::listener(&self.plaintext_listener.endpoint, false);
        accept_loop(self.plaintext_listener, self.server, None)
            .instrument(span)
            .await;
        Ok(())
    }
}

async fn accept_loop(listener: Listener, server: Arc<ServerContext>, tls: Option<TlsAcceptor>) {
    loop {
        match listener.socket.accept().await {
            Ok((stream, addr)) => {
                debug!(%addr, "Connection accepted");
                let server = Arc::clone(&server);
                let endpoint = Arc::clone(&listener.endpoint);
                let acceptor = tls.clone();
                tokio::spawn(serve(stream, addr, endpoint, server, acceptor));
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }
}

/// Admit, handshake and run one accepted socket.
async fn serve(
    stream: TcpStream,
    addr: SocketAddr,
    endpoint: Arc<str>,
    server: Arc<ServerContext>,
    tls: Option<TlsAcceptor>,
) {
    let waiting = QueuedConnection::new(Arc::clone(&server.recorder), Arc::clone(&endpoint));
    let permit = Arc::clone(&server.admission).acquire_owned().await;
    drop(waiting);
    let Ok(_permit) = permit else {
        debug!(%addr, "Admission closed, dropping connection");
        return;
    };

    let id = server.next_id();
    let span = spans::connection(id, &addr.to_string(), &endpoint);
    async move {
        let conn = Arc::new(ConnectionMetricsContext::new(id, endpoint));
        let scope = ConnectionScope::start(Arc::clone(&server.recorder), Arc::clone(&conn));
        info!("Connection started");

        let result = match tls {
            Some(acceptor) => {
                let handshake = TlsHandshakeScope::start(scope.recorder().as_ref(), &conn);
                match acceptor.accept(stream).await {
                    Ok(tls_stream) => {
                        handshake.complete(true);
                        Connection::new(tls_stream, addr, Arc::clone(&server), Arc::clone(&conn))
                            .run()
                            .await
                    }
                    Err(e) => {
                        handshake.complete(false);
                        warn!(error = %e, "TLS handshake failed");
                        Ok(())
                    }
                }
            }
            None => {
                Connection::new(stream, addr, Arc::clone(&server), Arc::clone(&conn))
                    .run()
                    .await
            }
        };

        if let Err(e) = result {
            error!(error = %e, "Connection error");
        }
        drop(scope);
        info!("Connection closed");
    }
    .instrument(span)
    .await;
}
