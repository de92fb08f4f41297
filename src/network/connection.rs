//! Connection - Handles an individual client connection.
//!
//! Each admitted connection runs in its own Tokio task:
//!
//! ```text
//! Phase 1: Line loop (Framed<LinesCodec>)
//!    each line: dispatch queue -> handler -> reply
//!    ↓ UPGRADE
//! Phase 2: Raw echo (split halves, tokio::io::copy)
//! ```
//!
//! Lifecycle metrics are driven by guards owned by the caller and by
//! this loop; the connection never records into instruments directly.

use crate::metrics::{ConnectionMetricsContext, LifecycleRecorder};
use crate::telemetry::QueuedRequest;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Semaphore;
use tokio_util::codec::{Framed, FramedParts, LinesCodec};
use tracing::{debug, info, instrument, warn};

/// Maximum accepted line length in bytes.
const MAX_LINE_LENGTH: usize = 8192;

/// State shared by every connection of a gateway.
pub struct ServerContext {
    pub(crate) recorder: Arc<dyn LifecycleRecorder>,
    pub(crate) admission: Arc<Semaphore>,
    dispatch: Semaphore,
    idle_timeout: Duration,
    protocol_label: String,
    next_id: AtomicU64,
}

impl ServerContext {
    pub fn new(
        recorder: Arc<dyn LifecycleRecorder>,
        max_connections: usize,
        max_concurrent_requests: usize,
        idle_timeout: Duration,
        protocol_label: impl Into<String>,
    ) -> Self {
        Self {
            recorder,
            admission: Arc::new(Semaphore::new(max_connections)),
            dispatch: Semaphore::new(max_concurrent_requests),
            idle_timeout,
            protocol_label: protocol_label.into(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn recorder(&self) -> &Arc<dyn LifecycleRecorder> {
        &self.recorder
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// What the line loop should do after a reply.
enum Reply {
    Line(String),
    Upgrade,
    Close,
}

/// A client connection handler.
pub struct Connection<S> {
    stream: S,
    addr: SocketAddr,
    server: Arc<ServerContext>,
    conn: Arc<ConnectionMetricsContext>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(
        stream: S,
        addr: SocketAddr,
        server: Arc<ServerContext>,
        conn: Arc<ConnectionMetricsContext>,
    ) -> Self {
        Self {
            stream,
            addr,
            server,
            conn,
        }
    }

    /// Run the connection until the peer quits, disconnects or idles out.
    #[instrument(skip(self), fields(id = self.conn.id(), addr = %self.addr), name = "connection")]
    pub async fn run(self) -> anyhow::Result<()> {
        let Self {
            stream,
            server,
            conn,
            ..
        } = self;
        let recorder = &*server.recorder;
        let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

        loop {
            let line = match tokio::time::timeout(server.idle_timeout, framed.next()).await {
                Ok(Some(Ok(line))) => line,
                Ok(Some(Err(e))) => {
                    warn!(error = %e, "Read error");
                    return Ok(());
                }
                Ok(None) => {
                    debug!("Client disconnected");
                    return Ok(());
                }
                Err(_) => {
                    info!(timeout_secs = server.idle_timeout.as_secs(), "Idle timeout");
                    return Ok(());
                }
            };

            let queued = QueuedRequest::new(recorder, &conn, &server.protocol_label);
            let Ok(_permit) = server.dispatch.acquire().await else {
                return Ok(());
            };
            queued.dispatch();

            match handle_line(&line, &conn) {
                Reply::Line(reply) => framed.send(reply).await?,
                Reply::Close => {
                    framed.send("BYE").await?;
                    return Ok(());
                }
                Reply::Upgrade => {
                    framed.send("UPGRADED").await?;
                    recorder.upgrade_start(&conn);
                    let result = raw_echo(framed.into_parts()).await;
                    recorder.upgrade_stop(&conn);
                    return result;
                }
            }
        }
    }
}

fn handle_line(line: &str, conn: &ConnectionMetricsContext) -> Reply {
    let line = line.trim_end_matches('\r');
    let mut parts = line.splitn(3, ' ');
    let command = parts.next().unwrap_or_default();

    match command.to_ascii_uppercase().as_str() {
        "PING" => Reply::Line("PONG".to_owned()),
        "QUIT" => Reply::Close,
        "UPGRADE" => Reply::Upgrade,
        "TAG" => match (parts.next(), parts.next()) {
            (Some(key), Some(value)) if !key.is_empty() => {
                conn.add_tag(key.to_owned(), value.to_owned());
                Reply::Line("OK".to_owned())
            }
            _ => Reply::Line("ERR TAG <key> <value>".to_owned()),
        },
        _ => Reply::Line(line.to_owned()),
    }
}

/// Echo raw bytes until the peer closes, starting with whatever the codec
/// had already buffered.
async fn raw_echo<S>(parts: FramedParts<S, LinesCodec>) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (mut reader, mut writer) = tokio::io::split(parts.io);
    if !parts.read_buf.is_empty() {
        writer.write_all(&parts.read_buf).await?;
    }
    let echoed = tokio::io::copy(&mut reader, &mut writer).await?;
    debug!(bytes = echoed, "Upgraded stream closed");
    Ok(())
}
