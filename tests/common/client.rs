//! Test line client.
//!
//! Speaks the gateway's line protocol over plaintext or TLS and asserts
//! on replies.

use std::fs::File;
use std::io::BufReader as StdBufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf,
    WriteHalf,
};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};

/// A test client.
pub struct TestClient<S = TcpStream> {
    reader: BufReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
}

impl TestClient<TcpStream> {
    /// Connect to a plaintext listener.
    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::from_stream(stream))
    }
}

impl TestClient<TlsStream<TcpStream>> {
    /// Connect to a TLS listener, trusting the CA at `ca_path`.
    pub async fn connect_tls(addr: SocketAddr, ca_path: &Path) -> anyhow::Result<Self> {
        let mut roots = RootCertStore::empty();
        let mut pem = StdBufReader::new(File::open(ca_path)?);
        for cert in rustls_pemfile::certs(&mut pem) {
            roots.add(cert?)?;
        }
        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(config));
        let tcp = TcpStream::connect(addr).await?;
        let stream = connector
            .connect(ServerName::try_from("localhost")?, tcp)
            .await?;
        Ok(Self::from_stream(stream))
    }
}

impl<S: AsyncRead + AsyncWrite> TestClient<S> {
    fn from_stream(stream: S) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        }
    }

    /// Send one line.
    pub async fn send_line(&mut self, line: &str) -> anyhow::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Receive one line, without its terminator.
    pub async fn recv_line(&mut self) -> anyhow::Result<String> {
        let mut line = String::new();
        let n = timeout(Duration::from_secs(5), self.reader.read_line(&mut line)).await??;
        if n == 0 {
            anyhow::bail!("Connection closed");
        }
        Ok(line.trim_end().to_string())
    }

    /// Send a line and return the reply.
    pub async fn request(&mut self, line: &str) -> anyhow::Result<String> {
        self.send_line(line).await?;
        self.recv_line().await
    }

    /// Write raw bytes and read back exactly as many.
    pub async fn echo_raw(&mut self, bytes: &[u8]) -> anyhow::Result<Vec<u8>> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        let mut buf = vec![0u8; bytes.len()];
        timeout(Duration::from_secs(5), self.reader.read_exact(&mut buf)).await??;
        Ok(buf)
    }

    /// Send QUIT and expect BYE.
    pub async fn quit(mut self) -> anyhow::Result<()> {
        let reply = self.request("QUIT").await?;
        anyhow::ensure!(reply == "BYE", "Expected BYE, got {reply:?}");
        Ok(())
    }

    /// Close the write side so the server sees end of stream.
    pub async fn close(mut self) -> anyhow::Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
