//! TCP transport

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace, warn};
use zklink_core::constants::{CLOSE_GRACE, DEFAULT_CONNECT_TIMEOUT, DEFAULT_TIMEOUT};
use zklink_core::Framing;

use crate::{error::*, hex_preview, registry, Transport};

/// Initial capacity of the per-read buffer
const READ_BUFFER_SIZE: usize = 16 * 1024;

/// TCP transport for ZKTeco devices
///
/// Frames on the wire carry the 8-byte `50 50 82 7D` + length wrapper.
pub struct TcpTransport {
    addr: String,
    port: u16,
    socket_addr: Option<SocketAddr>,
    stream: Option<TcpStream>,
    connect_timeout: Duration,
    write_timeout: Duration,
    close_grace: Duration,
}

impl TcpTransport {
    /// Create new TCP transport
    pub fn new(addr: impl Into<String>, port: u16) -> Self {
        Self {
            addr: addr.into(),
            port,
            socket_addr: None,
            stream: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            write_timeout: DEFAULT_TIMEOUT,
            close_grace: CLOSE_GRACE,
        }
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set how long one frame may take to hand to the socket
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set how long a graceful shutdown may take before the socket is dropped
    pub fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    /// Registry key
    fn key(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }

    /// Resolve address to SocketAddr
    async fn resolve_addr(&mut self) -> Result<SocketAddr> {
        if let Some(addr) = self.socket_addr {
            return Ok(addr);
        }

        let addr_str = self.key();

        let addr = tokio::net::lookup_host(&addr_str)
            .await
            .map_err(|e| Error::InvalidAddress(format!("{}: {}", addr_str, e)))?
            .next()
            .ok_or_else(|| Error::InvalidAddress(format!("No addresses found for {}", addr_str)))?;

        self.socket_addr = Some(addr);
        Ok(addr)
    }

    /// Forget the socket after the peer went away
    fn mark_closed(&mut self) {
        if self.stream.take().is_some() {
            registry::unregister(&self.key());
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Err(Error::AlreadyConnected);
        }

        let addr = self.resolve_addr().await?;

        debug!("Connecting to {}...", addr);

        let stream = timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::ConnectTimeout)?
            .map_err(Error::from_connect)?;

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        debug!("Connected to {}", addr);

        self.stream = Some(stream);
        registry::register(&self.key());
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            debug!("Disconnecting from {}...", self.remote_addr());

            // Graceful shutdown, bounded
            match timeout(self.close_grace, stream.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("Shutdown failed: {}", e),
                Err(_) => warn!(
                    "Shutdown did not finish within {:?}, dropping socket",
                    self.close_grace
                ),
            }

            registry::unregister(&self.key());
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

        trace!("Sending {} bytes: {}", data.len(), hex_preview(data));

        let written = timeout(self.write_timeout, async {
            stream.write_all(data).await?;
            stream.flush().await
        })
        .await;

        match written {
            Ok(result) => Ok(result?),
            Err(_) => {
                warn!(
                    "{} stopped reading, dropping socket after {:?}",
                    self.remote_addr(),
                    self.write_timeout
                );
                self.mark_closed();
                Err(Error::WriteTimeout)
            }
        }
    }

    async fn receive(&mut self, read_timeout: Duration) -> Result<BytesMut> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

        let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);

        let result = timeout(read_timeout, stream.read_buf(&mut buf))
            .await
            .map_err(|_| Error::ReadTimeout)?;

        let n = match result {
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                debug!("Connection reset by {}", self.remote_addr());
                self.mark_closed();
                return Err(Error::ConnectionClosed);
            }
            Err(e) => return Err(Error::Io(e)),
        };

        if n == 0 {
            debug!("Connection closed by {}", self.remote_addr());
            self.mark_closed();
            return Err(Error::ConnectionClosed);
        }

        trace!("Received {} bytes: {}", n, hex_preview(&buf));

        Ok(buf)
    }

    fn remote_addr(&self) -> String {
        self.socket_addr
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| self.key())
    }

    fn framing(&self) -> Framing {
        Framing::Stream
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if self.is_connected() {
            warn!("TCP transport dropped while still connected");
            registry::unregister(&self.key());
        }
    }
}
