//! UDP transport for ZKTeco devices
//!
//! Most ZKTeco devices use UDP protocol on port 4370.
//! Every datagram holds exactly one frame, without the TCP wrapper.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, trace, warn};
use zklink_core::constants::MAX_DATAGRAM_SIZE;
use zklink_core::Framing;

use crate::{error::*, hex_preview, registry, Transport};

/// UDP transport for ZKTeco devices
///
/// There is no handshake at this layer: `connect` binds the local port and
/// fixes the remote peer.
pub struct UdpTransport {
    addr: String,
    port: u16,
    local_port: Option<u16>,
    socket: Option<UdpSocket>,
    remote_addr: Option<SocketAddr>,
}

impl UdpTransport {
    /// Create new UDP transport
    pub fn new(addr: impl Into<String>, port: u16) -> Self {
        Self {
            addr: addr.into(),
            port,
            local_port: None,
            socket: None,
            remote_addr: None,
        }
    }

    /// Bind a fixed local port instead of an ephemeral one
    pub fn with_local_port(mut self, port: u16) -> Self {
        self.local_port = Some(port);
        self
    }

    /// Local address of the bound socket
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|socket| socket.local_addr().ok())
    }

    fn key(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }

    /// Resolve address to SocketAddr
    async fn resolve_addr(&mut self) -> Result<SocketAddr> {
        if let Some(addr) = self.remote_addr {
            return Ok(addr);
        }

        let addr_str = self.key();

        let addr = tokio::net::lookup_host(&addr_str)
            .await
            .map_err(|e| Error::InvalidAddress(format!("{}: {}", addr_str, e)))?
            .next()
            .ok_or_else(|| Error::InvalidAddress(format!("No addresses found for {}", addr_str)))?;

        self.remote_addr = Some(addr);
        Ok(addr)
    }

    fn mark_closed(&mut self) {
        if self.socket.take().is_some() {
            registry::unregister(&self.key());
        }
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Err(Error::AlreadyConnected);
        }

        let remote = self.resolve_addr().await?;
        let local_port = self.local_port.unwrap_or(0);

        let local: SocketAddr = if remote.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, local_port).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, local_port).into()
        };

        debug!("Binding {} for {} via UDP...", local, remote);

        let socket = UdpSocket::bind(local).await.map_err(Error::Connect)?;

        // Connect to remote address (sets default send/recv target)
        socket.connect(remote).await.map_err(Error::from_connect)?;

        debug!("Connected to {} via UDP", remote);

        self.socket = Some(socket);
        registry::register(&self.key());
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if self.socket.take().is_some() {
            debug!("Disconnecting from {}...", self.remote_addr());
            registry::unregister(&self.key());
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let socket = self.socket.as_ref().ok_or(Error::NotConnected)?;

        trace!("Sending {} bytes via UDP: {}", data.len(), hex_preview(data));

        socket.send(data).await.map_err(Error::Io)?;

        Ok(())
    }

    async fn receive(&mut self, read_timeout: Duration) -> Result<BytesMut> {
        let socket = self.socket.as_ref().ok_or(Error::NotConnected)?;

        let mut buf = BytesMut::zeroed(MAX_DATAGRAM_SIZE);

        // Empty datagrams carry nothing; keep waiting within the same deadline
        let received = timeout(read_timeout, async {
            loop {
                let n = socket.recv(&mut buf).await?;
                if n > 0 {
                    return Ok::<usize, std::io::Error>(n);
                }
            }
        })
        .await
        .map_err(|_| {
            trace!("Read timeout after {:?}", read_timeout);
            Error::ReadTimeout
        })?;

        let n = match received {
            Ok(n) => n,
            // ICMP port unreachable surfaces on the next recv
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                warn!("Peer {} unreachable", self.remote_addr());
                self.mark_closed();
                return Err(Error::ConnectionClosed);
            }
            Err(e) => {
                warn!("Read error: {}", e);
                return Err(Error::Io(e));
            }
        };

        // Truncate to actual received size
        buf.truncate(n);

        trace!("Received {} bytes via UDP: {}", n, hex_preview(&buf));

        Ok(buf)
    }

    fn remote_addr(&self) -> String {
        self.remote_addr
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| self.key())
    }

    fn framing(&self) -> Framing {
        Framing::Datagram
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        if self.is_connected() {
            registry::unregister(&self.key());
        }
    }
}
