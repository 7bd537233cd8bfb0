//! Transport layer for ZKTeco protocol
//!
//! Provides TCP/UDP communication with devices.

pub mod error;
pub mod registry;
pub mod tcp;
pub mod udp;

pub use error::{Error, Result};
pub use tcp::TcpTransport;
pub use udp::UdpTransport;

use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use zklink_core::Framing;

/// Transport trait for different communication methods
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to device
    async fn connect(&mut self) -> Result<()>;

    /// Disconnect from device
    async fn disconnect(&mut self) -> Result<()>;

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Send raw bytes
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive whatever the next read yields (one datagram on UDP)
    ///
    /// A peer close is reported as [`Error::ConnectionClosed`] and leaves the
    /// transport disconnected.
    async fn receive(&mut self, timeout: Duration) -> Result<BytesMut>;

    /// Get remote address
    fn remote_addr(&self) -> String;

    /// How frames are delimited on this transport
    fn framing(&self) -> Framing;
}

/// Shorten a buffer for trace output
pub(crate) fn hex_preview(data: &[u8]) -> String {
    hex::encode(&data[..data.len().min(32)])
}
