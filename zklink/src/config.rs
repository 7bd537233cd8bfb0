//! Connection configuration

use std::fmt;
use std::time::Duration;

use zklink_core::constants::{
    CLOSE_GRACE, DATAGRAM_CHUNK_SIZE, DEFAULT_CONNECT_TIMEOUT, DEFAULT_STALL_TIMEOUT,
    DEFAULT_TIMEOUT, HANDSHAKE_TIMEOUT, STREAM_CHUNK_SIZE,
};
use zklink_core::{Framing, DEFAULT_PORT};
use zklink_transport::{TcpTransport, Transport, UdpTransport};

/// Which socket type reaches the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Tcp,
    Udp,
}

impl TransportKind {
    pub fn framing(self) -> Framing {
        match self {
            Self::Tcp => Framing::Stream,
            Self::Udp => Framing::Datagram,
        }
    }
}

/// What to do with a reply whose checksum does not match
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChecksumPolicy {
    Ignore,
    /// Log and accept
    #[default]
    Warn,
    /// Fail with `ChecksumMismatch`
    Reject,
}

/// Where a device lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    /// Local port to bind for UDP (ephemeral when unset)
    pub local_port: Option<u16>,
    /// Reply timeout for ordinary commands
    pub timeout: Duration,
    pub kind: TransportKind,
}

impl Endpoint {
    /// TCP endpoint
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            local_port: None,
            timeout: DEFAULT_TIMEOUT,
            kind: TransportKind::Tcp,
        }
    }

    /// UDP endpoint
    pub fn udp(host: impl Into<String>, port: u16) -> Self {
        Self {
            kind: TransportKind::Udp,
            ..Self::new(host, port)
        }
    }

    pub fn with_local_port(mut self, port: u16) -> Self {
        self.local_port = Some(port);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_kind(mut self, kind: TransportKind) -> Self {
        self.kind = kind;
        self
    }

    /// `host:port`
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub(crate) fn build_transport(&self, options: &SessionOptions) -> Box<dyn Transport> {
        match self.kind {
            TransportKind::Tcp => Box::new(
                TcpTransport::new(self.host.clone(), self.port)
                    .with_connect_timeout(options.connect_timeout)
                    .with_write_timeout(self.timeout)
                    .with_close_grace(options.close_grace),
            ),
            TransportKind::Udp => {
                let transport = UdpTransport::new(self.host.clone(), self.port);
                match self.local_port {
                    Some(port) => Box::new(transport.with_local_port(port)),
                    None => Box::new(transport),
                }
            }
        }
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new("192.168.1.201", DEFAULT_PORT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}://{}", self.kind, self.addr())
    }
}

/// Session tuning knobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub connect_timeout: Duration,
    /// Reply timeout for CONNECT and EXIT
    pub handshake_timeout: Duration,
    pub close_grace: Duration,
    /// Silence tolerated while chunks are outstanding
    pub stall_timeout: Duration,
    /// Bytes per DATA_RDY request; framing default when unset
    pub chunk_size: Option<u32>,
    pub checksum_policy: ChecksumPolicy,
}

impl SessionOptions {
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            close_grace: CLOSE_GRACE,
            stall_timeout: DEFAULT_STALL_TIMEOUT,
            chunk_size: None,
            checksum_policy: ChecksumPolicy::default(),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    pub fn with_chunk_size(mut self, size: u32) -> Self {
        self.chunk_size = Some(size);
        self
    }

    pub fn with_checksum_policy(mut self, policy: ChecksumPolicy) -> Self {
        self.checksum_policy = policy;
        self
    }

    /// Effective chunk size for a framing
    pub fn chunk_size_for(&self, framing: Framing) -> u32 {
        self.chunk_size.unwrap_or(match framing {
            Framing::Stream => STREAM_CHUNK_SIZE as u32,
            Framing::Datagram => DATAGRAM_CHUNK_SIZE as u32,
        })
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::new()
    }
}
