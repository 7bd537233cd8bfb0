//! High-level error types

use std::time::Duration;

use bytes::Bytes;
use zklink_core::command::describe;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Core protocol error: {0}")]
    Core(#[from] zklink_core::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] zklink_transport::Error),

    #[error("Type error: {0}")]
    Types(#[from] zklink_types::Error),

    #[error("Timed out connecting to {addr}")]
    ConnectTimeout { addr: String },

    #[error("Connection refused by {addr}")]
    ConnectRefused { addr: String },

    #[error("Device sent an empty reply to CONNECT")]
    NoReplyOnConnect,

    #[error("No reply to {} within {:?}", describe(*.command), .timeout)]
    WriteTimeout { command: u16, timeout: Duration },

    #[error("Unhandled reply command {}", describe(*.0))]
    UnhandledCommand(u16),

    #[error("Transfer stalled with {remaining_chunks} chunk(s) outstanding ({} bytes received)", .partial.len())]
    TransferStalled { partial: Bytes, remaining_chunks: u32 },

    #[error("Connection closed during transfer ({} bytes received)", .partial.len())]
    ConnectionClosedDuringTransfer { partial: Bytes },

    #[error("Transfer failed: {reason} ({} bytes received)", .partial.len())]
    TransferFailed { partial: Bytes, reason: String },

    #[error("Socket not connected")]
    SocketNotConnected,

    #[error("Chunk overrun: expected {expected} bytes, accumulated {actual}")]
    ChunkOverrun { expected: usize, actual: usize },

    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Invalid response from device: {0}")]
    InvalidResponse(String),
}

impl Error {
    /// The socket is unusable; disconnect and connect again before retrying
    pub fn requires_reconnect(&self) -> bool {
        match self {
            Self::SocketNotConnected
            | Self::ConnectionClosedDuringTransfer { .. }
            | Self::TransferFailed { .. }
            | Self::ChunkOverrun { .. } => true,
            Self::Transport(e) => e.is_disconnect(),
            Self::Core(e) => e.is_desync(),
            _ => false,
        }
    }

    /// Worth retrying (after a reconnect if [`Error::requires_reconnect`])
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::ConnectTimeout { .. }
            | Self::ConnectRefused { .. }
            | Self::NoReplyOnConnect
            | Self::WriteTimeout { .. }
            | Self::TransferStalled { .. } => true,
            Self::Transport(zklink_transport::Error::ReadTimeout)
            | Self::Transport(zklink_transport::Error::ConnectTimeout) => true,
            other => other.requires_reconnect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_commands() {
        let err = Error::WriteTimeout {
            command: 201,
            timeout: Duration::from_millis(500),
        };
        assert_eq!(err.to_string(), "No reply to CMD_GET_TIME(201) within 500ms");

        assert_eq!(
            Error::UnhandledCommand(4242).to_string(),
            "Unhandled reply command CMD_UNKNOWN(4242)"
        );
    }

    #[test]
    fn test_classification() {
        assert!(Error::SocketNotConnected.requires_reconnect());
        assert!(Error::SocketNotConnected.is_recoverable());
        assert!(Error::Transport(zklink_transport::Error::ConnectionClosed).requires_reconnect());

        let stalled = Error::TransferStalled {
            partial: Bytes::new(),
            remaining_chunks: 1,
        };
        assert!(stalled.is_recoverable());
        assert!(!stalled.requires_reconnect());

        assert!(!Error::UnhandledCommand(2001).is_recoverable());
        assert!(!Error::UnknownDevice("x".into()).is_recoverable());
    }
}
