//! Error types for zklink-core



/// Result type alias for zklink-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core protocol errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Packet is too short to be valid
    #[error("Packet too short: expected at least {expected} bytes, got {actual} bytes")]
    PacketTooShort {
        expected: usize,
        actual: usize,
    },

    /// Checksum verification failed
    #[error("Checksum mismatch: expected 0x{expected:04X}, received 0x{received:04X}")]
    ChecksumMismatch {
        expected: u16,
        received: u16,
    },

    /// Unknown command code
    #[error("Unknown command code: {0}")]
    UnknownCommand(u16),

    /// Stream frame does not start with the 50 50 82 7D prefix
    #[error("Invalid stream frame prefix: {0}")]
    InvalidMagic(String),

    /// Declared stream frame length exceeds the accepted maximum
    #[error("Frame too large: {size} bytes (max: {max} bytes)")]
    FrameTooLarge {
        size: usize,
        max: usize,
    },

    /// Invalid session state
    #[error("Invalid session state: {0}")]
    InvalidSessionState(String),

    /// Session not initialized
    #[error("Session not initialized - open the connection first")]
    SessionNotInitialized,
}

impl Error {
    /// Check if the byte stream can no longer be trusted
    pub fn is_desync(&self) -> bool {
        matches!(self, Self::InvalidMagic(_) | Self::FrameTooLarge { .. })
    }
}
