//! Protocol constants

use std::time::Duration;

use bitflags::bitflags;

/// Modulus used by the checksum and the sequence counter
pub const USHRT_MAX: u32 = 65535;

/// Magic prefix of every stream (TCP) frame
pub const STREAM_MAGIC: [u8; 4] = [0x50, 0x50, 0x82, 0x7D];

/// Size of the stream wrapper: magic (4) + inner length (4)
pub const STREAM_WRAPPER_SIZE: usize = 8;

/// Offset of the inner-length field inside a stream frame
pub const STREAM_LENGTH_OFFSET: usize = 4;

/// Upper bound for a declared stream frame length
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// Largest UDP datagram we expect from a device
pub const MAX_DATAGRAM_SIZE: usize = 65535;

/// Chunk size requested per DATA_RDY over TCP
pub const STREAM_CHUNK_SIZE: usize = 0xFFC0;

/// Chunk size requested per DATA_RDY over UDP
pub const DATAGRAM_CHUNK_SIZE: usize = 16 * 1024;

/// Bytes of the per-chunk PREPARE_DATA announcement that precede chunk data
pub const CHUNK_PREAMBLE_SIZE: usize = 8;

/// Default TCP connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default reply timeout for ordinary commands
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Reply timeout for CONNECT and EXIT
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(2000);

/// Grace period granted to a socket close before it is dropped
pub const CLOSE_GRACE: Duration = Duration::from_millis(2000);

/// Silence tolerated during a chunked transfer
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum reconnect attempts for network operations
pub const MAX_RETRIES: usize = 3;

bitflags! {
    /// Real-time event flags, sent with CMD_REG_EVENT and echoed in the
    /// session field of every event frame
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventFlags: u32 {
        const ATTLOG = 1;
        const FINGER = 1 << 1;
        const ENROLL_USER = 1 << 2;
        const ENROLL_FINGER = 1 << 3;
        const BUTTON = 1 << 4;
        const UNLOCK = 1 << 5;
        const VERIFY = 1 << 7;
        const FP_FEATURE = 1 << 8;
        const ALARM = 1 << 9;
    }
}

/// Data type flags (the `fct` field of a DATA_WRRQ request)
pub mod data_types {
    /// Attendance log
    pub const FCT_ATTLOG: u32 = 1;

    /// Fingerprint template
    pub const FCT_FINGERTMP: u32 = 2;

    /// Operation log
    pub const FCT_OPLOG: u32 = 4;

    /// User record
    pub const FCT_USER: u32 = 5;
}

/// Option keywords understood by CMD_OPTIONS_RRQ
pub mod keywords {
    pub const SERIAL_NUMBER: &str = "~SerialNumber";
    pub const DEVICE_NAME: &str = "~DeviceName";
    pub const PLATFORM: &str = "~Platform";
    pub const OS: &str = "~OS";
    pub const WORK_CODE: &str = "WorkCode";
    pub const PIN_WIDTH: &str = "~PIN2Width";
    pub const FACE_FUNCTION: &str = "FaceFunOn";
    pub const SSR: &str = "~SSR";
    pub const FINGERPRINT_VERSION: &str = "~ZKFPVersion";
}
