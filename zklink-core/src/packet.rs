//! ZKTeco protocol packet structure and encoding/decoding

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

use crate::{
    checksum,
    command,
    constants::{STREAM_LENGTH_OFFSET, STREAM_MAGIC, STREAM_WRAPPER_SIZE},
    error::{Error, Result},
};

/// How frames are delimited on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Framing {
    /// TCP: every frame carries an 8-byte `[magic][length]` wrapper
    Stream,

    /// UDP: one bare frame per datagram
    Datagram,
}

impl Framing {
    /// Bytes the wrapper adds in front of the inner header
    pub fn wrapper_len(self) -> usize {
        match self {
            Self::Stream => STREAM_WRAPPER_SIZE,
            Self::Datagram => 0,
        }
    }

    /// Prefix an inner frame with the transport wrapper
    pub fn wrap(self, inner: &[u8]) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.wrapper_len() + inner.len());

        if self == Self::Stream {
            buf.put_slice(&STREAM_MAGIC);
            buf.put_u32_le(inner.len() as u32);
        }

        buf.put_slice(inner);
        buf
    }

    /// Remove the transport wrapper, returning the inner header + payload
    ///
    /// Buffers that are too short or lack the stream prefix are returned as-is.
    pub fn strip(self, buf: &[u8]) -> &[u8] {
        match self {
            Self::Stream if has_stream_prefix(buf) => &buf[STREAM_WRAPPER_SIZE..],
            _ => buf,
        }
    }
}

/// Whether a buffer starts with a complete stream wrapper
pub fn has_stream_prefix(buf: &[u8]) -> bool {
    buf.len() >= STREAM_WRAPPER_SIZE && buf[..STREAM_MAGIC.len()] == STREAM_MAGIC
}

/// Read the inner-length field of a stream wrapper
pub fn stream_length(buf: &[u8]) -> Result<usize> {
    if buf.len() < STREAM_WRAPPER_SIZE {
        return Err(Error::PacketTooShort {
            expected: STREAM_WRAPPER_SIZE,
            actual: buf.len(),
        });
    }

    if buf[..STREAM_MAGIC.len()] != STREAM_MAGIC {
        return Err(Error::InvalidMagic(hex::encode(&buf[..STREAM_MAGIC.len()])));
    }

    let field = &buf[STREAM_LENGTH_OFFSET..STREAM_LENGTH_OFFSET + 4];
    Ok(u32::from_le_bytes([field[0], field[1], field[2], field[3]]) as usize)
}

/// Decoded 8-byte inner header
///
/// ```text
/// ┌─────────────┬─────────────┬─────────────┬─────────────┐
/// │   Command   │  Checksum   │  SessionID  │  Sequence   │
/// │  (LE u16)   │  (LE u16)   │  (LE u16)   │  (LE u16)   │
/// └─────────────┴─────────────┴─────────────┴─────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Raw command id, kept numeric so unknown replies can be reported exactly
    pub command: u16,
    pub checksum: u16,
    pub session_id: u16,
    pub sequence: u16,
}

impl Header {
    /// Parse the first 8 bytes of an inner frame
    ///
    /// The caller strips any transport wrapper first.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < crate::HEADER_SIZE {
            return Err(Error::PacketTooShort {
                expected: crate::HEADER_SIZE,
                actual: buf.len(),
            });
        }

        let word = |at: usize| u16::from_le_bytes([buf[at], buf[at + 1]]);

        Ok(Self {
            command: word(0),
            checksum: word(2),
            session_id: word(4),
            sequence: word(6),
        })
    }

    /// Typed command, or `UnknownCommand` carrying the raw id
    pub fn command(&self) -> Result<command::Command> {
        command::Command::try_from(self.command)
    }
}

/// ZKTeco protocol packet
///
/// All multi-byte values are little-endian. On a stream transport the
/// encoded packet is preceded by `50 50 82 7D` and the inner length.
///
/// # Examples
///
/// ```
/// use zklink_core::{Command, Framing, Packet};
///
/// let packet = Packet::new(Command::Connect, 0, 0);
/// let encoded = packet.encode(Framing::Stream);
/// assert_eq!(encoded.len(), 16);
///
/// let decoded = Packet::decode(Framing::Stream.strip(&encoded)).unwrap();
/// assert_eq!(decoded.command, u16::from(Command::Connect));
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    /// Command id
    pub command: u16,

    /// Session identifier (assigned by device on connect)
    pub session_id: u16,

    /// Sequence number of the exchange
    pub sequence: u16,

    /// Command-specific data
    pub payload: Bytes,
}

impl Packet {
    /// Packet header size in bytes
    pub const HEADER_SIZE: usize = crate::HEADER_SIZE;

    /// Create a new packet with empty payload
    pub fn new(command: impl Into<u16>, session_id: u16, sequence: u16) -> Self {
        Self::with_payload(command, session_id, sequence, Bytes::new())
    }

    /// Create a packet with payload
    pub fn with_payload(
        command: impl Into<u16>,
        session_id: u16,
        sequence: u16,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            command: command.into(),
            session_id,
            sequence,
            payload: payload.into(),
        }
    }

    /// Checksum over header and payload with the checksum field zeroed
    pub fn checksum(&self) -> u16 {
        checksum::calculate(self.command, self.session_id, self.sequence, &self.payload)
    }

    /// Encode the inner frame (header + payload) without any wrapper
    pub fn encode_inner(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(Self::HEADER_SIZE + self.payload.len());

        buf.put_u16_le(self.command);
        buf.put_u16_le(0);
        buf.put_u16_le(self.session_id);
        buf.put_u16_le(self.sequence);
        buf.put_slice(&self.payload);

        let checksum = checksum::compute(&buf);
        buf[checksum::CHECKSUM_OFFSET..checksum::CHECKSUM_OFFSET + 2]
            .copy_from_slice(&checksum.to_le_bytes());

        buf
    }

    /// Encode the packet as it travels on the given transport
    pub fn encode(&self, framing: Framing) -> BytesMut {
        let inner = self.encode_inner();

        match framing {
            Framing::Datagram => inner,
            Framing::Stream => framing.wrap(&inner),
        }
    }

    /// Decode an inner frame without checking its checksum
    pub fn decode(inner: &[u8]) -> Result<Self> {
        let header = Header::decode(inner)?;

        Ok(Self {
            command: header.command,
            session_id: header.session_id,
            sequence: header.sequence,
            payload: Bytes::copy_from_slice(&inner[Self::HEADER_SIZE..]),
        })
    }

    /// Decode an inner frame and reject it if the checksum does not match
    pub fn decode_verified(inner: &[u8]) -> Result<Self> {
        let header = Header::decode(inner)?;
        let expected = checksum::compute(inner);

        if expected != header.checksum {
            return Err(Error::ChecksumMismatch {
                expected,
                received: header.checksum,
            });
        }

        Self::decode(inner)
    }

    /// Typed command id
    pub fn command(&self) -> Result<command::Command> {
        command::Command::try_from(self.command)
    }

    /// Get total inner packet size
    pub fn size(&self) -> usize {
        Self::HEADER_SIZE + self.payload.len()
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("command", &command::describe(self.command))
            .field("session_id", &format!("0x{:04X}", self.session_id))
            .field("sequence", &self.sequence)
            .field("checksum", &format!("0x{:04X}", self.checksum()))
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Packet[{}](session={}, seq={}, len={})",
            command::describe(self.command),
            self.session_id,
            self.sequence,
            self.payload.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Command;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_stream_layout() {
        let packet = Packet::with_payload(Command::OptionsRrq, 0x1234, 7, &b"~OS"[..]);
        let encoded = packet.encode(Framing::Stream);

        assert_eq!(&encoded[..4], &STREAM_MAGIC);
        assert_eq!(stream_length(&encoded).unwrap(), 8 + 3);
        assert_eq!(&encoded[8..10], &11u16.to_le_bytes());
        assert_eq!(&encoded[12..14], &0x1234u16.to_le_bytes());
        assert_eq!(&encoded[14..16], &7u16.to_le_bytes());
        assert_eq!(&encoded[16..], b"~OS");
    }

    #[test]
    fn test_datagram_has_no_wrapper() {
        let packet = Packet::new(Command::Connect, 0, 0);
        let encoded = packet.encode(Framing::Datagram);

        assert_eq!(encoded.len(), Packet::HEADER_SIZE);
        assert_eq!(&encoded[..], &[0xE8, 0x03, 0x16, 0xFC, 0, 0, 0, 0]);
    }

    #[test]
    fn test_encoded_checksum_verifies() {
        let packet = Packet::with_payload(Command::DataRdy, 77, 3, vec![1, 2, 3, 4, 5]);
        let encoded = packet.encode(Framing::Stream);
        let inner = Framing::Stream.strip(&encoded);

        assert!(checksum::verify(inner));
        assert_eq!(Header::decode(inner).unwrap().checksum, packet.checksum());
    }

    #[test]
    fn test_decode_roundtrip() {
        let original = Packet::with_payload(Command::UserWrq, 5, 9, vec![0xAB; 72]);
        let encoded = original.encode(Framing::Datagram);
        let decoded = Packet::decode_verified(&encoded).unwrap();

        assert_eq!(original, decoded);
    }

    #[test]
    fn test_decode_verified_rejects_corruption() {
        let mut encoded = Packet::new(Command::Connect, 0, 0).encode(Framing::Datagram);
        encoded[2] ^= 0xFF;

        assert!(matches!(
            Packet::decode_verified(&encoded),
            Err(Error::ChecksumMismatch { .. })
        ));
        // Lenient decode still accepts it
        assert!(Packet::decode(&encoded).is_ok());
    }

    #[test]
    fn test_unknown_reply_command_is_kept_raw() {
        let encoded = Packet::new(4242u16, 1, 1).encode(Framing::Datagram);
        let header = Header::decode(&encoded).unwrap();

        assert_eq!(header.command, 4242);
        assert!(matches!(header.command(), Err(Error::UnknownCommand(4242))));
    }

    #[test]
    fn test_packet_too_short() {
        assert!(matches!(
            Header::decode(&[1, 2, 3]),
            Err(Error::PacketTooShort { expected: 8, actual: 3 })
        ));
    }

    #[test]
    fn test_strip() {
        let encoded = Packet::new(Command::Exit, 1, 2).encode(Framing::Stream);
        assert_eq!(Framing::Stream.strip(&encoded).len(), 8);
        assert_eq!(Framing::Datagram.strip(&encoded).len(), 16);

        // No prefix: identity
        let bare = [0u8; 12];
        assert_eq!(Framing::Stream.strip(&bare).len(), 12);
        assert_eq!(Framing::Stream.strip(&[0x50, 0x50]).len(), 2);
    }

    #[test]
    fn test_stream_length_rejects_bad_magic() {
        let buf = [0u8; 8];
        assert!(matches!(stream_length(&buf), Err(Error::InvalidMagic(_))));
    }
}
