//! ZKTeco checksum algorithm
//!
//! 1. Build buffer: [Command, 0x00, 0x00, SessionID, Sequence, Payload]
//! 2. Sum as unsigned 16-bit little-endian words, an odd trailing byte counts as-is
//! 3. Fold the running sum modulo 0xFFFF after every word (end-around carry)
//! 4. Store `0xFFFF - sum - 1`, truncated to 16 bits

use tracing::trace;

use crate::constants::USHRT_MAX;

/// Offset of the checksum field inside the inner header
pub const CHECKSUM_OFFSET: usize = 2;

/// Compute the checksum of an inner frame (header + payload).
///
/// The checksum field (bytes 2..4) is treated as zero regardless of its
/// current contents, so this works both for building and for validating.
///
/// # Examples
///
/// ```
/// use zklink_core::checksum;
///
/// // CMD_CONNECT, session 0, sequence 0, no payload
/// let frame = [0xE8, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
/// assert_eq!(checksum::compute(&frame), 0xFC16);
/// ```
pub fn compute(frame: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    for (index, chunk) in frame.chunks(2).enumerate() {
        let word = if index == CHECKSUM_OFFSET / 2 {
            0
        } else if chunk.len() == 2 {
            u16::from_le_bytes([chunk[0], chunk[1]]) as u32
        } else {
            chunk[0] as u32
        };

        sum = (sum + word) % USHRT_MAX;
    }

    USHRT_MAX.wrapping_sub(sum).wrapping_sub(1) as u16
}

/// Calculate the checksum for a header and payload that are not yet laid out.
pub fn calculate(command: u16, session_id: u16, sequence: u16, payload: &[u8]) -> u16 {
    let mut buf = Vec::with_capacity(8 + payload.len());
    buf.extend_from_slice(&command.to_le_bytes());
    buf.extend_from_slice(&[0, 0]);
    buf.extend_from_slice(&session_id.to_le_bytes());
    buf.extend_from_slice(&sequence.to_le_bytes());
    buf.extend_from_slice(payload);

    let checksum = compute(&buf);

    trace!(
        command = command,
        session_id = session_id,
        sequence = sequence,
        payload_len = payload.len(),
        checksum = format!("0x{:04X}", checksum),
        "Calculated checksum"
    );

    checksum
}

/// Check the checksum stored in an inner frame against its contents.
///
/// Frames shorter than a header never verify.
pub fn verify(frame: &[u8]) -> bool {
    if frame.len() < crate::HEADER_SIZE {
        return false;
    }

    let stored = u16::from_le_bytes([frame[CHECKSUM_OFFSET], frame[CHECKSUM_OFFSET + 1]]);
    compute(frame) == stored
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_checksum_connect_known_value() {
        // 0xFFFF - 1000 - 1
        assert_eq!(calculate(1000, 0, 0, &[]), 0xFC16);
    }

    #[test]
    fn test_checksum_ignores_stored_field() {
        let mut frame = vec![0xE8, 0x03, 0xAA, 0xBB, 0x34, 0x12, 0x01, 0x00, 9, 8, 7];
        let first = compute(&frame);
        frame[2] = 0x11;
        frame[3] = 0x22;
        assert_eq!(compute(&frame), first);
    }

    #[test]
    fn test_checksum_odd_payload_length() {
        // Trailing byte is added as a low byte
        let even = calculate(1000, 0, 0, &[1, 0]);
        let odd = calculate(1000, 0, 0, &[1]);
        assert_eq!(even, odd);
    }

    #[test]
    fn test_checksum_folds_large_sums() {
        let payload = vec![0xFF; 1000];
        let checksum = calculate(1000, 0xFFFF, 0xFFFF, &payload);
        assert_eq!(checksum, calculate(1000, 0xFFFF, 0xFFFF, &payload));
    }

    #[test]
    fn test_checksum_different_sessions() {
        assert_ne!(calculate(1000, 100, 0, &[]), calculate(1000, 200, 0, &[]));
    }

    #[test]
    fn test_verify_detects_corruption() {
        let mut frame = vec![0xE8, 0x03, 0, 0, 0, 0, 0, 0, 0xAB, 0xCD];
        let checksum = compute(&frame);
        frame[2..4].copy_from_slice(&checksum.to_le_bytes());
        assert!(verify(&frame));

        frame[9] ^= 0x01;
        assert!(!verify(&frame));
    }

    #[test]
    fn test_verify_short_frame() {
        assert!(!verify(&[1, 2, 3]));
    }

    proptest! {
        #[test]
        fn prop_checksum_roundtrip(
            command in any::<u16>(),
            session_id in any::<u16>(),
            sequence in any::<u16>(),
            payload in proptest::collection::vec(any::<u8>(), 0..512),
        ) {
            let checksum = calculate(command, session_id, sequence, &payload);

            let mut frame = Vec::new();
            frame.extend_from_slice(&command.to_le_bytes());
            frame.extend_from_slice(&checksum.to_le_bytes());
            frame.extend_from_slice(&session_id.to_le_bytes());
            frame.extend_from_slice(&sequence.to_le_bytes());
            frame.extend_from_slice(&payload);

            prop_assert!(verify(&frame));
            prop_assert_eq!(compute(&frame), checksum);
        }
    }
}
