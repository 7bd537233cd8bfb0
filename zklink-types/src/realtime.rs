//! Real-time event payloads
//!
//! After CMD_REG_EVENT the device pushes unsolicited frames whose command
//! id is CMD_REG_EVENT and whose session field carries the event flags.
//! An attendance event payload is 52 bytes:
//!
//! ```text
//! offset  size  field
//!      0    24  user id (ASCII)
//!     24     1  verify mode
//!     25     1  punch
//!     26     6  time [yy, mm, dd, hh, mi, ss]
//!     32    20  reserved
//! ```

use crate::attendance::PunchType;
use crate::error::{Error, Result};
use crate::records::read_str;
use crate::time::DeviceTime;

/// A decoded real-time attendance event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeEvent {
    /// Event flags from the frame header
    pub flags: u16,
    pub user_id: String,
    pub verify: u8,
    pub punch: PunchType,
    pub time: DeviceTime,
}

impl RealtimeEvent {
    pub const SIZE: usize = 52;

    /// Decode an event payload (inner payload, header already removed)
    pub fn decode(flags: u16, payload: &[u8]) -> Result<Self> {
        if payload.len() < Self::SIZE {
            return Err(Error::too_short("real-time event", Self::SIZE, payload.len()));
        }

        let mut time = [0u8; 6];
        time.copy_from_slice(&payload[26..32]);

        Ok(Self {
            flags,
            user_id: read_str(&payload[0..24]),
            verify: payload[24],
            punch: PunchType::from(payload[25]),
            time: DeviceTime::from_event_bytes(time),
        })
    }
}
