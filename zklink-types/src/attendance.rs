//! Attendance log records (40-byte layout)
//!
//! ```text
//! offset  size  field
//!      0     2  user serial number (LE)
//!      2    24  user id (ASCII)
//!     26     1  verify mode / status
//!     27     4  packed timestamp (LE)
//!     31     1  punch (in/out state)
//!     32     8  reserved
//! ```

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};
use crate::records::{read_str, Record};
use crate::time::DeviceTime;

/// In/out state reported with a punch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PunchType {
    CheckIn,
    CheckOut,
    BreakOut,
    BreakIn,
    OvertimeIn,
    OvertimeOut,
    Other(u8),
}

impl From<u8> for PunchType {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::CheckIn,
            1 => Self::CheckOut,
            2 => Self::BreakOut,
            3 => Self::BreakIn,
            4 => Self::OvertimeIn,
            5 => Self::OvertimeOut,
            other => Self::Other(other),
        }
    }
}

impl From<PunchType> for u8 {
    fn from(value: PunchType) -> u8 {
        match value {
            PunchType::CheckIn => 0,
            PunchType::CheckOut => 1,
            PunchType::BreakOut => 2,
            PunchType::BreakIn => 3,
            PunchType::OvertimeIn => 4,
            PunchType::OvertimeOut => 5,
            PunchType::Other(other) => other,
        }
    }
}

/// One attendance log entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceRecord {
    pub user_sn: u16,
    pub user_id: String,
    /// Verification mode (fingerprint, card, password...)
    pub verify: u8,
    pub time: DeviceTime,
    pub punch: PunchType,
}

impl AttendanceRecord {
    pub const SIZE: usize = 40;
}

impl Record for AttendanceRecord {
    const SIZE: usize = AttendanceRecord::SIZE;

    fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(Error::too_short("attendance", Self::SIZE, bytes.len()));
        }

        Ok(Self {
            user_sn: LittleEndian::read_u16(&bytes[0..2]),
            user_id: read_str(&bytes[2..26]),
            verify: bytes[26],
            time: DeviceTime::decode(LittleEndian::read_u32(&bytes[27..31])),
            punch: PunchType::from(bytes[31]),
        })
    }
}

impl fmt::Display for AttendanceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {:?}", self.user_id, self.time, self.punch)
    }
}
