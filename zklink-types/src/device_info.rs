//! Device information structures

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};

/// Device information
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Device serial number
    pub serial_number: String,

    /// Firmware version
    pub firmware_version: String,

    /// Platform name
    pub platform: Option<String>,

    /// Device name (user-assigned)
    pub device_name: Option<String>,

    /// Operating system version
    pub os: Option<String>,

    /// Fingerprint algorithm version
    pub fingerprint_version: Option<String>,

    /// Storage usage snapshot
    pub free_sizes: Option<FreeSizes>,
}

impl DeviceInfo {
    pub fn new(serial_number: String, firmware_version: String) -> Self {
        Self {
            serial_number,
            firmware_version,
            ..Self::default()
        }
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Device[SN: {}, FW: {}]",
            self.serial_number, self.firmware_version
        )
    }
}

/// Storage counters from CMD_GET_FREE_SIZES
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FreeSizes {
    /// Enrolled users
    pub users: u32,

    /// Stored attendance logs
    pub logs: u32,

    /// Attendance log capacity
    pub log_capacity: u32,
}

impl FreeSizes {
    const USERS_OFFSET: usize = 24;
    const LOGS_OFFSET: usize = 40;
    const CAPACITY_OFFSET: usize = 72;

    /// Decode from a reply with the transport wrapper already removed
    ///
    /// Offsets count from the start of the inner header.
    pub fn decode(reply: &[u8]) -> Result<Self> {
        let needed = Self::CAPACITY_OFFSET + 4;
        if reply.len() < needed {
            return Err(Error::too_short("free sizes", needed, reply.len()));
        }

        Ok(Self {
            users: LittleEndian::read_u32(&reply[Self::USERS_OFFSET..]),
            logs: LittleEndian::read_u32(&reply[Self::LOGS_OFFSET..]),
            log_capacity: LittleEndian::read_u32(&reply[Self::CAPACITY_OFFSET..]),
        })
    }

    /// Attendance count alone, for replies too short to hold the capacity
    pub fn decode_logs(reply: &[u8]) -> Result<u32> {
        let needed = Self::LOGS_OFFSET + 4;
        if reply.len() < needed {
            return Err(Error::too_short("free sizes", needed, reply.len()));
        }

        Ok(LittleEndian::read_u32(&reply[Self::LOGS_OFFSET..]))
    }
}

/// Text value of a CMD_OPTIONS_RRQ reply
///
/// The reply carries `keyword=value` at offset 8 of the stripped frame,
/// padded with NULs.
pub fn parse_option(reply: &[u8], keyword: &str) -> Result<String> {
    let text = reply
        .get(crate::INNER_PAYLOAD_OFFSET..)
        .ok_or_else(|| Error::too_short("option reply", crate::INNER_PAYLOAD_OFFSET, reply.len()))?;

    let text = String::from_utf8_lossy(text);
    let text = text.trim_end_matches('\0');
    let value = text
        .strip_prefix(keyword)
        .and_then(|rest| rest.strip_prefix('='))
        .unwrap_or(text);

    Ok(value.trim_end_matches('\0').to_string())
}

/// Text payload at offset 8 of a stripped reply, NULs removed
pub fn parse_text(reply: &[u8]) -> Result<String> {
    let text = reply
        .get(crate::INNER_PAYLOAD_OFFSET..)
        .ok_or_else(|| Error::too_short("text reply", crate::INNER_PAYLOAD_OFFSET, reply.len()))?;

    Ok(String::from_utf8_lossy(text).trim_end_matches('\0').to_string())
}
