//! Device timestamp codec
//!
//! Terminals pack a wall-clock time into a single u32 using mixed-radix
//! arithmetic where every month has 31 days:
//!
//! ```text
//! ((((((year - 2000) * 12 + (month - 1)) * 31 + (day - 1)) * 24 + hour) * 60 + minute) * 60 + second
//! ```
//!
//! The value carries no timezone; it is the device's local time.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};

use crate::error::{Error, Result};

/// First year representable by the packed encoding
pub const EPOCH_YEAR: u16 = 2000;

/// Last year accepted by [`DeviceTime::new`]
pub const MAX_YEAR: u16 = 2099;

/// Broken-down device time
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl DeviceTime {
    /// Build a time, checking every field against the packed radix
    ///
    /// Calendar validity (e.g. February 30) is not checked here; the device
    /// encoding allows 31 days in every month. See [`DeviceTime::to_naive`].
    pub fn new(year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> Result<Self> {
        if !(EPOCH_YEAR..=MAX_YEAR).contains(&year) {
            return Err(Error::Validation(format!(
                "year {year} outside {EPOCH_YEAR}..={MAX_YEAR}"
            )));
        }
        if !(1..=12).contains(&month) {
            return Err(Error::Validation(format!("month {month} out of range")));
        }
        if !(1..=31).contains(&day) {
            return Err(Error::Validation(format!("day {day} out of range")));
        }
        if hour > 23 || minute > 59 || second > 59 {
            return Err(Error::Validation(format!(
                "time {hour:02}:{minute:02}:{second:02} out of range"
            )));
        }

        Ok(Self {
            year,
            month,
            day,
            hour,
            minute,
            second,
        })
    }

    /// Unpack a device timestamp
    pub fn decode(packed: u32) -> Self {
        let mut t = packed;

        let second = (t % 60) as u8;
        t /= 60;
        let minute = (t % 60) as u8;
        t /= 60;
        let hour = (t % 24) as u8;
        t /= 24;
        let day = (t % 31) as u8 + 1;
        t /= 31;
        let month = (t % 12) as u8 + 1;
        t /= 12;

        Self {
            year: t as u16 + EPOCH_YEAR,
            month,
            day,
            hour,
            minute,
            second,
        }
    }

    /// Pack into the device representation
    ///
    /// Fails when the fields do not fit the packed radix or the result
    /// overflows a u32 (from 2134 on).
    pub fn encode(&self) -> Result<u32> {
        let out_of_range = || Error::Validation(format!("{self} cannot be packed"));

        if self.year < EPOCH_YEAR
            || !(1..=12).contains(&self.month)
            || !(1..=31).contains(&self.day)
            || self.hour > 23
            || self.minute > 59
            || self.second > 59
        {
            return Err(out_of_range());
        }

        let years = u32::from(self.year - EPOCH_YEAR);
        let months = years.checked_mul(12).and_then(|v| v.checked_add(u32::from(self.month - 1)));
        let days = months.and_then(|v| v.checked_mul(31)?.checked_add(u32::from(self.day - 1)));
        let hours = days.and_then(|v| v.checked_mul(24)?.checked_add(u32::from(self.hour)));
        let minutes = hours.and_then(|v| v.checked_mul(60)?.checked_add(u32::from(self.minute)));
        let seconds = minutes.and_then(|v| v.checked_mul(60)?.checked_add(u32::from(self.second)));

        seconds.ok_or_else(out_of_range)
    }

    /// Six-byte `[yy, mm, dd, hh, mi, ss]` form used by real-time events
    pub fn from_event_bytes(bytes: [u8; 6]) -> Self {
        Self {
            year: EPOCH_YEAR + u16::from(bytes[0]),
            month: bytes[1],
            day: bytes[2],
            hour: bytes[3],
            minute: bytes[4],
            second: bytes[5],
        }
    }

    /// Convert to a calendar date-time, `None` when the day does not exist
    pub fn to_naive(&self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(i32::from(self.year), u32::from(self.month), u32::from(self.day))?
            .and_hms_opt(
                u32::from(self.hour),
                u32::from(self.minute),
                u32::from(self.second),
            )
    }
}

impl TryFrom<NaiveDateTime> for DeviceTime {
    type Error = Error;

    fn try_from(value: NaiveDateTime) -> Result<Self> {
        use chrono::{Datelike, Timelike};

        let year = u16::try_from(value.year())
            .map_err(|_| Error::Validation(format!("year {} out of range", value.year())))?;

        Self::new(
            year,
            value.month() as u8,
            value.day() as u8,
            value.hour() as u8,
            value.minute() as u8,
            value.second() as u8,
        )
    }
}

impl fmt::Display for DeviceTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}
