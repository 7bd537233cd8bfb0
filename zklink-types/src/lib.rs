//! Record decoders for zklink
//!
//! Every decoder takes raw bytes as returned by the device (bulk buffers or
//! stripped reply frames) and produces an immutable value.

pub mod attendance;
pub mod device_info;
pub mod error;
pub mod realtime;
pub mod records;
pub mod time;
pub mod user;

pub use attendance::{AttendanceRecord, PunchType};
pub use device_info::{DeviceInfo, FreeSizes};
pub use error::{Error, Result};
pub use realtime::RealtimeEvent;
pub use records::{decode_all, Record};
pub use time::DeviceTime;
pub use user::User;

/// Offset of the payload inside a stripped reply frame
pub const INNER_PAYLOAD_OFFSET: usize = 8;
