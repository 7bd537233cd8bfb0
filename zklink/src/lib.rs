//! # zklink
//!
//! Session, transport and bulk-transfer driver for ZKTeco-class
//! attendance terminals.
//!
//! ## Features
//!
//! - TCP and UDP framing behind one session type
//! - Chunked bulk reads that survive stalls and report partial data
//! - Typed records: users, attendance logs, real-time events
//! - Several devices managed by id
//!
//! ## Quick Start
//!
//! ```no_run
//! use zklink::Device;
//!
//! #[tokio::main]
//! async fn main() -> zklink::Result<()> {
//!     // Connect to device
//!     let mut device = Device::new("192.168.1.201", 4370);
//!     device.connect().await?;
//!
//!     // Read the attendance log
//!     let records = device
//!         .get_attendances(|done, total| println!("{done}/{total} bytes"))
//!         .await?;
//!     println!("{} records", records.len());
//!
//!     // Disconnect
//!     device.disconnect().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod bulk;
pub mod config;
pub mod device;
pub mod error;
pub mod manager;
pub mod session;

#[cfg(test)]
mod testing;

// Re-exports
pub use bulk::{BulkRead, Interruption};
pub use config::{ChecksumPolicy, Endpoint, SessionOptions, TransportKind};
pub use device::Device;
pub use error::{Error, Result};
pub use manager::DeviceManager;
pub use session::{DeviceSession, EventFrame};

// Re-export types
pub use zklink_core::{Command, EventFlags, Packet, SessionState};
pub use zklink_types::{AttendanceRecord, DeviceInfo, DeviceTime, FreeSizes, PunchType, RealtimeEvent, User};
