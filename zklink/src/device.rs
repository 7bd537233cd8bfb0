//! High-level device interface

use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, warn};
use zklink_core::constants::keywords;
use zklink_core::{Command, EventFlags, Header, SessionState, DEFAULT_PORT, HEADER_SIZE};
use zklink_types::device_info::{parse_option, parse_text};
use zklink_types::{
    decode_all, AttendanceRecord, DeviceInfo, DeviceTime, FreeSizes, RealtimeEvent, User,
};

use crate::bulk::{attendance_request, users_request};
use crate::config::{Endpoint, SessionOptions};
use crate::error::{Error, Result};
use crate::session::DeviceSession;

/// ZKTeco device
///
/// High-level interface for communicating with ZKTeco-class terminals.
///
/// # Examples
///
/// ```no_run
/// use zklink::Device;
///
/// #[tokio::main]
/// async fn main() -> zklink::Result<()> {
///     let mut device = Device::new("192.168.1.201", 4370);
///
///     device.connect().await?;
///     println!("Connected!");
///
///     let info = device.get_device_info().await?;
///     println!("Device: {}", info);
///
///     device.disconnect().await?;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct Device {
    session: DeviceSession,
}

impl Device {
    /// Create a new device instance (TCP transport)
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self::from_endpoint(Endpoint::new(ip, port), SessionOptions::default())
    }

    /// Create a new device instance using UDP transport
    pub fn new_udp(ip: impl Into<String>, port: u16) -> Self {
        Self::from_endpoint(Endpoint::udp(ip, port), SessionOptions::default())
    }

    pub fn from_endpoint(endpoint: Endpoint, options: SessionOptions) -> Self {
        Self {
            session: DeviceSession::new(endpoint, options),
        }
    }

    /// Set command timeout; ignored once the device is connected
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if let Err(e) = self.session.set_timeout(timeout) {
            warn!("Timeout unchanged: {}", e);
        }
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.session.endpoint()
    }

    /// Underlying session, for raw exchanges
    pub fn session_mut(&mut self) -> &mut DeviceSession {
        &mut self.session
    }

    pub fn session_id(&self) -> Option<u16> {
        self.session.session_id()
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Open the socket and perform the CONNECT handshake
    ///
    /// A failed handshake closes the socket again. There is no retry here;
    /// see [`crate::DeviceManager::connect_with_retry`].
    pub async fn connect(&mut self) -> Result<()> {
        info!("Connecting to {}...", self.session.endpoint());

        if self.session.state() != SessionState::Disconnected {
            self.session.close().await?;
        }

        self.session.open().await?;

        if let Err(e) = self.session.connect().await {
            if let Err(close) = self.session.close().await {
                debug!("Close after failed handshake: {}", close);
            }
            return Err(e);
        }

        Ok(())
    }

    /// Disconnect from device
    pub async fn disconnect(&mut self) -> Result<()> {
        self.session.disconnect().await
    }

    /// Run a raw command; returns the reply with the transport wrapper removed
    pub async fn execute_cmd(&mut self, command: Command, payload: &[u8]) -> Result<Bytes> {
        self.session.execute_cmd(command, payload).await
    }

    /// Query one `keyword=value` option
    pub async fn get_option(&mut self, keyword: &str) -> Result<String> {
        let reply = self
            .session
            .execute_cmd(Command::OptionsRrq, keyword.as_bytes())
            .await?;
        let value = parse_option(&reply, keyword)?;

        debug!("{} = {:?}", keyword, value);
        Ok(value)
    }

    pub async fn get_serial_number(&mut self) -> Result<String> {
        self.get_option(keywords::SERIAL_NUMBER).await
    }

    pub async fn get_device_name(&mut self) -> Result<String> {
        self.get_option(keywords::DEVICE_NAME).await
    }

    pub async fn get_platform(&mut self) -> Result<String> {
        self.get_option(keywords::PLATFORM).await
    }

    pub async fn get_os(&mut self) -> Result<String> {
        self.get_option(keywords::OS).await
    }

    pub async fn get_work_code(&mut self) -> Result<String> {
        self.get_option(keywords::WORK_CODE).await
    }

    pub async fn get_pin_width(&mut self) -> Result<String> {
        self.get_option(keywords::PIN_WIDTH).await
    }

    /// Whether face recognition is switched on
    pub async fn get_face_on(&mut self) -> Result<bool> {
        let value = self.get_option(keywords::FACE_FUNCTION).await?;
        Ok(value.trim() == "1")
    }

    pub async fn get_ssr(&mut self) -> Result<String> {
        self.get_option(keywords::SSR).await
    }

    pub async fn get_fingerprint_version(&mut self) -> Result<String> {
        self.get_option(keywords::FINGERPRINT_VERSION).await
    }

    pub async fn get_firmware_version(&mut self) -> Result<String> {
        let reply = self.session.execute_cmd(Command::GetVersion, &[]).await?;
        Ok(parse_text(&reply)?)
    }

    /// Get device information
    ///
    /// Serial number and firmware version are required; the other fields
    /// are filled when the device answers them.
    pub async fn get_device_info(&mut self) -> Result<DeviceInfo> {
        debug!("Getting device info...");

        let serial_number = self.get_serial_number().await?;
        let firmware_version = self.get_firmware_version().await?;

        let mut info = DeviceInfo::new(serial_number, firmware_version);
        info.platform = self.get_platform().await.ok();
        info.device_name = self.get_device_name().await.ok();
        info.os = self.get_os().await.ok();
        info.fingerprint_version = self.get_fingerprint_version().await.ok();
        info.free_sizes = self.get_free_sizes().await.ok();

        debug!("Device info: {}", info);

        Ok(info)
    }

    pub async fn get_free_sizes(&mut self) -> Result<FreeSizes> {
        let reply = self.session.execute_cmd(Command::GetFreeSizes, &[]).await?;
        Ok(FreeSizes::decode(&reply)?)
    }

    /// Number of stored attendance records
    pub async fn get_attendance_size(&mut self) -> Result<u32> {
        let reply = self.session.execute_cmd(Command::GetFreeSizes, &[]).await?;
        Ok(FreeSizes::decode_logs(&reply)?)
    }

    pub async fn get_time(&mut self) -> Result<DeviceTime> {
        let reply = self.session.execute_cmd(Command::GetTime, &[]).await?;

        let packed = reply
            .get(HEADER_SIZE..HEADER_SIZE + 4)
            .ok_or_else(|| Error::InvalidResponse(format!("time reply too short: {} bytes", reply.len())))?;

        Ok(DeviceTime::decode(u32::from_le_bytes([
            packed[0], packed[1], packed[2], packed[3],
        ])))
    }

    pub async fn set_time(&mut self, time: DeviceTime) -> Result<()> {
        self.command_ok(Command::SetTime, &time.encode()?.to_le_bytes())
            .await
    }

    /// Read the whole user table
    pub async fn get_users(&mut self) -> Result<Vec<User>> {
        let buffer = self
            .session
            .read_with_buffer(&users_request(), |_, _| {})
            .await?
            .into_result()?;
        self.release_buffer().await;

        let users = decode_all::<User>(&buffer)?;
        info!("Read {} users", users.len());
        Ok(users)
    }

    /// Read the attendance log
    ///
    /// `progress` receives `(bytes_so_far, total)` after every chunk.
    pub async fn get_attendances<F>(&mut self, progress: F) -> Result<Vec<AttendanceRecord>>
    where
        F: FnMut(usize, usize),
    {
        let buffer = self
            .session
            .read_with_buffer(&attendance_request(), progress)
            .await?
            .into_result()?;
        self.release_buffer().await;

        let records = decode_all::<AttendanceRecord>(&buffer)?;
        info!("Read {} attendance records", records.len());
        Ok(records)
    }

    /// Create or overwrite a user
    pub async fn set_user(&mut self, user: &User) -> Result<()> {
        debug!("Writing {}", user);
        self.command_ok(Command::UserWrq, &user.encode()).await
    }

    pub async fn clear_attendance_log(&mut self) -> Result<()> {
        warn!("Clearing attendance log...");
        self.command_ok(Command::ClearAttLog, &[]).await
    }

    /// Remove administrator privileges from all users
    pub async fn clear_users(&mut self) -> Result<()> {
        warn!("Clearing administrators...");
        self.command_ok(Command::ClearAdmin, &[]).await
    }

    /// Release the device-side transfer buffer
    pub async fn free_data(&mut self) -> Result<()> {
        self.command_ok(Command::FreeData, &[]).await
    }

    /// Enable device (normal operation mode)
    pub async fn enable_device(&mut self) -> Result<()> {
        debug!("Enabling device...");
        self.command_ok(Command::EnableDevice, &[]).await
    }

    /// Disable device (show "Working..." on LCD)
    pub async fn disable_device(&mut self) -> Result<()> {
        debug!("Disabling device...");
        self.command_ok(Command::DisableDevice, &[]).await
    }

    /// Restart device; the connection is dropped afterwards
    pub async fn restart(&mut self) -> Result<()> {
        warn!("Restarting device...");
        self.command_ok(Command::Restart, &[]).await?;
        self.session.close().await
    }

    /// Power off device; the connection is dropped afterwards
    pub async fn power_off(&mut self) -> Result<()> {
        warn!("Powering off device...");
        self.command_ok(Command::PowerOff, &[]).await?;
        self.session.close().await
    }

    pub async fn sleep(&mut self) -> Result<()> {
        self.command_ok(Command::Sleep, &[]).await
    }

    /// Subscribe to real-time events
    pub async fn enable_realtime(&mut self, flags: EventFlags) -> Result<()> {
        self.command_ok(Command::RegEvent, &flags.bits().to_le_bytes())
            .await
    }

    /// Wait for the next real-time attendance event
    ///
    /// Event frames without an attendance payload are skipped. `Ok(None)`
    /// when nothing arrives in time.
    pub async fn next_realtime_event(&mut self, timeout: Duration) -> Result<Option<RealtimeEvent>> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            let Some(frame) = self.session.next_event(left).await? else {
                return Ok(None);
            };

            if frame.payload.len() < RealtimeEvent::SIZE {
                debug!(flags = frame.flags, len = frame.payload.len(), "Skipping short event");
                continue;
            }

            return Ok(Some(RealtimeEvent::decode(frame.flags, &frame.payload)?));
        }
    }

    /// Run a command whose reply must be an acknowledgement
    async fn command_ok(&mut self, command: Command, payload: &[u8]) -> Result<()> {
        let reply = self.session.execute_cmd(command, payload).await?;
        let header = Header::decode(&reply)?;

        match header.command() {
            Ok(reply_command) if reply_command.is_success() => Ok(()),
            _ => Err(Error::InvalidResponse(format!(
                "{} answered with {}",
                command,
                zklink_core::command::describe(header.command)
            ))),
        }
    }

    /// FREE_DATA after a bulk read; failures only logged
    async fn release_buffer(&mut self) {
        if let Err(e) = self.free_data().await {
            warn!("Failed to free device buffer: {}", e);
        }
    }
}

impl Default for Device {
    fn default() -> Self {
        Self::new("192.168.1.201", DEFAULT_PORT)
    }
}
