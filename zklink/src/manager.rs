//! Several devices addressed by id

use std::collections::HashMap;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::{Error, Result};

/// Pause between reconnect attempts, multiplied by the attempt number
const RETRY_DELAY: Duration = Duration::from_millis(200);

/// Registry of devices keyed by a caller-chosen id
///
/// Connectivity is never cached here; every query asks the sessions.
#[derive(Debug, Default)]
pub struct DeviceManager {
    devices: HashMap<String, Device>,
}

impl DeviceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device; an existing device with the same id is returned
    pub fn add(&mut self, id: impl Into<String>, device: Device) -> Option<Device> {
        let id = id.into();
        debug!("Adding device {} ({})", id, device.endpoint());
        self.devices.insert(id, device)
    }

    /// Unregister a device without disconnecting it
    pub fn remove(&mut self, id: &str) -> Result<Device> {
        self.devices
            .remove(id)
            .ok_or_else(|| Error::UnknownDevice(id.to_string()))
    }

    pub fn get(&self, id: &str) -> Result<&Device> {
        self.devices
            .get(id)
            .ok_or_else(|| Error::UnknownDevice(id.to_string()))
    }

    pub fn get_mut(&mut self, id: &str) -> Result<&mut Device> {
        self.devices
            .get_mut(id)
            .ok_or_else(|| Error::UnknownDevice(id.to_string()))
    }

    /// Registered ids, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.devices.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Connect every device concurrently
    ///
    /// Returns one result per device, sorted by id. A device whose task
    /// panicked is dropped from the manager.
    pub async fn connect_all(&mut self) -> Vec<(String, Result<()>)> {
        let mut set = JoinSet::new();

        for (id, mut device) in self.devices.drain() {
            set.spawn(async move {
                let result = device.connect().await;
                (id, device, result)
            });
        }

        let mut results = Vec::with_capacity(set.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((id, device, result)) => {
                    match &result {
                        Ok(()) => info!("Device {} connected", id),
                        Err(e) => warn!("Device {} failed to connect: {}", id, e),
                    }
                    self.devices.insert(id.clone(), device);
                    results.push((id, result));
                }
                Err(e) => warn!("Connect task failed: {}", e),
            }
        }

        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }

    /// Connect one device, reconnecting after recoverable failures
    ///
    /// Every attempt starts from a fresh socket and CONNECT handshake.
    pub async fn connect_with_retry(&mut self, id: &str, attempts: usize) -> Result<()> {
        let attempts = attempts.max(1);
        let device = self.get_mut(id)?;

        let mut attempt = 1;
        loop {
            match device.connect().await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < attempts && e.is_recoverable() => {
                    warn!("Connect to {} failed (attempt {}/{}): {}", id, attempt, attempts, e);
                    tokio::time::sleep(RETRY_DELAY * attempt as u32).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Disconnect every connected device; failures are logged
    pub async fn disconnect_all(&mut self) {
        for (id, device) in self.devices.iter_mut() {
            if !device.is_connected() {
                continue;
            }

            if let Err(e) = device.disconnect().await {
                warn!("Failed to disconnect {}: {}", id, e);
            }
        }
    }

    /// Ids of devices with an established session, sorted
    pub fn connected_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self
            .devices
            .iter()
            .filter(|(_, device)| device.is_connected())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Ids from `ids` that are unknown or not connected, in input order
    pub fn disconnected_ids(&self, ids: &[&str]) -> Vec<String> {
        ids.iter()
            .filter(|id| !self.devices.get(**id).is_some_and(Device::is_connected))
            .map(|id| id.to_string())
            .collect()
    }
}
