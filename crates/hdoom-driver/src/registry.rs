use std::sync::{Arc, Mutex};

use crate::config::DeviceConfig;
use crate::device::{Device, Hardware};
use crate::error::{Error, Result};
use crate::sync::lock;

/// Number of device slots (minor numbers).
pub const MAX_DEVICES: usize = 256;

/// Owner of every attached device, keyed by slot.
///
/// Dropping the registry detaches whatever is still attached, which blocks until the resources
/// of those devices are released.
pub struct DeviceRegistry {
    slots: Mutex<Vec<Option<Arc<Device>>>>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(vec![None; MAX_DEVICES]),
        }
    }

    /// Brings up `hw` in the lowest free slot.
    pub fn attach(&self, hw: Hardware, config: DeviceConfig) -> Result<Arc<Device>> {
        let mut slots = lock(&self.slots);
        let minor = slots
            .iter()
            .position(Option::is_none)
            .ok_or(Error::NoDeviceSlot)?;
        let device = Device::attach(minor as u32, hw, config)?;
        slots[minor] = Some(Arc::clone(&device));
        Ok(device)
    }

    pub fn get(&self, minor: u32) -> Option<Arc<Device>> {
        lock(&self.slots).get(minor as usize)?.clone()
    }

    /// Frees the slot, then blocks until every resource of the device is released and shuts
    /// the device down.
    pub fn detach(&self, minor: u32) -> Result<()> {
        let device = lock(&self.slots)
            .get_mut(minor as usize)
            .and_then(Option::take)
            .ok_or(Error::NoDevice(minor))?;
        device.detach();
        Ok(())
    }

    /// Detaches every device.
    pub fn shutdown(&self) {
        let devices: Vec<_> = lock(&self.slots)
            .iter_mut()
            .filter_map(Option::take)
            .collect();
        for device in devices {
            device.detach();
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.slots).iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}
