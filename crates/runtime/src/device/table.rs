// SPDX-License-Identifier: Apache-2.0

use super::{Device, DeviceId};

use portcullis::Result;

use std::sync::Arc;

use libc::{EEXIST, EINVAL, ENODEV};
use spin::RwLock;
use tracing::{debug, warn};

/// Number of device identifiers.
pub const MAX_DEVICES: usize = 32;

/// Registry of devices by their well-known identifier.
pub struct DeviceTable {
    devices: RwLock<Vec<Option<Arc<Device>>>>,
}

impl DeviceTable {
    pub fn new() -> Self {
        Self {
            devices: RwLock::new(vec![None; MAX_DEVICES]),
        }
    }

    /// Registers `device` as `id`.
    ///
    /// Fails with [`EINVAL`] for [`DeviceId::NONE`] and identifiers past [`MAX_DEVICES`], and
    /// with [`EEXIST`] if `id` is taken.
    pub fn register(&self, id: DeviceId, device: Arc<Device>) -> Result<()> {
        if id == DeviceId::NONE || id.0 >= MAX_DEVICES {
            warn!(id = id.0, "invalid device id");
            return Err(EINVAL);
        }
        let mut devices = self.devices.write();
        let slot = &mut devices[id.0];
        if slot.is_some() {
            warn!(id = id.0, "device id already registered");
            return Err(EEXIST);
        }
        debug!(id = id.0, kind = ?device.kind(), name = device.name(), "registering device");
        *slot = Some(device);
        Ok(())
    }

    /// Returns the device registered as `id`, [`ENODEV`] if there is none.
    pub fn get(&self, id: DeviceId) -> Result<Arc<Device>> {
        self.devices
            .read()
            .get(id.0)
            .and_then(Option::clone)
            .ok_or(ENODEV)
    }

    /// Unregisters the device registered as `id`, running its [`remove`](super::DeviceOps::remove).
    pub fn remove(&self, id: DeviceId) -> Result<Arc<Device>> {
        let device = self
            .devices
            .write()
            .get_mut(id.0)
            .and_then(Option::take)
            .ok_or(ENODEV)?;
        debug!(id = id.0, name = device.name(), "removing device");
        device.remove()?;
        Ok(device)
    }

    /// Unregisters every device.
    pub(crate) fn clear(&self) -> Vec<Arc<Device>> {
        self.devices
            .write()
            .iter_mut()
            .filter_map(Option::take)
            .collect()
    }
}

impl Default for DeviceTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceType, Ops};

    fn none() -> Arc<Device> {
        Device::alloc(DeviceType::None, "none", 0, Ops::None).unwrap()
    }

    #[test]
    fn registration() {
        let table = DeviceTable::new();
        assert_eq!(table.get(DeviceId::HOST_FS).map(|_| ()), Err(ENODEV));

        table.register(DeviceId::HOST_FS, none()).unwrap();
        assert_eq!(table.register(DeviceId::HOST_FS, none()), Err(EEXIST));
        assert_eq!(table.register(DeviceId::NONE, none()), Err(EINVAL));
        assert_eq!(table.register(DeviceId(MAX_DEVICES), none()), Err(EINVAL));
        assert_eq!(table.get(DeviceId::HOST_FS).unwrap().name(), "none");

        table.remove(DeviceId::HOST_FS).unwrap();
        assert_eq!(table.get(DeviceId::HOST_FS).map(|_| ()), Err(ENODEV));
        assert_eq!(table.remove(DeviceId::HOST_FS).map(|_| ()), Err(ENODEV));
        table.register(DeviceId::HOST_FS, none()).unwrap();
    }
}
