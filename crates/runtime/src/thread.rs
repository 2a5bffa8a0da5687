// SPDX-License-Identifier: Apache-2.0

//! Per-thread default device.
//!
//! A thread may pin its path-based and socket-creating calls to one registered device,
//! bypassing the filesystem multiplexer and the host socket device.

use crate::device::DeviceId;

use std::cell::Cell;

use tracing::trace;

thread_local! {
    static DEFAULT: Cell<Option<DeviceId>> = const { Cell::new(None) };
}

/// Routes the calling thread's calls to the device registered as `id`.
pub fn set_default_device(id: DeviceId) {
    trace!(id = id.0, "setting default device");
    DEFAULT.with(|default| default.set(Some(id)));
}

/// Restores the regular routing for the calling thread.
pub fn clear_default_device() {
    DEFAULT.with(|default| default.set(None));
}

/// Returns the calling thread's default device.
#[inline]
pub fn default_device() -> Option<DeviceId> {
    DEFAULT.with(Cell::get)
}

/// Resets the thread's default device on drop.
#[must_use = "the default device is cleared when the guard is dropped"]
pub struct DefaultDevice {
    previous: Option<DeviceId>,
}

impl DefaultDevice {
    /// Sets `id` as the default device until the returned guard is dropped.
    pub fn set(id: DeviceId) -> Self {
        let previous = default_device();
        set_default_device(id);
        Self { previous }
    }
}

impl Drop for DefaultDevice {
    fn drop(&mut self) {
        DEFAULT.with(|default| default.set(self.previous));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_thread() {
        assert_eq!(default_device(), None);
        set_default_device(DeviceId::VIRTUAL_FS);
        assert_eq!(default_device(), Some(DeviceId::VIRTUAL_FS));

        std::thread::spawn(|| assert_eq!(default_device(), None))
            .join()
            .unwrap();

        clear_default_device();
        assert_eq!(default_device(), None);
    }

    #[test]
    fn guard() {
        let outer = DefaultDevice::set(DeviceId::HOST_FS);
        {
            let _inner = DefaultDevice::set(DeviceId::SECURE_FS);
            assert_eq!(default_device(), Some(DeviceId::SECURE_FS));
        }
        assert_eq!(default_device(), Some(DeviceId::HOST_FS));
        drop(outer);
        assert_eq!(default_device(), None);
    }
}
