// SPDX-License-Identifier: Apache-2.0

//! File descriptor table.

use crate::device::Device;

use portcullis::sync::SpinLock;
use portcullis::Result;

use core::ffi::c_int;
use std::sync::Arc;

use libc::{EBADF, EBUSY, EMFILE};
use tracing::trace;

/// Default number of descriptors of a table.
pub const DEFAULT_MAX_FDS: usize = 1024;

#[derive(Default)]
enum Slot {
    #[default]
    Free,
    Reserved,
    Bound(Arc<Device>),
}

/// A device whose descriptor left the table.
#[derive(Debug)]
pub struct Unbound {
    pub device: Arc<Device>,
    /// No other descriptor refers to the device.
    pub last: bool,
}

impl Unbound {
    fn new(device: Arc<Device>) -> Self {
        let last = device.unbind();
        Self { device, last }
    }
}

/// Maps descriptors to devices.
///
/// Descriptors are handed out lowest first. A descriptor is reserved by
/// [`allocate`](Self::allocate), bound with [`set`](Self::set) and returned with
/// [`release`](Self::release). The table maintains the [binding count](Device::bindings) of
/// the devices it holds.
pub struct FdTable {
    slots: SpinLock<Vec<Slot>>,
    capacity: usize,
}

impl FdTable {
    /// Creates a table of `capacity` descriptors.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: SpinLock::new(Vec::new()),
            capacity,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn index(&self, fd: c_int) -> Result<usize> {
        usize::try_from(fd)
            .ok()
            .filter(|&fd| fd < self.capacity)
            .ok_or(EBADF)
    }

    /// Reserves the lowest free descriptor, failing with [`EMFILE`] if there is none.
    pub fn allocate(&self) -> Result<c_int> {
        let mut slots = self.slots.lock();
        let index = match slots.iter().position(|slot| matches!(slot, Slot::Free)) {
            Some(index) => index,
            None if slots.len() < self.capacity => {
                slots.push(Slot::Free);
                slots.len() - 1
            }
            None => return Err(EMFILE),
        };
        slots[index] = Slot::Reserved;
        trace!(fd = index, "allocated descriptor");
        Ok(index as _)
    }

    /// Reserves the lowest free descriptor and binds it to `device`.
    pub fn insert(&self, device: Arc<Device>) -> Result<c_int> {
        let fd = self.allocate()?;
        self.set(fd, device)?;
        Ok(fd)
    }

    /// Binds the reserved descriptor `fd` to `device`.
    ///
    /// Fails with [`EBADF`] if `fd` was not allocated and with [`EBUSY`] if it is bound.
    pub fn set(&self, fd: c_int, device: Arc<Device>) -> Result<()> {
        let index = self.index(fd)?;
        let mut slots = self.slots.lock();
        match slots.get(index) {
            Some(Slot::Reserved) => {
                device.bind();
                slots[index] = Slot::Bound(device);
                Ok(())
            }
            Some(Slot::Bound(_)) => Err(EBUSY),
            Some(Slot::Free) | None => Err(EBADF),
        }
    }

    /// Returns the device bound to `fd`, [`EBADF`] if there is none.
    pub fn get(&self, fd: c_int) -> Result<Arc<Device>> {
        let index = self.index(fd)?;
        match self.slots.lock().get(index) {
            Some(Slot::Bound(device)) => Ok(device.clone()),
            _ => Err(EBADF),
        }
    }

    /// Binds `fd` to `device` whatever its state, returning the device it was bound to.
    ///
    /// Fails with [`EBADF`] if `fd` is out of range.
    pub fn replace(&self, fd: c_int, device: Arc<Device>) -> Result<Option<Unbound>> {
        let index = self.index(fd)?;
        let mut slots = self.slots.lock();
        if slots.len() <= index {
            slots.resize_with(index + 1, Slot::default);
        }
        device.bind();
        match core::mem::replace(&mut slots[index], Slot::Bound(device)) {
            Slot::Bound(old) => Ok(Some(Unbound::new(old))),
            _ => Ok(None),
        }
    }

    /// Returns `fd` to the free pool along with the device bound to it.
    ///
    /// Fails with [`EBADF`] if `fd` was not allocated.
    pub fn release(&self, fd: c_int) -> Result<Option<Unbound>> {
        let index = self.index(fd)?;
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(index).ok_or(EBADF)?;
        let device = match core::mem::take(slot) {
            Slot::Free => return Err(EBADF),
            Slot::Reserved => None,
            Slot::Bound(device) => Some(Unbound::new(device)),
        };
        while matches!(slots.last(), Some(Slot::Free)) {
            slots.pop();
        }
        trace!(fd, "released descriptor");
        Ok(device)
    }

    /// Returns the number of allocated descriptors.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .iter()
            .filter(|slot| !matches!(slot, Slot::Free))
            .count()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Releases every descriptor, returning the bound devices in descriptor order.
    pub fn drain(&self) -> Vec<(c_int, Unbound)> {
        let slots = core::mem::take(&mut *self.slots.lock());
        slots
            .into_iter()
            .enumerate()
            .filter_map(|(fd, slot)| match slot {
                Slot::Bound(device) => Some((fd as _, Unbound::new(device))),
                _ => None,
            })
            .collect()
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FDS)
    }
}
