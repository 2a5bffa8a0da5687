// SPDX-License-Identifier: Apache-2.0

//! Readiness notification over the runtime's devices.
//!
//! The interest list is kept inside the enclave and readiness is taken from each device's
//! [`poll`](crate::device::DeviceOps::poll). Notification is level triggered.

use crate::device::{Device, DeviceOps, DeviceType, EpollEvent, EpollOps, Events, Ops};

use portcullis::sync::SpinLock;
use portcullis::Result;

use core::ffi::c_int;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use libc::{EEXIST, EFAULT, EINVAL, ENOENT, EPERM, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD};
use tracing::trace;

/// The device creating epoll instances.
pub struct EpollFactory;

impl EpollFactory {
    pub fn device() -> Result<Arc<Device>> {
        Device::alloc(DeviceType::Epoll, "epoll", 0, Ops::Epoll(Box::new(Self)))
    }
}

impl DeviceOps for EpollFactory {}

impl EpollOps for EpollFactory {
    fn create(&self, _dev: &Device) -> Result<Arc<Device>> {
        let epoll = Epoll::default();
        Device::alloc(DeviceType::Epoll, "epoll", 0, Ops::Epoll(Box::new(epoll)))
    }
}

struct Interest {
    target: Weak<Device>,
    event: EpollEvent,
}

/// An epoll instance.
#[derive(Default)]
struct Epoll {
    interest: SpinLock<BTreeMap<c_int, Interest>>,
}

impl Epoll {
    /// Collects the ready entries of the interest list, dropping entries of freed devices.
    fn ready(&self, events: &mut [EpollEvent]) -> usize {
        let mut interest = self.interest.lock();
        interest.retain(|_, entry| entry.target.strong_count() > 0);

        let mut count = 0;
        for entry in interest.values() {
            if count == events.len() {
                break;
            }
            let Some(target) = entry.target.upgrade() else {
                continue;
            };
            let wanted = entry.event.events | Events::ERR | Events::HUP;
            let ready = target.poll().unwrap_or(Events::ERR) & wanted;
            if !ready.is_empty() {
                events[count] = EpollEvent {
                    events: ready,
                    data: entry.event.data,
                };
                count += 1;
            }
        }
        count
    }
}

impl DeviceOps for Epoll {}

impl EpollOps for Epoll {
    fn ctl(
        &self,
        dev: &Device,
        op: c_int,
        fd: c_int,
        target: &Arc<Device>,
        event: Option<EpollEvent>,
    ) -> Result<()> {
        let mut interest = self.interest.lock();
        match op {
            EPOLL_CTL_ADD => {
                let event = event.ok_or(EFAULT)?;
                if core::ptr::eq(Arc::as_ptr(target), dev) {
                    return Err(EINVAL);
                }
                if interest.contains_key(&fd) {
                    return Err(EEXIST);
                }
                if let Err(EPERM) = target.poll() {
                    return Err(EPERM);
                }
                trace!(fd, events = ?event.events, "watching");
                let target = Arc::downgrade(target);
                interest.insert(fd, Interest { target, event });
            }
            EPOLL_CTL_MOD => {
                let event = event.ok_or(EFAULT)?;
                interest.get_mut(&fd).ok_or(ENOENT)?.event = event;
            }
            EPOLL_CTL_DEL => {
                interest.remove(&fd).ok_or(ENOENT)?;
            }
            _ => return Err(EINVAL),
        }
        Ok(())
    }

    fn wait(&self, _dev: &Device, events: &mut [EpollEvent], timeout: c_int) -> Result<usize> {
        if events.is_empty() {
            return Err(EINVAL);
        }
        let deadline = u64::try_from(timeout)
            .ok()
            .map(|ms| Instant::now() + Duration::from_millis(ms));

        loop {
            let count = self.ready(events);
            if count > 0 {
                return Ok(count);
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Ok(0);
            }
            std::thread::yield_now();
        }
    }
}
