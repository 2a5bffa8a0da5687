// SPDX-License-Identifier: Apache-2.0

//! Event counters.
//!
//! The counter is the eight bytes of private data of the device.

use crate::device::{Device, DeviceOps, DeviceType, EventFdOps, Events, Ops};

use portcullis::Result;

use core::ffi::{c_int, c_ulong};
use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use libc::{EAGAIN, EFAULT, EFD_CLOEXEC, EFD_NONBLOCK, EFD_SEMAPHORE, EINVAL, ENOTTY, FIONBIO};
use tracing::trace;

const COUNTER_SIZE: usize = core::mem::size_of::<u64>();

/// Largest value the counter can hold.
pub const MAX_COUNTER: u64 = u64::MAX - 1;

/// The device creating event counters.
pub struct EventFdFactory;

impl EventFdFactory {
    pub fn device() -> Result<Arc<Device>> {
        Device::alloc(DeviceType::EventFd, "eventfd", 0, Ops::EventFd(Box::new(Self)))
    }
}

impl DeviceOps for EventFdFactory {}

impl EventFdOps for EventFdFactory {
    fn create(&self, _dev: &Device, initval: u32, flags: c_int) -> Result<Arc<Device>> {
        if flags & !(EFD_NONBLOCK | EFD_SEMAPHORE | EFD_CLOEXEC) != 0 {
            return Err(EINVAL);
        }
        let counter = EventFd {
            semaphore: flags & EFD_SEMAPHORE != 0,
            nonblocking: AtomicBool::new(flags & EFD_NONBLOCK != 0),
        };
        let ops = Ops::EventFd(Box::new(counter));
        let dev = Device::alloc(DeviceType::EventFd, "eventfd", COUNTER_SIZE, ops)?;
        dev.with_private(|private| private.copy_from_slice(&u64::from(initval).to_ne_bytes()));
        trace!(initval, flags, "created event counter");
        Ok(dev)
    }
}

/// An event counter.
struct EventFd {
    semaphore: bool,
    nonblocking: AtomicBool,
}

fn counter(private: &[u8]) -> u64 {
    let mut bytes = [0u8; COUNTER_SIZE];
    bytes.copy_from_slice(&private[..COUNTER_SIZE]);
    u64::from_ne_bytes(bytes)
}

fn set_counter(private: &mut [u8], value: u64) {
    private[..COUNTER_SIZE].copy_from_slice(&value.to_ne_bytes());
}

impl EventFd {
    /// Retries `op` on the counter until it yields a value, unless the counter is nonblocking.
    fn retry(&self, dev: &Device, mut op: impl FnMut(&mut [u8]) -> Option<u64>) -> Result<u64> {
        loop {
            if let Some(value) = dev.with_private(&mut op) {
                return Ok(value);
            }
            if self.nonblocking.load(Ordering::Relaxed) {
                return Err(EAGAIN);
            }
            std::thread::yield_now();
        }
    }
}

impl DeviceOps for EventFd {
    fn read(&self, dev: &Device, buf: &mut [u8]) -> Result<usize> {
        let buf = buf.get_mut(..COUNTER_SIZE).ok_or(EINVAL)?;
        let value = self.retry(dev, |private| match counter(private) {
            0 => None,
            value if self.semaphore => {
                set_counter(private, value - 1);
                Some(1)
            }
            value => {
                set_counter(private, 0);
                Some(value)
            }
        })?;
        buf.copy_from_slice(&value.to_ne_bytes());
        Ok(COUNTER_SIZE)
    }

    fn write(&self, dev: &Device, buf: &[u8]) -> Result<usize> {
        let buf = buf.get(..COUNTER_SIZE).ok_or(EINVAL)?;
        let mut bytes = [0u8; COUNTER_SIZE];
        bytes.copy_from_slice(buf);
        let add = u64::from_ne_bytes(bytes);
        if add == u64::MAX {
            return Err(EINVAL);
        }

        self.retry(dev, |private| {
            let value = counter(private);
            if MAX_COUNTER - value < add {
                return None;
            }
            set_counter(private, value + add);
            Some(add)
        })?;
        Ok(COUNTER_SIZE)
    }

    fn ioctl(&self, _dev: &Device, request: c_ulong, arg: Option<&mut c_int>) -> Result<c_int> {
        if request != FIONBIO as c_ulong {
            return Err(ENOTTY);
        }
        let value = arg.ok_or(EFAULT)?;
        self.nonblocking.store(*value != 0, Ordering::Relaxed);
        Ok(0)
    }

    fn poll(&self, dev: &Device) -> Result<Events> {
        let value = dev.with_private(|private| counter(private));
        let mut events = Events::empty();
        if value > 0 {
            events |= Events::IN;
        }
        if value < MAX_COUNTER {
            events |= Events::OUT;
        }
        Ok(events)
    }
}

impl EventFdOps for EventFd {}

#[cfg(test)]
mod tests {
    use super::*;

    fn eventfd(initval: u32, flags: c_int) -> Result<Arc<Device>> {
        let factory = EventFdFactory::device()?;
        let ops = factory.eventfd()?;
        ops.create(&factory, initval, flags)
    }

    fn read(dev: &Device) -> Result<u64> {
        let mut buf = [0u8; 8];
        dev.read(&mut buf)?;
        Ok(u64::from_ne_bytes(buf))
    }

    fn write(dev: &Device, value: u64) -> Result<usize> {
        dev.write(&value.to_ne_bytes())
    }

    #[test]
    fn counting() {
        let dev = eventfd(3, EFD_NONBLOCK).unwrap();
        assert_eq!(dev.size(), 8);
        assert_eq!(dev.poll(), Ok(Events::IN | Events::OUT));

        assert_eq!(write(&dev, 4), Ok(8));
        assert_eq!(read(&dev), Ok(7));
        assert_eq!(read(&dev), Err(EAGAIN));
        assert_eq!(dev.poll(), Ok(Events::OUT));

        assert_eq!(write(&dev, MAX_COUNTER), Ok(8));
        assert_eq!(dev.poll(), Ok(Events::IN));
        assert_eq!(write(&dev, 1), Err(EAGAIN));
        assert_eq!(write(&dev, u64::MAX), Err(EINVAL));
        assert_eq!(read(&dev), Ok(MAX_COUNTER));

        assert_eq!(dev.read(&mut [0u8; 4]), Err(EINVAL));
        assert_eq!(dev.write(&[0u8; 7]), Err(EINVAL));
    }

    #[test]
    fn semaphore() {
        let dev = eventfd(2, EFD_SEMAPHORE | EFD_NONBLOCK).unwrap();
        assert_eq!(read(&dev), Ok(1));
        assert_eq!(read(&dev), Ok(1));
        assert_eq!(read(&dev), Err(EAGAIN));
    }

    #[test]
    fn flags() {
        assert_eq!(eventfd(0, 0x2).map(|_| ()), Err(EINVAL));

        let dev = eventfd(0, 0).unwrap();
        let mut on = 1;
        assert_eq!(dev.ioctl(FIONBIO as _, Some(&mut on)), Ok(0));
        assert_eq!(read(&dev), Err(EAGAIN));
        assert_eq!(dev.ioctl(FIONBIO as _, None), Err(EFAULT));
        assert_eq!(dev.ioctl(0, None), Err(ENOTTY));
    }

    #[test]
    fn blocking_read() {
        let dev = eventfd(0, 0).unwrap();
        let reader = {
            let dev = dev.clone();
            std::thread::spawn(move || read(&dev))
        };
        std::thread::sleep(std::time::Duration::from_millis(10));
        write(&dev, 5).unwrap();
        assert_eq!(reader.join().unwrap(), Ok(5));
    }
}
