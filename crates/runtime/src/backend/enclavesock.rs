// SPDX-License-Identifier: Apache-2.0

//! Connected stream socket pairs that never leave the enclave.

use crate::device::{Device, DeviceOps, DeviceType, Events, Ops, SocketOps};

use portcullis::sync::SpinLock;
use portcullis::Result;

use core::ffi::{c_int, c_ulong};
use core::sync::atomic::{AtomicBool, Ordering};
use std::collections::VecDeque;
use std::sync::Arc;

use libc::{
    AF_UNIX, EAFNOSUPPORT, EAGAIN, EBADF, EFAULT, EINVAL, ENOTTY, EOPNOTSUPP, EPIPE,
    EPROTONOSUPPORT, FIONBIO, FIONREAD, MSG_DONTWAIT, SHUT_RD, SHUT_RDWR, SHUT_WR, SOCK_CLOEXEC,
    SOCK_NONBLOCK, SOCK_STREAM,
};
use tracing::trace;

/// Number of bytes buffered in each direction.
pub const CAPACITY: usize = 64 * 1024;

#[derive(Default)]
struct Channel {
    data: VecDeque<u8>,
    writer_gone: bool,
    reader_gone: bool,
}

/// The device creating socket pairs.
pub struct EnclaveSocketFactory;

impl EnclaveSocketFactory {
    pub fn device() -> Result<Arc<Device>> {
        let ops = Ops::Socket(Box::new(Self));
        Device::alloc(DeviceType::EnclaveSocket, "enclavesock", 0, ops)
    }
}

impl DeviceOps for EnclaveSocketFactory {}

impl SocketOps for EnclaveSocketFactory {
    fn socketpair(
        &self,
        _dev: &Device,
        domain: c_int,
        typ: c_int,
        protocol: c_int,
    ) -> Result<[Arc<Device>; 2]> {
        if domain != AF_UNIX {
            return Err(EAFNOSUPPORT);
        }
        if typ & !(SOCK_NONBLOCK | SOCK_CLOEXEC) != SOCK_STREAM {
            return Err(EOPNOTSUPP);
        }
        if protocol != 0 {
            return Err(EPROTONOSUPPORT);
        }

        let nonblocking = typ & SOCK_NONBLOCK != 0;
        let there = Arc::new(SpinLock::new(Channel::default()));
        let back = Arc::new(SpinLock::new(Channel::default()));
        trace!(nonblocking, "creating enclave socket pair");
        Ok([
            EnclaveSocket::device(back.clone(), there.clone(), nonblocking)?,
            EnclaveSocket::device(there, back, nonblocking)?,
        ])
    }
}

/// One end of a socket pair.
struct EnclaveSocket {
    rx: Arc<SpinLock<Channel>>,
    tx: Arc<SpinLock<Channel>>,
    nonblocking: AtomicBool,
    read_shut: AtomicBool,
    closed: AtomicBool,
}

impl EnclaveSocket {
    fn device(
        rx: Arc<SpinLock<Channel>>,
        tx: Arc<SpinLock<Channel>>,
        nonblocking: bool,
    ) -> Result<Arc<Device>> {
        let sock = Self {
            rx,
            tx,
            nonblocking: AtomicBool::new(nonblocking),
            read_shut: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        };
        Device::alloc(DeviceType::EnclaveSocket, "enclavesock", 0, Ops::Socket(Box::new(sock)))
    }

    fn check(&self) -> Result<()> {
        match self.closed.load(Ordering::Acquire) {
            true => Err(EBADF),
            false => Ok(()),
        }
    }

    fn blocks(&self, flags: c_int) -> bool {
        flags & MSG_DONTWAIT == 0 && !self.nonblocking.load(Ordering::Relaxed)
    }

    fn hang_up(&self) {
        self.tx.lock().writer_gone = true;
        self.rx.lock().reader_gone = true;
    }
}

impl DeviceOps for EnclaveSocket {
    fn read(&self, dev: &Device, buf: &mut [u8]) -> Result<usize> {
        self.recv(dev, buf, 0)
    }

    fn write(&self, dev: &Device, buf: &[u8]) -> Result<usize> {
        self.send(dev, buf, 0)
    }

    fn close(&self, _dev: &Device) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(EBADF);
        }
        self.hang_up();
        Ok(())
    }

    fn free(&self, _dev: &Device) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.hang_up();
        }
    }

    fn ioctl(&self, _dev: &Device, request: c_ulong, arg: Option<&mut c_int>) -> Result<c_int> {
        self.check()?;
        match request {
            r if r == FIONBIO as c_ulong => {
                let value = arg.ok_or(EFAULT)?;
                self.nonblocking.store(*value != 0, Ordering::Relaxed);
                Ok(0)
            }
            r if r == FIONREAD as c_ulong => {
                let value = arg.ok_or(EFAULT)?;
                *value = c_int::try_from(self.rx.lock().data.len()).map_err(|_| EINVAL)?;
                Ok(0)
            }
            _ => Err(ENOTTY),
        }
    }

    fn poll(&self, _dev: &Device) -> Result<Events> {
        self.check()?;
        let mut events = Events::empty();
        {
            let rx = self.rx.lock();
            if !rx.data.is_empty() || rx.writer_gone {
                events |= Events::IN;
            }
            if rx.writer_gone {
                events |= Events::RDHUP;
            }
        }
        let tx = self.tx.lock();
        if tx.reader_gone {
            events |= Events::ERR;
            if events.contains(Events::RDHUP) {
                events |= Events::HUP;
            }
        } else if tx.data.len() < CAPACITY {
            events |= Events::OUT;
        }
        Ok(events)
    }
}

impl SocketOps for EnclaveSocket {
    fn send(&self, _dev: &Device, buf: &[u8], flags: c_int) -> Result<usize> {
        self.check()?;
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            {
                let mut tx = self.tx.lock();
                if tx.writer_gone || tx.reader_gone {
                    return Err(EPIPE);
                }
                let room = CAPACITY - tx.data.len();
                if room > 0 {
                    let n = room.min(buf.len());
                    tx.data.extend(&buf[..n]);
                    return Ok(n);
                }
            }
            if !self.blocks(flags) {
                return Err(EAGAIN);
            }
            std::thread::yield_now();
        }
    }

    fn recv(&self, _dev: &Device, buf: &mut [u8], flags: c_int) -> Result<usize> {
        self.check()?;
        if buf.is_empty() || self.read_shut.load(Ordering::Acquire) {
            return Ok(0);
        }
        loop {
            {
                let mut rx = self.rx.lock();
                if !rx.data.is_empty() {
                    let n = buf.len().min(rx.data.len());
                    for (dst, src) in buf.iter_mut().zip(rx.data.drain(..n)) {
                        *dst = src;
                    }
                    return Ok(n);
                }
                if rx.writer_gone {
                    return Ok(0);
                }
            }
            if !self.blocks(flags) {
                return Err(EAGAIN);
            }
            std::thread::yield_now();
        }
    }

    fn shutdown(&self, _dev: &Device, how: c_int) -> Result<()> {
        self.check()?;
        let (read, write) = match how {
            SHUT_RD => (true, false),
            SHUT_WR => (false, true),
            SHUT_RDWR => (true, true),
            _ => return Err(EINVAL),
        };
        if read {
            self.read_shut.store(true, Ordering::Release);
        }
        if write {
            self.tx.lock().writer_gone = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libc::{AF_INET, SOCK_DGRAM};

    fn pair(typ: c_int) -> [Arc<Device>; 2] {
        let factory = EnclaveSocketFactory::device().unwrap();
        let ops = factory.socket().unwrap();
        ops.socketpair(&factory, AF_UNIX, typ, 0).unwrap()
    }

    #[test]
    fn unsupported() {
        let factory = EnclaveSocketFactory::device().unwrap();
        let ops = factory.socket().unwrap();
        let pair = |domain, typ, protocol| {
            ops.socketpair(&factory, domain, typ, protocol).map(|_| ())
        };
        assert_eq!(pair(AF_INET, SOCK_STREAM, 0), Err(EAFNOSUPPORT));
        assert_eq!(pair(AF_UNIX, SOCK_DGRAM, 0), Err(EOPNOTSUPP));
        assert_eq!(pair(AF_UNIX, SOCK_STREAM, 6), Err(EPROTONOSUPPORT));
        assert_eq!(
            ops.socket(&factory, AF_UNIX, SOCK_STREAM, 0).map(|_| ()),
            Err(libc::ENOTSUP)
        );
    }

    #[test]
    fn stream() {
        let [a, b] = pair(SOCK_STREAM | SOCK_NONBLOCK);
        assert_eq!(a.kind(), DeviceType::EnclaveSocket);

        let mut buf = [0u8; 8];
        assert_eq!(b.read(&mut buf), Err(EAGAIN));
        assert_eq!(b.poll(), Ok(Events::OUT));

        assert_eq!(a.write(b"hello"), Ok(5));
        assert_eq!(b.poll(), Ok(Events::IN | Events::OUT));
        let mut pending = 0;
        assert_eq!(b.ioctl(FIONREAD as _, Some(&mut pending)), Ok(0));
        assert_eq!(pending, 5);

        assert_eq!(b.read(&mut buf[..3]), Ok(3));
        assert_eq!(b.read(&mut buf), Ok(2));
        assert_eq!(&buf[..2], b"lo");

        assert_eq!(b.write(b"back"), Ok(4));
        assert_eq!(a.read(&mut buf), Ok(4));
        assert_eq!(&buf[..4], b"back");
    }

    #[test]
    fn hang_up() {
        let [a, b] = pair(SOCK_STREAM);
        a.write(b"last").unwrap();
        a.close().unwrap();
        assert_eq!(a.write(b"x"), Err(EBADF));

        let mut buf = [0u8; 8];
        assert_eq!(b.read(&mut buf), Ok(4));
        assert_eq!(b.read(&mut buf), Ok(0));
        assert_eq!(b.write(b"x"), Err(EPIPE));
        assert!(b.poll().unwrap().contains(Events::IN | Events::HUP));
    }

    #[test]
    fn shutdown_and_blocking() {
        let [a, b] = pair(SOCK_STREAM);
        let mut on = 1;
        assert_eq!(b.ioctl(FIONBIO as _, Some(&mut on)), Ok(0));
        let mut buf = [0u8; 4];
        assert_eq!(b.read(&mut buf), Err(EAGAIN));
        assert_eq!(b.ioctl(FIONBIO as _, None), Err(EFAULT));
        assert_eq!(b.ioctl(0x5401, None), Err(ENOTTY));

        let reader = std::thread::spawn(move || {
            let mut buf = [0u8; 4];
            let n = a.read(&mut buf).unwrap();
            (a, buf[..n].to_vec())
        });
        std::thread::sleep(std::time::Duration::from_millis(10));
        b.write(b"wake").unwrap();
        let (a, got) = reader.join().unwrap();
        assert_eq!(got, b"wake");

        let sock = a.socket().unwrap();
        sock.shutdown(&a, SHUT_WR).unwrap();
        assert_eq!(a.write(b"x"), Err(EPIPE));
        assert_eq!(b.read(&mut buf), Ok(0));
        assert_eq!(sock.shutdown(&a, 7), Err(EINVAL));
    }
}
