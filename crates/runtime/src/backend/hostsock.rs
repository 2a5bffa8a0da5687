// SPDX-License-Identifier: Apache-2.0

//! Host sockets: every operation is proxied to the host.

use crate::device::{Device, DeviceOps, DeviceType, Ops, SocketOps};
use crate::net;

use portcullis::guest::{socket, Cross};
use portcullis::Result;

use core::ffi::c_int;
use core::sync::atomic::{AtomicI32, Ordering};
use std::net::SocketAddr;
use std::sync::Arc;

use libc::EBADF;
use tracing::{debug, warn};

/// Size of the buffer receiving the peer address of an accepted connection.
const ADDR_CAPACITY: usize = 128;

/// The device creating host sockets.
pub struct HostSocketFactory {
    cross: Arc<dyn Cross>,
}

impl HostSocketFactory {
    pub fn device(cross: Arc<dyn Cross>) -> Result<Arc<Device>> {
        let factory = Self { cross };
        Device::alloc(DeviceType::Socket, "hostsock", 0, Ops::Socket(Box::new(factory)))
    }
}

impl DeviceOps for HostSocketFactory {}

impl SocketOps for HostSocketFactory {
    fn socket(
        &self,
        _dev: &Device,
        domain: c_int,
        typ: c_int,
        protocol: c_int,
    ) -> Result<Arc<Device>> {
        let fd = socket::socket(self.cross.as_ref(), domain, typ, protocol)?;
        debug!(domain, typ, protocol, fd, "created host socket");
        HostSocket::device(self.cross.clone(), fd)
    }
}

/// A socket open on the host.
struct HostSocket {
    cross: Arc<dyn Cross>,
    fd: AtomicI32,
}

impl HostSocket {
    fn device(cross: Arc<dyn Cross>, fd: c_int) -> Result<Arc<Device>> {
        let sock = Self {
            cross,
            fd: AtomicI32::new(fd),
        };
        Device::alloc(DeviceType::Socket, "hostsock", 0, Ops::Socket(Box::new(sock)))
    }

    fn fd(&self) -> Result<c_int> {
        match self.fd.load(Ordering::Acquire) {
            fd if fd < 0 => Err(EBADF),
            fd => Ok(fd),
        }
    }
}

impl DeviceOps for HostSocket {
    fn read(&self, _dev: &Device, buf: &mut [u8]) -> Result<usize> {
        socket::read(self.cross.as_ref(), self.fd()?, buf)
    }

    fn write(&self, _dev: &Device, buf: &[u8]) -> Result<usize> {
        socket::write(self.cross.as_ref(), self.fd()?, buf)
    }

    fn close(&self, _dev: &Device) -> Result<()> {
        match self.fd.swap(-1, Ordering::AcqRel) {
            fd if fd < 0 => Err(EBADF),
            fd => socket::close(self.cross.as_ref(), fd),
        }
    }

    fn free(&self, _dev: &Device) {
        let fd = self.fd.swap(-1, Ordering::AcqRel);
        if fd >= 0 {
            if let Err(e) = socket::close(self.cross.as_ref(), fd) {
                warn!(fd, error = e, "closing dropped host socket failed");
            }
        }
    }
}

impl SocketOps for HostSocket {
    fn connect(&self, _dev: &Device, addr: &SocketAddr) -> Result<()> {
        socket::connect(self.cross.as_ref(), self.fd()?, &net::to_raw(addr))
    }

    fn bind(&self, _dev: &Device, addr: &SocketAddr) -> Result<()> {
        socket::bind(self.cross.as_ref(), self.fd()?, &net::to_raw(addr))
    }

    fn listen(&self, _dev: &Device, backlog: c_int) -> Result<()> {
        socket::listen(self.cross.as_ref(), self.fd()?, backlog)
    }

    fn accept(&self, _dev: &Device) -> Result<(Arc<Device>, Option<SocketAddr>)> {
        let mut addr = [0u8; ADDR_CAPACITY];
        let (fd, len) = socket::accept(self.cross.as_ref(), self.fd()?, Some(&mut addr))?;
        let conn = HostSocket::device(self.cross.clone(), fd)?;
        let peer = net::from_raw(&addr[..len.min(ADDR_CAPACITY)]).ok();
        Ok((conn, peer))
    }

    fn send(&self, _dev: &Device, buf: &[u8], flags: c_int) -> Result<usize> {
        socket::send(self.cross.as_ref(), self.fd()?, buf, flags)
    }

    fn recv(&self, _dev: &Device, buf: &mut [u8], flags: c_int) -> Result<usize> {
        socket::recv(self.cross.as_ref(), self.fd()?, buf, flags)
    }

    fn shutdown(&self, _dev: &Device, how: c_int) -> Result<()> {
        socket::shutdown(self.cross.as_ref(), self.fd()?, how)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libc::{AF_INET, ENOTSUP, SHUT_WR, SOCK_STREAM};
    use portcullis::host::Loopback;
    use serial_test::serial;

    #[test]
    #[serial]
    fn tcp_loopback() {
        let factory = HostSocketFactory::device(Arc::new(Loopback::host())).unwrap();
        let ops = factory.socket().unwrap();

        // Without getsockname the listener needs a known port.
        let addr: SocketAddr = "127.0.0.1:38471".parse().unwrap();
        let server = ops.socket(&factory, AF_INET, SOCK_STREAM, 0).unwrap();
        let server_ops = server.socket().unwrap();
        if let Err(e) = server_ops.bind(&server, &addr) {
            assert_eq!(e, libc::EADDRINUSE);
            return;
        }
        server_ops.listen(&server, 1).unwrap();

        let client = ops.socket(&factory, AF_INET, SOCK_STREAM, 0).unwrap();
        client.socket().unwrap().connect(&client, &addr).unwrap();

        let (conn, peer) = server_ops.accept(&server).unwrap();
        assert_eq!(peer.map(|p| p.ip()), Some(addr.ip()));

        assert_eq!(client.write(b"ping"), Ok(4));
        let mut buf = [0u8; 8];
        assert_eq!(conn.socket().unwrap().recv(&conn, &mut buf, 0), Ok(4));
        assert_eq!(&buf[..4], b"ping");

        client.socket().unwrap().shutdown(&client, SHUT_WR).unwrap();
        assert_eq!(conn.read(&mut buf), Ok(0));

        assert_eq!(client.close(), Ok(()));
        assert_eq!(client.close(), Err(EBADF));
        assert_eq!(
            ops.socketpair(&factory, AF_INET, SOCK_STREAM, 0).map(|_| ()),
            Err(ENOTSUP)
        );
    }
}
