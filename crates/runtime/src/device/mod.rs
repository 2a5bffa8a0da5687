// SPDX-License-Identifier: Apache-2.0

//! Devices: the backends servicing file and socket operations.
//!
//! A [`Device`] pairs a [`DeviceType`] with the operation table of its backend. The table is a
//! sum type, [`Ops`], and every operation is dispatched by matching on it: a device can never
//! be reached through the operations of another type. Operations a backend does not implement
//! fail with [`ENOTSUP`].
//!
//! Devices are reference counted with [`Arc`]. Dropping the last reference runs the backend's
//! [`free`](DeviceOps::free). Descriptors referring to a device are counted apart from the
//! `Arc`, the [descriptor table](crate::fd::FdTable) closes the device with the last of them.

mod table;

pub use table::{DeviceTable, MAX_DEVICES};

use portcullis::sync::SpinLock;
use portcullis::Result;

use core::ffi::{c_int, c_ulong};
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::net::SocketAddr;
use std::sync::Arc;

use bitflags::bitflags;
use libc::{mode_t, off_t, EINVAL, ENOMEM, ENOTSOCK, ENOTSUP, ENOTTY, EPERM};
use tracing::{trace, warn};

/// Type of a device, fixed at allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceType {
    None,
    SecureFile,
    HostFile,
    VirtualFile,
    Socket,
    EnclaveSocket,
    Epoll,
    EventFd,
}

impl DeviceType {
    /// Returns `true` for the filesystem types.
    #[inline]
    pub fn is_fs(self) -> bool {
        matches!(
            self,
            DeviceType::SecureFile | DeviceType::HostFile | DeviceType::VirtualFile
        )
    }
}

/// Well-known identifier of a registered device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(pub usize);

impl DeviceId {
    pub const NONE: Self = Self(0);
    pub const SECURE_FS: Self = Self(1);
    pub const HOST_FS: Self = Self(2);
    pub const VIRTUAL_FS: Self = Self(3);
    pub const HOST_SOCKET: Self = Self(4);
    pub const ENCLAVE_SOCKET: Self = Self(5);
    pub const EPOLL: Self = Self(6);
    pub const EVENTFD: Self = Self(7);
}

bitflags! {
    /// Readiness events, with the values of their `EPOLL*` counterparts.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Events: u32 {
        const IN = libc::EPOLLIN as u32;
        const PRI = libc::EPOLLPRI as u32;
        const OUT = libc::EPOLLOUT as u32;
        const ERR = libc::EPOLLERR as u32;
        const HUP = libc::EPOLLHUP as u32;
        const RDHUP = libc::EPOLLRDHUP as u32;
    }
}

/// An entry of an epoll interest or ready list.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EpollEvent {
    pub events: Events,
    pub data: u64,
}

/// Operations common to all devices.
///
/// Every operation receives the device it is invoked on, giving access to its
/// [private data](Device::with_private).
pub trait DeviceOps: Send + Sync {
    /// Called once, right after the device was allocated.
    fn init(&self, _dev: &Device) -> Result<()> {
        Ok(())
    }

    /// Creates an independent device for the same backing object.
    fn try_clone(&self, _dev: &Device) -> Result<Arc<Device>> {
        Err(ENOTSUP)
    }

    /// Called when the last reference to the device is dropped.
    fn free(&self, _dev: &Device) {}

    /// Called when the device is unregistered from the device table.
    fn remove(&self, _dev: &Device) -> Result<()> {
        Ok(())
    }

    fn read(&self, _dev: &Device, _buf: &mut [u8]) -> Result<usize> {
        Err(ENOTSUP)
    }

    fn write(&self, _dev: &Device, _buf: &[u8]) -> Result<usize> {
        Err(ENOTSUP)
    }

    fn close(&self, _dev: &Device) -> Result<()> {
        Ok(())
    }

    fn ioctl(&self, _dev: &Device, _request: c_ulong, _arg: Option<&mut c_int>) -> Result<c_int> {
        Err(ENOTTY)
    }

    /// Reports the current readiness of the device, or [`EPERM`] if it cannot be polled.
    fn poll(&self, _dev: &Device) -> Result<Events> {
        Err(EPERM)
    }
}

/// Operations of a filesystem.
///
/// Paths are relative to the mount point of the filesystem and always start with `/`.
pub trait FsOps: DeviceOps {
    fn open(&self, dev: &Device, path: &str, flags: c_int, mode: mode_t) -> Result<Arc<Device>>;

    fn unlink(&self, dev: &Device, path: &str) -> Result<()>;
}

/// Operations of an open file.
pub trait FileOps: DeviceOps {
    fn lseek(&self, dev: &Device, offset: off_t, whence: c_int) -> Result<off_t>;

    fn size(&self, dev: &Device) -> Result<u64>;
}

/// Operations of a socket, or of a device creating sockets.
pub trait SocketOps: DeviceOps {
    fn socket(
        &self,
        _dev: &Device,
        _domain: c_int,
        _typ: c_int,
        _protocol: c_int,
    ) -> Result<Arc<Device>> {
        Err(ENOTSUP)
    }

    fn socketpair(
        &self,
        _dev: &Device,
        _domain: c_int,
        _typ: c_int,
        _protocol: c_int,
    ) -> Result<[Arc<Device>; 2]> {
        Err(ENOTSUP)
    }

    fn connect(&self, _dev: &Device, _addr: &SocketAddr) -> Result<()> {
        Err(ENOTSUP)
    }

    fn bind(&self, _dev: &Device, _addr: &SocketAddr) -> Result<()> {
        Err(ENOTSUP)
    }

    fn listen(&self, _dev: &Device, _backlog: c_int) -> Result<()> {
        Err(ENOTSUP)
    }

    fn accept(&self, _dev: &Device) -> Result<(Arc<Device>, Option<SocketAddr>)> {
        Err(ENOTSUP)
    }

    fn send(&self, _dev: &Device, _buf: &[u8], _flags: c_int) -> Result<usize> {
        Err(ENOTSUP)
    }

    fn recv(&self, _dev: &Device, _buf: &mut [u8], _flags: c_int) -> Result<usize> {
        Err(ENOTSUP)
    }

    fn shutdown(&self, _dev: &Device, _how: c_int) -> Result<()> {
        Err(ENOTSUP)
    }
}

/// Operations of an epoll instance, or of the device creating them.
pub trait EpollOps: DeviceOps {
    fn create(&self, _dev: &Device) -> Result<Arc<Device>> {
        Err(ENOTSUP)
    }

    fn ctl(
        &self,
        _dev: &Device,
        _op: c_int,
        _fd: c_int,
        _target: &Arc<Device>,
        _event: Option<EpollEvent>,
    ) -> Result<()> {
        Err(ENOTSUP)
    }

    fn wait(&self, _dev: &Device, _events: &mut [EpollEvent], _timeout: c_int) -> Result<usize> {
        Err(ENOTSUP)
    }
}

/// Operations of the device creating event counters.
pub trait EventFdOps: DeviceOps {
    fn create(&self, _dev: &Device, _initval: u32, _flags: c_int) -> Result<Arc<Device>> {
        Err(ENOTSUP)
    }
}

/// Operation table of a device.
pub enum Ops {
    None,
    /// A filesystem, for the filesystem types.
    Fs(Box<dyn FsOps>),
    /// A file open on a filesystem, for the filesystem types.
    File(Box<dyn FileOps>),
    /// For [`DeviceType::Socket`] and [`DeviceType::EnclaveSocket`].
    Socket(Box<dyn SocketOps>),
    Epoll(Box<dyn EpollOps>),
    EventFd(Box<dyn EventFdOps>),
}

impl Ops {
    /// Returns whether the table may serve a device of type `kind`.
    pub fn serves(&self, kind: DeviceType) -> bool {
        match self {
            Ops::None => kind == DeviceType::None,
            Ops::Fs(_) | Ops::File(_) => kind.is_fs(),
            Ops::Socket(_) => matches!(kind, DeviceType::Socket | DeviceType::EnclaveSocket),
            Ops::Epoll(_) => kind == DeviceType::Epoll,
            Ops::EventFd(_) => kind == DeviceType::EventFd,
        }
    }

    fn variant(&self) -> &'static str {
        match self {
            Ops::None => "none",
            Ops::Fs(_) => "fs",
            Ops::File(_) => "file",
            Ops::Socket(_) => "socket",
            Ops::Epoll(_) => "epoll",
            Ops::EventFd(_) => "eventfd",
        }
    }
}

/// Invokes a [`DeviceOps`] operation on whatever table the device carries.
macro_rules! dispatch {
    ($ops:expr, $none:expr, |$op:ident| $call:expr) => {
        match $ops {
            Ops::None => $none,
            Ops::Fs($op) => $call,
            Ops::File($op) => $call,
            Ops::Socket($op) => $call,
            Ops::Epoll($op) => $call,
            Ops::EventFd($op) => $call,
        }
    };
}

/// A backend instance.
pub struct Device {
    kind: DeviceType,
    name: String,
    ops: Ops,
    private: SpinLock<Box<[u8]>>,
    bindings: AtomicUsize,
}

impl Device {
    /// Allocates a device of type `kind` with `size` zeroed bytes of private data.
    ///
    /// Fails with [`EINVAL`] if `ops` cannot serve `kind`, with [`ENOMEM`] if the private data
    /// cannot be allocated, and with the error of the backend's [`init`](DeviceOps::init).
    pub fn alloc(kind: DeviceType, name: &str, size: usize, ops: Ops) -> Result<Arc<Self>> {
        if !ops.serves(kind) {
            warn!(?kind, name, ops = ops.variant(), "device type and operations mismatch");
            return Err(EINVAL);
        }

        let mut private = Vec::new();
        private.try_reserve_exact(size).map_err(|_| ENOMEM)?;
        private.resize(size, 0);

        let dev = Arc::new(Self {
            kind,
            name: name.into(),
            ops,
            private: SpinLock::new(private.into_boxed_slice()),
            bindings: AtomicUsize::new(0),
        });
        dispatch!(&dev.ops, Ok(()), |ops| ops.init(&dev))?;
        trace!(?kind, name, size, "allocated device");
        Ok(dev)
    }

    #[inline]
    pub fn kind(&self) -> DeviceType {
        self.kind
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the size of the private data.
    #[inline]
    pub fn size(&self) -> usize {
        self.private.lock().len()
    }

    /// Returns the number of descriptors bound to the device.
    #[inline]
    pub fn bindings(&self) -> usize {
        self.bindings.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn bind(&self) {
        self.bindings.fetch_add(1, Ordering::AcqRel);
    }

    /// Drops a descriptor binding, returning `true` if it was the last one.
    #[inline]
    pub(crate) fn unbind(&self) -> bool {
        self.bindings.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// Runs `f` with exclusive access to the private data.
    #[inline]
    pub fn with_private<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        f(&mut self.private.lock())
    }

    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        dispatch!(&self.ops, Err(ENOTSUP), |ops| ops.read(self, buf))
    }

    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        dispatch!(&self.ops, Err(ENOTSUP), |ops| ops.write(self, buf))
    }

    pub fn close(&self) -> Result<()> {
        dispatch!(&self.ops, Ok(()), |ops| ops.close(self))
    }

    pub fn ioctl(&self, request: c_ulong, arg: Option<&mut c_int>) -> Result<c_int> {
        dispatch!(&self.ops, Err(ENOTTY), |ops| ops.ioctl(self, request, arg))
    }

    pub fn try_clone(&self) -> Result<Arc<Device>> {
        dispatch!(&self.ops, Err(ENOTSUP), |ops| ops.try_clone(self))
    }

    pub fn poll(&self) -> Result<Events> {
        dispatch!(&self.ops, Err(EPERM), |ops| ops.poll(self))
    }

    pub(crate) fn remove(&self) -> Result<()> {
        dispatch!(&self.ops, Ok(()), |ops| ops.remove(self))
    }

    /// Returns the filesystem operations, [`ENOTSUP`] if this is no filesystem.
    pub fn fs(&self) -> Result<&dyn FsOps> {
        match &self.ops {
            Ops::Fs(ops) => Ok(ops.as_ref()),
            _ => Err(ENOTSUP),
        }
    }

    /// Returns the open file operations, [`ENOTSUP`] if this is no open file.
    pub fn file(&self) -> Result<&dyn FileOps> {
        match &self.ops {
            Ops::File(ops) => Ok(ops.as_ref()),
            _ => Err(ENOTSUP),
        }
    }

    /// Returns the socket operations, [`ENOTSOCK`] if this is no socket.
    pub fn socket(&self) -> Result<&dyn SocketOps> {
        match &self.ops {
            Ops::Socket(ops) => Ok(ops.as_ref()),
            _ => Err(ENOTSOCK),
        }
    }

    /// Returns the epoll operations, [`ENOTSUP`] if this is no epoll device.
    pub fn epoll(&self) -> Result<&dyn EpollOps> {
        match &self.ops {
            Ops::Epoll(ops) => Ok(ops.as_ref()),
            _ => Err(ENOTSUP),
        }
    }

    /// Returns the event counter operations, [`ENOTSUP`] if this is no eventfd device.
    pub fn eventfd(&self) -> Result<&dyn EventFdOps> {
        match &self.ops {
            Ops::EventFd(ops) => Ok(ops.as_ref()),
            _ => Err(ENOTSUP),
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        trace!(kind = ?self.kind, name = %self.name, "freeing device");
        dispatch!(&self.ops, (), |ops| ops.free(self))
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("ops", &self.ops.variant())
            .field("bindings", &self.bindings())
            .finish()
    }
}
