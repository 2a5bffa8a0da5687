// SPDX-License-Identifier: Apache-2.0

//! The runtime: owner of the device, descriptor, mount and resolver tables.
//!
//! Every call is routed to a device. Descriptor-based calls use the device bound to the
//! descriptor. Path-based calls use the filesystem mounted at the longest matching prefix and
//! socket-creating calls the socket devices, unless the calling thread has a
//! [default device](crate::thread), which is then used instead. The device type is checked in
//! either case.

use crate::backend::{
    EnclaveSocketFactory, EpollFactory, EventFdFactory, HostFs, HostSocketFactory, SecureFs,
    VirtualFs,
};
use crate::config::{Config, Mount};
use crate::device::{Device, DeviceId, DeviceTable, EpollEvent};
use crate::fd::{FdTable, Unbound, DEFAULT_MAX_FDS};
use crate::fingerprint::Fingerprint;
use crate::mux::{self, MuxFs};
use crate::resolver::{AddrInfoList, HostResolver, Resolver, ResolverChain, StaticResolver};
use crate::thread;

use portcullis::guest::{self, Alloc, Bound, Call, Cross, Direction, Thread};
use portcullis::host::{Dispatcher, Loopback};
use portcullis::item::resolve::Hints;
use portcullis::item::Kind;
use portcullis::switchless::SwitchlessContext;
use portcullis::sync::{Once, SpinLock};
use portcullis::{Error, Result};

use core::ffi::{c_int, c_long, c_ulong};
use core::sync::atomic::AtomicU32;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::Context;
use libc::{mode_t, off_t, timespec, EINVAL, EPOLL_CLOEXEC};
use tracing::{debug, error, trace, warn};

struct Switchless {
    ctx: Arc<SwitchlessContext>,
    workers: SpinLock<Vec<JoinHandle<()>>>,
}

/// Converts an error code into an [`anyhow::Error`].
fn errno(e: Error) -> anyhow::Error {
    std::io::Error::from_raw_os_error(e).into()
}

/// Closes the device released from `fd` if no other descriptor is bound to it.
fn close(fd: c_int, unbound: Unbound) -> Result<()> {
    if !unbound.last {
        trace!(fd, bindings = unbound.device.bindings(), "device still bound");
        return Ok(());
    }
    unbound.device.close()
}

/// An enclave runtime.
///
/// Dropping the runtime [shuts it down](Self::shutdown).
pub struct Runtime {
    transport: Arc<dyn Cross>,
    cross: Arc<dyn Cross>,
    ecalls: Arc<Dispatcher>,
    devices: DeviceTable,
    fds: FdTable,
    mux: MuxFs,
    resolvers: ResolverChain,
    switchless: Option<Switchless>,
    terminated: Once,
}

impl Runtime {
    /// Creates a runtime crossing the boundary with `transport`, which serves ecalls with
    /// `ecalls`.
    ///
    /// The standard devices are registered under their [`DeviceId`]. [`DeviceId::SECURE_FS`]
    /// seals with a key generated for this runtime. Nothing is mounted and no resolver is
    /// registered.
    pub fn new(
        transport: Arc<dyn Cross>,
        ecalls: Arc<Dispatcher>,
        max_fds: usize,
    ) -> Result<Self> {
        Self::build(transport.clone(), transport, ecalls, None, max_fds)
    }

    /// Creates a runtime on an in-process [`Loopback`] with the host resolver registered.
    pub fn loopback() -> Result<Self> {
        let loopback = Loopback::host();
        let ecalls = loopback.ecalls().clone();
        let runtime = Self::new(Arc::new(loopback), ecalls, DEFAULT_MAX_FDS)?;
        runtime.push_resolver(Arc::new(HostResolver::new(runtime.cross.clone())))?;
        Ok(runtime)
    }

    /// Creates a runtime whose ocalls are executed by `workers` switchless workers serving
    /// the host side of `loopback`.
    pub fn switchless(loopback: Loopback, workers: usize, max_fds: usize) -> Result<Self> {
        let ctx = Arc::new(SwitchlessContext::new(loopback.ocalls().clone()));
        let handles = match SwitchlessContext::spawn_workers(&ctx, workers) {
            Ok(handles) => handles,
            Err(e) => {
                ctx.shutdown();
                return Err(e);
            }
        };
        let switchless = Switchless {
            ctx: ctx.clone(),
            workers: SpinLock::new(handles),
        };
        let ecalls = loopback.ecalls().clone();
        Self::build(Arc::new(loopback), ctx, ecalls, Some(switchless), max_fds)
    }

    /// Creates a loopback runtime as described by `config`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let loopback = Loopback::host();
        let runtime = match config.switchless_workers {
            0 => {
                let ecalls = loopback.ecalls().clone();
                Self::new(Arc::new(loopback), ecalls, config.max_fds)
            }
            workers => Self::switchless(loopback, workers, config.max_fds),
        }
        .map_err(errno)
        .context("failed to create runtime")?;

        for mount in &config.mounts {
            let prefix = mount.prefix();
            runtime
                .mount_device(mount)
                .and_then(|device| runtime.mount(prefix, device))
                .map_err(errno)
                .with_context(|| format!("failed to mount `{prefix}`"))?;
        }

        if !config.hosts.is_empty() {
            let hosts = StaticResolver::new();
            for host in &config.hosts {
                hosts.insert(&host.name, host.addr);
            }
            runtime
                .push_resolver(Arc::new(hosts))
                .map_err(errno)
                .context("failed to register the static resolver")?;
        }
        if config.host_resolver {
            let host = HostResolver::new(runtime.cross.clone());
            runtime
                .push_resolver(Arc::new(host))
                .map_err(errno)
                .context("failed to register the host resolver")?;
        }

        debug!(
            mounts = config.mounts.len(),
            hosts = config.hosts.len(),
            switchless = config.switchless_workers,
            "runtime configured"
        );
        Ok(runtime)
    }

    fn build(
        transport: Arc<dyn Cross>,
        cross: Arc<dyn Cross>,
        ecalls: Arc<Dispatcher>,
        switchless: Option<Switchless>,
        max_fds: usize,
    ) -> Result<Self> {
        let runtime = Self {
            transport,
            cross,
            ecalls,
            devices: DeviceTable::new(),
            fds: FdTable::new(max_fds),
            mux: MuxFs::new(),
            resolvers: ResolverChain::new(),
            switchless,
            terminated: Once::new(),
        };

        let host = HostFs::device(runtime.cross.clone(), "/")?;
        let devices = [
            (DeviceId::SECURE_FS, SecureFs::device(host.clone(), None)?),
            (DeviceId::HOST_FS, host),
            (DeviceId::VIRTUAL_FS, VirtualFs::device()?),
            (DeviceId::HOST_SOCKET, HostSocketFactory::device(runtime.cross.clone())?),
            (DeviceId::ENCLAVE_SOCKET, EnclaveSocketFactory::device()?),
            (DeviceId::EPOLL, EpollFactory::device()?),
            (DeviceId::EVENTFD, EventFdFactory::device()?),
        ];
        for (id, device) in devices {
            runtime.devices.register(id, device)?;
        }
        Ok(runtime)
    }

    fn mount_device(&self, mount: &Mount) -> Result<Arc<Device>> {
        match mount {
            Mount::Host { path, .. } => HostFs::device(self.cross.clone(), path),
            Mount::Secure { path, key, .. } => {
                let host = HostFs::device(self.cross.clone(), path)?;
                SecureFs::device(host, key.as_ref().map(|key| key.0))
            }
            Mount::Virtual { .. } => VirtualFs::device(),
        }
    }

    /// Returns the primitive ocalls are issued with.
    #[inline]
    pub fn cross(&self) -> &Arc<dyn Cross> {
        &self.cross
    }

    /// Binds the calling thread to the runtime until the returned guard is dropped.
    pub fn enter(&self) -> Bound {
        Thread::bind(self.cross.clone())
    }

    pub fn register_device(&self, id: DeviceId, device: Arc<Device>) -> Result<()> {
        self.devices.register(id, device)
    }

    pub fn remove_device(&self, id: DeviceId) -> Result<Arc<Device>> {
        self.devices.remove(id)
    }

    pub fn device(&self, id: DeviceId) -> Result<Arc<Device>> {
        self.devices.get(id)
    }

    pub fn register_resolver(&self, slot: usize, resolver: Arc<dyn Resolver>) -> Result<()> {
        self.resolvers.register(slot, resolver)
    }

    /// Registers `resolver` at the lowest free priority, returning its slot.
    pub fn push_resolver(&self, resolver: Arc<dyn Resolver>) -> Result<usize> {
        self.resolvers.push(resolver)
    }

    /// Mounts the filesystem `device` at `prefix`.
    pub fn mount(&self, prefix: &str, device: Arc<Device>) -> Result<()> {
        self.mux.register(prefix, device)
    }

    pub fn umount(&self, prefix: &str) -> Result<()> {
        self.mux.unregister(prefix).map(drop)
    }

    /// Returns the mounted prefixes.
    pub fn mounts(&self) -> Vec<String> {
        self.mux.prefixes()
    }

    /// Returns the number of open descriptors.
    pub fn open_fds(&self) -> usize {
        self.fds.len()
    }

    /// Returns the filesystem serving `path` along with the path it sees.
    fn route(&self, path: &str) -> Result<(Arc<Device>, String)> {
        match thread::default_device() {
            Some(id) => {
                let device = self.devices.get(id)?;
                device.fs()?;
                Ok((device, mux::normalize(path)?))
            }
            None => self.mux.resolve(path),
        }
    }

    /// Returns the thread's default device, or the device registered as `fallback`.
    fn creator(&self, fallback: DeviceId) -> Result<Arc<Device>> {
        self.devices.get(thread::default_device().unwrap_or(fallback))
    }

    pub fn open(&self, path: &str, flags: c_int, mode: mode_t) -> Result<c_int> {
        let (fs, relative) = self.route(path)?;
        let file = fs.fs()?.open(&fs, &relative, flags, mode)?;
        let fd = self.fds.insert(file)?;
        trace!(path, flags, fd, "opened");
        Ok(fd)
    }

    pub fn unlink(&self, path: &str) -> Result<()> {
        let (fs, relative) = self.route(path)?;
        fs.fs()?.unlink(&fs, &relative)
    }

    /// Releases `fd`. The device is closed once no other descriptor refers to it.
    pub fn close(&self, fd: c_int) -> Result<()> {
        match self.fds.release(fd)? {
            Some(unbound) => close(fd, unbound),
            None => Ok(()),
        }
    }

    pub fn read(&self, fd: c_int, buf: &mut [u8]) -> Result<usize> {
        self.fds.get(fd)?.read(buf)
    }

    pub fn write(&self, fd: c_int, buf: &[u8]) -> Result<usize> {
        self.fds.get(fd)?.write(buf)
    }

    pub fn ioctl(&self, fd: c_int, request: c_ulong, arg: Option<&mut c_int>) -> Result<c_int> {
        self.fds.get(fd)?.ioctl(request, arg)
    }

    pub fn lseek(&self, fd: c_int, offset: off_t, whence: c_int) -> Result<off_t> {
        let file = self.fds.get(fd)?;
        file.file()?.lseek(&file, offset, whence)
    }

    /// Returns the size of the file open as `fd`.
    pub fn size(&self, fd: c_int) -> Result<u64> {
        let file = self.fds.get(fd)?;
        file.file()?.size(&file)
    }

    /// Binds the device of `fd` to the lowest free descriptor as well.
    pub fn dup(&self, fd: c_int) -> Result<c_int> {
        let device = self.fds.get(fd)?;
        self.fds.insert(device)
    }

    /// Binds the device of `old` to `new`, releasing whatever `new` was bound to.
    pub fn dup2(&self, old: c_int, new: c_int) -> Result<c_int> {
        let device = self.fds.get(old)?;
        if old == new {
            return Ok(new);
        }
        if let Some(previous) = self.fds.replace(new, device)? {
            if let Err(e) = close(new, previous) {
                warn!(fd = new, error = e, "closing replaced descriptor failed");
            }
        }
        Ok(new)
    }

    /// Opens an independent device for the object behind `fd`, see
    /// [`Device::try_clone`].
    pub fn clone_fd(&self, fd: c_int) -> Result<c_int> {
        let device = self.fds.get(fd)?.try_clone()?;
        self.fds.insert(device)
    }

    pub fn socket(&self, domain: c_int, typ: c_int, protocol: c_int) -> Result<c_int> {
        let creator = self.creator(DeviceId::HOST_SOCKET)?;
        let sock = creator.socket()?.socket(&creator, domain, typ, protocol)?;
        self.fds.insert(sock)
    }

    pub fn socketpair(&self, domain: c_int, typ: c_int, protocol: c_int) -> Result<[c_int; 2]> {
        let creator = self.creator(DeviceId::ENCLAVE_SOCKET)?;
        let [a, b] = creator.socket()?.socketpair(&creator, domain, typ, protocol)?;
        let a = self.fds.insert(a)?;
        match self.fds.insert(b) {
            Ok(b) => Ok([a, b]),
            Err(e) => {
                self.close(a)?;
                Err(e)
            }
        }
    }

    pub fn connect(&self, fd: c_int, addr: &SocketAddr) -> Result<()> {
        let sock = self.fds.get(fd)?;
        sock.socket()?.connect(&sock, addr)
    }

    pub fn bind(&self, fd: c_int, addr: &SocketAddr) -> Result<()> {
        let sock = self.fds.get(fd)?;
        sock.socket()?.bind(&sock, addr)
    }

    pub fn listen(&self, fd: c_int, backlog: c_int) -> Result<()> {
        let sock = self.fds.get(fd)?;
        sock.socket()?.listen(&sock, backlog)
    }

    /// Accepts a connection, returning its descriptor and the peer address if it is known.
    pub fn accept(&self, fd: c_int) -> Result<(c_int, Option<SocketAddr>)> {
        let sock = self.fds.get(fd)?;
        let (conn, peer) = sock.socket()?.accept(&sock)?;
        Ok((self.fds.insert(conn)?, peer))
    }

    pub fn send(&self, fd: c_int, buf: &[u8], flags: c_int) -> Result<usize> {
        let sock = self.fds.get(fd)?;
        sock.socket()?.send(&sock, buf, flags)
    }

    pub fn recv(&self, fd: c_int, buf: &mut [u8], flags: c_int) -> Result<usize> {
        let sock = self.fds.get(fd)?;
        sock.socket()?.recv(&sock, buf, flags)
    }

    pub fn shutdown_socket(&self, fd: c_int, how: c_int) -> Result<()> {
        let sock = self.fds.get(fd)?;
        sock.socket()?.shutdown(&sock, how)
    }

    /// Creates an epoll instance. `size` is a hint and must be positive.
    pub fn epoll_create(&self, size: c_int) -> Result<c_int> {
        if size <= 0 {
            return Err(EINVAL);
        }
        self.epoll_create1(0)
    }

    pub fn epoll_create1(&self, flags: c_int) -> Result<c_int> {
        if flags & !EPOLL_CLOEXEC != 0 {
            return Err(EINVAL);
        }
        let factory = self.devices.get(DeviceId::EPOLL)?;
        let epoll = factory.epoll()?.create(&factory)?;
        self.fds.insert(epoll)
    }

    pub fn epoll_ctl(
        &self,
        epfd: c_int,
        op: c_int,
        fd: c_int,
        event: Option<EpollEvent>,
    ) -> Result<()> {
        let epoll = self.fds.get(epfd)?;
        let target = self.fds.get(fd)?;
        epoll.epoll()?.ctl(&epoll, op, fd, &target, event)
    }

    /// Waits up to `timeout` milliseconds for ready descriptors, forever if it is negative.
    pub fn epoll_wait(
        &self,
        epfd: c_int,
        events: &mut [EpollEvent],
        timeout: c_int,
    ) -> Result<usize> {
        let epoll = self.fds.get(epfd)?;
        epoll.epoll()?.wait(&epoll, events, timeout)
    }

    pub fn eventfd(&self, initval: u32, flags: c_int) -> Result<c_int> {
        let factory = self.devices.get(DeviceId::EVENTFD)?;
        let counter = factory.eventfd()?.create(&factory, initval, flags)?;
        self.fds.insert(counter)
    }

    pub fn getaddrinfo(
        &self,
        node: Option<&str>,
        service: Option<&str>,
        hints: Option<&Hints>,
    ) -> Result<AddrInfoList> {
        let hints = hints.copied().unwrap_or_default();
        self.resolvers.getaddrinfo(node, service, &hints)
    }

    pub fn freeaddrinfo(&self, list: AddrInfoList) {
        self.resolvers.freeaddrinfo(list)
    }

    pub fn getnameinfo(&self, addr: &SocketAddr, flags: c_int) -> Result<(String, String)> {
        self.resolvers.getnameinfo(addr, flags)
    }

    /// Issues a futex operation on the host, see [`guest::futex`].
    pub fn futex(
        &self,
        uaddr: &AtomicU32,
        op: c_int,
        val: u32,
        timeout: Option<&timespec>,
        uaddr2: Option<&AtomicU32>,
        val3: u32,
    ) -> Result<c_long> {
        let _bound = self.enter();
        guest::futex(uaddr, op, val, timeout, uaddr2, val3)
    }

    /// Registers the handler of ecall `num`.
    pub fn register_ecall<F>(&self, num: usize, f: F) -> Result<()>
    where
        F: Fn(&[usize; 6], &mut [u8]) -> Result<usize> + Send + Sync + 'static,
    {
        self.ecalls.register_fn(Kind::Ecall, num, f)
    }

    /// Calls into the enclave. The handler finds `data` at the start of its data section and
    /// its changes are copied back.
    pub fn ecall(&self, num: usize, argv: [usize; 6], data: &mut [u8]) -> Result<usize> {
        let mut alloc = Alloc::new();
        let offset = alloc.input(data)?;
        let reply = Call::execute(
            self.transport.as_ref(),
            Direction::Ecall,
            Kind::Ecall,
            num,
            argv,
            alloc,
        )?;
        let ret = reply.ret()?;
        data.copy_from_slice(reply.data(offset, data.len())?);
        Ok(ret)
    }

    /// Fingerprints the remaining contents of `fd`.
    pub fn fingerprint(&self, fd: c_int) -> Result<Fingerprint> {
        let device = self.fds.get(fd)?;
        Fingerprint::compute(|buf| device.read(buf))
    }

    /// Returns whether the runtime was shut down.
    pub fn is_shutdown(&self) -> bool {
        self.terminated.is_completed()
    }

    /// Closes every descriptor, releases every device and stops the switchless workers.
    ///
    /// Only the first call has an effect.
    pub fn shutdown(&self) -> Result<()> {
        self.terminated.call_once(|| {
            let fds = self.fds.drain();
            debug!(fds = fds.len(), "shutting down runtime");
            for (fd, unbound) in fds {
                if let Err(e) = close(fd, unbound) {
                    warn!(fd, error = e, "closing descriptor failed");
                }
            }

            drop(self.mux.clear());
            for device in self.devices.clear() {
                if let Err(e) = device.remove() {
                    warn!(device = device.name(), error = e, "removing device failed");
                }
            }

            if let Some(switchless) = &self.switchless {
                switchless.ctx.shutdown();
                for worker in switchless.workers.lock().drain(..) {
                    if worker.join().is_err() {
                        error!("switchless worker panicked");
                    }
                }
            }
        })
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!(error = e, "runtime shutdown failed");
        }
    }
}
