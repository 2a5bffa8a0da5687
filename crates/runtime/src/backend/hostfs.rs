// SPDX-License-Identifier: Apache-2.0

//! Host filesystem: every operation is proxied to the host.

use crate::device::{Device, DeviceOps, DeviceType, FileOps, FsOps, Ops};

use portcullis::guest::{file, Cross};
use portcullis::Result;

use core::ffi::c_int;
use core::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use libc::{mode_t, off_t, EBADF};
use tracing::{debug, warn};

/// The host filesystem below `root`.
pub struct HostFs {
    cross: Arc<dyn Cross>,
    root: String,
}

impl HostFs {
    /// Allocates a filesystem device serving the host directory `root`.
    pub fn device(cross: Arc<dyn Cross>, root: &str) -> Result<Arc<Device>> {
        let root = root.trim_end_matches('/').into();
        let fs = Self { cross, root };
        Device::alloc(DeviceType::HostFile, "hostfs", 0, Ops::Fs(Box::new(fs)))
    }

    fn host_path(&self, path: &str) -> String {
        format!("{}{}", self.root, path)
    }
}

impl DeviceOps for HostFs {}

impl FsOps for HostFs {
    fn open(&self, _dev: &Device, path: &str, flags: c_int, mode: mode_t) -> Result<Arc<Device>> {
        let path = self.host_path(path);
        let fd = file::open(self.cross.as_ref(), &path, flags, mode)?;
        debug!(%path, fd, "opened host file");

        let file = HostFile {
            cross: self.cross.clone(),
            fd: AtomicI32::new(fd),
        };
        Device::alloc(DeviceType::HostFile, &path, 0, Ops::File(Box::new(file)))
    }

    fn unlink(&self, _dev: &Device, path: &str) -> Result<()> {
        file::unlink(self.cross.as_ref(), &self.host_path(path))
    }
}

/// A file open on the host.
struct HostFile {
    cross: Arc<dyn Cross>,
    fd: AtomicI32,
}

impl HostFile {
    fn fd(&self) -> Result<c_int> {
        match self.fd.load(Ordering::Acquire) {
            fd if fd < 0 => Err(EBADF),
            fd => Ok(fd),
        }
    }
}

impl DeviceOps for HostFile {
    fn read(&self, _dev: &Device, buf: &mut [u8]) -> Result<usize> {
        file::read(self.cross.as_ref(), self.fd()?, buf)
    }

    fn write(&self, _dev: &Device, buf: &[u8]) -> Result<usize> {
        file::write(self.cross.as_ref(), self.fd()?, buf)
    }

    fn close(&self, _dev: &Device) -> Result<()> {
        match self.fd.swap(-1, Ordering::AcqRel) {
            fd if fd < 0 => Err(EBADF),
            fd => file::close(self.cross.as_ref(), fd),
        }
    }

    fn free(&self, dev: &Device) {
        let fd = self.fd.swap(-1, Ordering::AcqRel);
        if fd >= 0 {
            if let Err(e) = file::close(self.cross.as_ref(), fd) {
                warn!(name = dev.name(), fd, error = e, "closing dropped host file failed");
            }
        }
    }
}

impl FileOps for HostFile {
    fn lseek(&self, _dev: &Device, offset: off_t, whence: c_int) -> Result<off_t> {
        file::lseek(self.cross.as_ref(), self.fd()?, offset, whence)
    }

    fn size(&self, _dev: &Device) -> Result<u64> {
        file::size(self.cross.as_ref(), self.fd()?)
    }
}
