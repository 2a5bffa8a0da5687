// SPDX-License-Identifier: Apache-2.0

//! An in-enclave filesystem holding its files in memory.
//!
//! The namespace is flat: a path names a file, there are no directories. Files vanish when the
//! last device referring to them is dropped after they were unlinked, or with the filesystem.

use crate::device::{Device, DeviceOps, DeviceType, FileOps, FsOps, Ops};

use portcullis::sync::SpinLock;
use portcullis::Result;

use core::ffi::c_int;
use core::sync::atomic::{AtomicBool, Ordering};
use std::collections::BTreeMap;
use std::sync::Arc;

use libc::{
    mode_t, off_t, EBADF, EEXIST, EFBIG, EINVAL, EISDIR, ENOENT, O_ACCMODE, O_APPEND, O_CREAT,
    O_EXCL, O_RDONLY, O_RDWR, O_TRUNC, O_WRONLY, SEEK_CUR, SEEK_END, SEEK_SET,
};
use spin::RwLock;
use tracing::trace;

type Node = Arc<SpinLock<Vec<u8>>>;

/// The in-memory filesystem.
#[derive(Default)]
pub struct VirtualFs {
    files: RwLock<BTreeMap<String, Node>>,
}

impl VirtualFs {
    pub fn device() -> Result<Arc<Device>> {
        let fs = Self::default();
        Device::alloc(DeviceType::VirtualFile, "vfs", 0, Ops::Fs(Box::new(fs)))
    }
}

impl DeviceOps for VirtualFs {}

impl FsOps for VirtualFs {
    fn open(&self, _dev: &Device, path: &str, flags: c_int, _mode: mode_t) -> Result<Arc<Device>> {
        let access = flags & O_ACCMODE;
        if ![O_RDONLY, O_WRONLY, O_RDWR].contains(&access) {
            return Err(EINVAL);
        }
        if path == "/" {
            return Err(EISDIR);
        }

        let node = {
            let mut files = self.files.write();
            match files.get(path).cloned() {
                Some(_) if flags & O_CREAT != 0 && flags & O_EXCL != 0 => return Err(EEXIST),
                Some(node) => node,
                None if flags & O_CREAT != 0 => {
                    trace!(path, "creating virtual file");
                    files.entry(path.into()).or_default().clone()
                }
                None => return Err(ENOENT),
            }
        };
        if access != O_RDONLY && flags & O_TRUNC != 0 {
            node.lock().clear();
        }

        VirtualFile::device(path, node, flags, 0)
    }

    fn unlink(&self, _dev: &Device, path: &str) -> Result<()> {
        self.files.write().remove(path).map(|_| ()).ok_or(ENOENT)
    }
}

/// A handle to a file of a [`VirtualFs`].
struct VirtualFile {
    node: Node,
    flags: c_int,
    position: SpinLock<usize>,
    closed: AtomicBool,
}

impl VirtualFile {
    fn device(path: &str, node: Node, flags: c_int, position: usize) -> Result<Arc<Device>> {
        let file = Self {
            node,
            flags,
            position: SpinLock::new(position),
            closed: AtomicBool::new(false),
        };
        Device::alloc(DeviceType::VirtualFile, path, 0, Ops::File(Box::new(file)))
    }

    fn check(&self, allowed: bool) -> Result<()> {
        if !allowed || self.closed.load(Ordering::Acquire) {
            return Err(EBADF);
        }
        Ok(())
    }
}

impl DeviceOps for VirtualFile {
    fn try_clone(&self, dev: &Device) -> Result<Arc<Device>> {
        self.check(true)?;
        let position = *self.position.lock();
        VirtualFile::device(dev.name(), self.node.clone(), self.flags, position)
    }

    fn read(&self, _dev: &Device, buf: &mut [u8]) -> Result<usize> {
        self.check(self.flags & O_ACCMODE != O_WRONLY)?;
        let mut position = self.position.lock();
        let data = self.node.lock();
        let start = (*position).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        *position += n;
        Ok(n)
    }

    fn write(&self, _dev: &Device, buf: &[u8]) -> Result<usize> {
        self.check(self.flags & O_ACCMODE != O_RDONLY)?;
        let mut position = self.position.lock();
        let mut data = self.node.lock();
        if self.flags & O_APPEND != 0 {
            *position = data.len();
        }
        let end = position.checked_add(buf.len()).ok_or(EFBIG)?;
        super::extend(&mut data, end)?;
        data[*position..end].copy_from_slice(buf);
        *position = end;
        Ok(buf.len())
    }

    fn close(&self, _dev: &Device) -> Result<()> {
        match self.closed.swap(true, Ordering::AcqRel) {
            true => Err(EBADF),
            false => Ok(()),
        }
    }
}

impl FileOps for VirtualFile {
    fn lseek(&self, _dev: &Device, offset: off_t, whence: c_int) -> Result<off_t> {
        self.check(true)?;
        let mut position = self.position.lock();
        let base = match whence {
            SEEK_SET => 0,
            SEEK_CUR => *position,
            SEEK_END => self.node.lock().len(),
            _ => return Err(EINVAL),
        };
        let new = off_t::try_from(base)
            .ok()
            .and_then(|base| base.checked_add(offset))
            .filter(|&new| new >= 0)
            .ok_or(EINVAL)?;
        *position = usize::try_from(new).map_err(|_| EINVAL)?;
        Ok(new)
    }

    fn size(&self, _dev: &Device) -> Result<u64> {
        Ok(self.node.lock().len() as u64)
    }
}
