// SPDX-License-Identifier: Apache-2.0

//! Filesystem multiplexer routing paths to mounted filesystem devices.

use crate::device::Device;

use portcullis::Result;

use std::sync::Arc;

use libc::{EEXIST, EINVAL, ENODEV, ENOENT};
use spin::RwLock;
use tracing::{debug, trace, warn};

struct Mount {
    prefix: String,
    device: Arc<Device>,
}

/// Routes absolute paths to the filesystem mounted at their longest matching prefix.
#[derive(Default)]
pub struct MuxFs {
    mounts: RwLock<Vec<Mount>>,
}

/// Normalizes an absolute path: repeated separators and `.` components are dropped and `..`
/// components are applied, never climbing above the root.
///
/// Fails with [`EINVAL`] if `path` is not absolute.
pub fn normalize(path: &str) -> Result<String> {
    if !path.starts_with('/') {
        return Err(EINVAL);
    }

    let mut parts = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            part => parts.push(part),
        }
    }

    let mut normalized = String::with_capacity(path.len());
    for part in parts {
        normalized.push('/');
        normalized.push_str(part);
    }
    if normalized.is_empty() {
        normalized.push('/');
    }
    Ok(normalized)
}

/// Returns the remainder of `path` below `prefix`, if `prefix` matches on a component boundary.
fn strip(path: &str, prefix: &str) -> Option<String> {
    if prefix == "/" {
        return Some(path.into());
    }
    match path.strip_prefix(prefix)? {
        "" => Some("/".into()),
        rest if rest.starts_with('/') => Some(rest.into()),
        _ => None,
    }
}

impl MuxFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mounts the filesystem `device` at `prefix`.
    ///
    /// Fails with [`EINVAL`] for a relative prefix, with [`ENOTSUP`](libc::ENOTSUP) if
    /// `device` is no filesystem and with [`EEXIST`] if `prefix` is already mounted.
    pub fn register(&self, prefix: &str, device: Arc<Device>) -> Result<()> {
        let prefix = normalize(prefix)?;
        device.fs()?;

        let mut mounts = self.mounts.write();
        if mounts.iter().any(|mount| mount.prefix == prefix) {
            warn!(%prefix, "prefix already mounted");
            return Err(EEXIST);
        }
        debug!(%prefix, device = device.name(), "mounting");
        mounts.push(Mount { prefix, device });
        Ok(())
    }

    /// Unmounts `prefix`, returning the device mounted there.
    pub fn unregister(&self, prefix: &str) -> Result<Arc<Device>> {
        let prefix = normalize(prefix)?;
        let mut mounts = self.mounts.write();
        let index = mounts
            .iter()
            .position(|mount| mount.prefix == prefix)
            .ok_or(ENOENT)?;
        debug!(%prefix, "unmounting");
        Ok(mounts.remove(index).device)
    }

    /// Returns the device serving `path` and the path relative to its mount point.
    ///
    /// Fails with [`EINVAL`] for a relative path and with [`ENODEV`] if no prefix matches.
    pub fn resolve(&self, path: &str) -> Result<(Arc<Device>, String)> {
        let path = normalize(path)?;
        let mounts = self.mounts.read();
        let (mount, relative) = mounts
            .iter()
            .filter_map(|mount| strip(&path, &mount.prefix).map(|rest| (mount, rest)))
            .max_by_key(|(mount, _)| mount.prefix.len())
            .ok_or(ENODEV)?;
        trace!(%path, prefix = %mount.prefix, %relative, "resolved path");
        Ok((mount.device.clone(), relative))
    }

    /// Returns the mounted prefixes.
    pub fn prefixes(&self) -> Vec<String> {
        self.mounts
            .read()
            .iter()
            .map(|mount| mount.prefix.clone())
            .collect()
    }

    pub(crate) fn clear(&self) -> Vec<Arc<Device>> {
        self.mounts.write().drain(..).map(|mount| mount.device).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceOps, DeviceType, FsOps, Ops};
    use libc::{mode_t, ENOSYS, ENOTSUP};

    struct Null;

    impl DeviceOps for Null {}

    impl FsOps for Null {
        fn open(&self, _: &Device, _: &str, _: i32, _: mode_t) -> Result<Arc<Device>> {
            Err(ENOSYS)
        }

        fn unlink(&self, _: &Device, _: &str) -> Result<()> {
            Err(ENOSYS)
        }
    }

    fn fs(name: &str) -> Arc<Device> {
        Device::alloc(DeviceType::VirtualFile, name, 0, Ops::Fs(Box::new(Null))).unwrap()
    }

    #[test]
    fn normalization() {
        assert_eq!(normalize("/").unwrap(), "/");
        assert_eq!(normalize("//a/./b//").unwrap(), "/a/b");
        assert_eq!(normalize("/a/../../b").unwrap(), "/b");
        assert_eq!(normalize("a/b"), Err(EINVAL));
        assert_eq!(normalize(""), Err(EINVAL));
    }

    #[test]
    fn longest_prefix() {
        let mux = MuxFs::new();
        mux.register("/", fs("root")).unwrap();
        mux.register("/mnt/data", fs("data")).unwrap();

        let (dev, rel) = mux.resolve("/mnt/data/x").unwrap();
        assert_eq!((dev.name(), rel.as_str()), ("data", "/x"));

        let (dev, rel) = mux.resolve("/mnt/data").unwrap();
        assert_eq!((dev.name(), rel.as_str()), ("data", "/"));

        let (dev, rel) = mux.resolve("/mnt/database").unwrap();
        assert_eq!((dev.name(), rel.as_str()), ("root", "/mnt/database"));

        let (dev, rel) = mux.resolve("/etc/hosts").unwrap();
        assert_eq!((dev.name(), rel.as_str()), ("root", "/etc/hosts"));
    }

    #[test]
    fn registration() {
        let mux = MuxFs::new();
        assert_eq!(mux.resolve("/x").map(|_| ()), Err(ENODEV));

        mux.register("/mnt/", fs("mnt")).unwrap();
        assert_eq!(mux.register("/mnt", fs("again")), Err(EEXIST));
        assert_eq!(mux.register("mnt", fs("relative")), Err(EINVAL));
        assert_eq!(mux.resolve("relative").map(|_| ()), Err(EINVAL));
        assert_eq!(mux.resolve("/other").map(|_| ()), Err(ENODEV));

        let none = Device::alloc(DeviceType::None, "none", 0, Ops::None).unwrap();
        assert_eq!(mux.register("/none", none), Err(ENOTSUP));
        assert_eq!(mux.prefixes(), ["/mnt"]);

        assert_eq!(mux.unregister("/mnt").unwrap().name(), "mnt");
        assert_eq!(mux.unregister("/mnt").map(|_| ()), Err(ENOENT));
        assert_eq!(mux.resolve("/mnt/x").map(|_| ()), Err(ENODEV));
    }
}
