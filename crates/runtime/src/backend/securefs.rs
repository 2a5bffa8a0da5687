// SPDX-License-Identifier: Apache-2.0

//! Protected storage on top of a host filesystem.
//!
//! The host only ever sees sealed blobs: a random 96-bit nonce followed by the AES-256-GCM
//! ciphertext of the whole file, authenticated together with the file's path. A file is
//! unsealed into enclave memory when it is opened and sealed back when it is closed after a
//! write. A blob that fails to authenticate is refused with [`EIO`].

use crate::device::{Device, DeviceOps, DeviceType, FileOps, FsOps, Ops};

use portcullis::sync::SpinLock;
use portcullis::Result;

use core::ffi::c_int;
use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use libc::{
    mode_t, off_t, EBADF, EEXIST, EFBIG, EINVAL, EIO, ENOENT, O_ACCMODE, O_APPEND, O_CREAT,
    O_EXCL, O_RDONLY, O_RDWR, O_TRUNC, O_WRONLY, SEEK_CUR, SEEK_END, SEEK_SET,
};
use tracing::{debug, error, warn};

/// Size of the nonce heading a sealed blob.
pub const NONCE_SIZE: usize = 12;

const CHUNK_SIZE: usize = 64 * 1024;

/// Size of a sealing key.
pub const KEY_SIZE: usize = 32;

/// Encrypted files stored on the filesystem device `host`.
pub struct SecureFs {
    host: Arc<Device>,
    cipher: Arc<Aes256Gcm>,
}

impl SecureFs {
    /// Allocates a filesystem device sealing its files with `key`, or a fresh random key.
    ///
    /// Fails with [`ENOTSUP`](libc::ENOTSUP) if `host` is no filesystem.
    pub fn device(host: Arc<Device>, key: Option<[u8; KEY_SIZE]>) -> Result<Arc<Device>> {
        host.fs()?;
        let cipher = match key {
            Some(key) => Aes256Gcm::new(&key.into()),
            None => Aes256Gcm::new(&Aes256Gcm::generate_key(&mut OsRng)),
        };
        let fs = Self {
            host,
            cipher: Arc::new(cipher),
        };
        Device::alloc(DeviceType::SecureFile, "securefs", 0, Ops::Fs(Box::new(fs)))
    }

    fn load(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let file = match self.host.fs()?.open(&self.host, path, O_RDONLY, 0) {
            Ok(file) => file,
            Err(ENOENT) => return Ok(None),
            Err(e) => return Err(e),
        };

        let mut blob = Vec::new();
        let mut chunk = vec![0u8; CHUNK_SIZE];
        loop {
            match file.read(&mut chunk)? {
                0 => break,
                n => blob.extend_from_slice(&chunk[..n]),
            }
        }
        file.close()?;
        Ok(Some(blob))
    }
}

/// Authenticates and decrypts `blob`. An empty blob is an empty file.
fn unseal(cipher: &Aes256Gcm, path: &str, blob: &[u8]) -> Result<Vec<u8>> {
    if blob.is_empty() {
        return Ok(Vec::new());
    }
    if blob.len() < NONCE_SIZE {
        error!(path, "sealed blob is truncated");
        return Err(EIO);
    }
    let (nonce, ciphertext) = blob.split_at(NONCE_SIZE);
    let payload = Payload {
        msg: ciphertext,
        aad: path.as_bytes(),
    };
    cipher.decrypt(Nonce::from_slice(nonce), payload).map_err(|_| {
        error!(path, "sealed blob failed to authenticate");
        EIO
    })
}

fn seal(cipher: &Aes256Gcm, path: &str, contents: &[u8]) -> Result<Vec<u8>> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let payload = Payload {
        msg: contents,
        aad: path.as_bytes(),
    };
    let ciphertext = cipher.encrypt(&nonce, payload).map_err(|_| EIO)?;

    let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

impl DeviceOps for SecureFs {}

impl FsOps for SecureFs {
    fn open(&self, _dev: &Device, path: &str, flags: c_int, mode: mode_t) -> Result<Arc<Device>> {
        let access = flags & O_ACCMODE;
        if ![O_RDONLY, O_WRONLY, O_RDWR].contains(&access) {
            return Err(EINVAL);
        }
        let writable = access != O_RDONLY;

        let (contents, dirty) = match self.load(path)? {
            Some(_) if flags & O_CREAT != 0 && flags & O_EXCL != 0 => return Err(EEXIST),
            Some(_) if writable && flags & O_TRUNC != 0 => (Vec::new(), true),
            Some(blob) => (unseal(&self.cipher, path, &blob)?, false),
            None if flags & O_CREAT != 0 => (Vec::new(), true),
            None => return Err(ENOENT),
        };
        debug!(path, size = contents.len(), "unsealed file");

        let file = SecureFile {
            host: self.host.clone(),
            cipher: self.cipher.clone(),
            path: path.into(),
            flags,
            mode,
            state: SpinLock::new(State {
                contents,
                position: 0,
                dirty,
                closed: false,
            }),
        };
        Device::alloc(DeviceType::SecureFile, path, 0, Ops::File(Box::new(file)))
    }

    fn unlink(&self, _dev: &Device, path: &str) -> Result<()> {
        self.host.fs()?.unlink(&self.host, path)
    }
}

struct State {
    contents: Vec<u8>,
    position: usize,
    dirty: bool,
    closed: bool,
}

/// An unsealed file.
struct SecureFile {
    host: Arc<Device>,
    cipher: Arc<Aes256Gcm>,
    path: String,
    flags: c_int,
    mode: mode_t,
    state: SpinLock<State>,
}

impl SecureFile {
    fn readable(&self) -> bool {
        self.flags & O_ACCMODE != O_WRONLY
    }

    fn writable(&self) -> bool {
        self.flags & O_ACCMODE != O_RDONLY
    }

    /// Writes the sealed contents back to the host.
    fn flush(&self, state: &mut State) -> Result<()> {
        if !state.dirty {
            return Ok(());
        }
        let blob = seal(&self.cipher, &self.path, &state.contents)?;

        let flags = O_WRONLY | O_CREAT | O_TRUNC;
        let file = self.host.fs()?.open(&self.host, &self.path, flags, self.mode)?;
        let mut written = 0;
        while written < blob.len() {
            match file.write(&blob[written..])? {
                0 => return Err(EIO),
                n => written += n,
            }
        }
        file.close()?;

        state.dirty = false;
        debug!(path = %self.path, size = blob.len(), "sealed file");
        Ok(())
    }
}

impl DeviceOps for SecureFile {
    fn read(&self, _dev: &Device, buf: &mut [u8]) -> Result<usize> {
        if !self.readable() {
            return Err(EBADF);
        }
        let mut state = self.state.lock();
        if state.closed {
            return Err(EBADF);
        }
        let start = state.position.min(state.contents.len());
        let n = buf.len().min(state.contents.len() - start);
        buf[..n].copy_from_slice(&state.contents[start..start + n]);
        state.position += n;
        Ok(n)
    }

    fn write(&self, _dev: &Device, buf: &[u8]) -> Result<usize> {
        if !self.writable() {
            return Err(EBADF);
        }
        let mut state = self.state.lock();
        if state.closed {
            return Err(EBADF);
        }
        if self.flags & O_APPEND != 0 {
            state.position = state.contents.len();
        }

        let start = state.position;
        let end = start.checked_add(buf.len()).ok_or(EFBIG)?;
        super::extend(&mut state.contents, end)?;
        state.contents[start..end].copy_from_slice(buf);
        state.position = end;
        state.dirty = true;
        Ok(buf.len())
    }

    fn close(&self, _dev: &Device) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(EBADF);
        }
        state.closed = true;
        self.flush(&mut state)
    }

    fn free(&self, _dev: &Device) {
        let mut state = self.state.lock();
        if !state.closed {
            if let Err(e) = self.flush(&mut state) {
                warn!(path = %self.path, error = e, "sealing dropped file failed");
            }
        }
    }
}

impl FileOps for SecureFile {
    fn lseek(&self, _dev: &Device, offset: off_t, whence: c_int) -> Result<off_t> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(EBADF);
        }
        let base = match whence {
            SEEK_SET => 0,
            SEEK_CUR => state.position,
            SEEK_END => state.contents.len(),
            _ => return Err(EINVAL),
        };
        let position = off_t::try_from(base)
            .ok()
            .and_then(|base| base.checked_add(offset))
            .filter(|&position| position >= 0)
            .ok_or(EINVAL)?;
        state.position = usize::try_from(position).map_err(|_| EINVAL)?;
        Ok(position)
    }

    fn size(&self, _dev: &Device) -> Result<u64> {
        Ok(self.state.lock().contents.len() as u64)
    }
}
