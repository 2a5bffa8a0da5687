// SPDX-License-Identifier: Apache-2.0

//! Device implementations.
//!
//! The host backends marshal every operation into a call across the boundary. The enclave
//! backends never leave the enclave.

mod enclavesock;
mod epoll;
mod eventfd;
mod hostfs;
mod hostsock;
mod securefs;
mod vfs;

pub use enclavesock::EnclaveSocketFactory;
pub use epoll::EpollFactory;
pub use eventfd::{EventFdFactory, MAX_COUNTER};
pub use hostfs::HostFs;
pub use hostsock::HostSocketFactory;
pub use securefs::{SecureFs, KEY_SIZE, NONCE_SIZE};
pub use vfs::VirtualFs;

use portcullis::Result;

use libc::{EFBIG, ENOMEM};

/// Largest file the in-enclave filesystems hold.
pub const MAX_FILE_SIZE: usize = 1 << 30;

/// Zero-extends `contents` to `len` bytes.
///
/// Fails with [`EFBIG`] past [`MAX_FILE_SIZE`] and with [`ENOMEM`] if the memory cannot be
/// reserved.
fn extend(contents: &mut Vec<u8>, len: usize) -> Result<()> {
    if len > MAX_FILE_SIZE {
        return Err(EFBIG);
    }
    if let Some(additional) = len.checked_sub(contents.len()) {
        contents.try_reserve(additional).map_err(|_| ENOMEM)?;
        contents.resize(len, 0);
    }
    Ok(())
}
