// SPDX-License-Identifier: Apache-2.0

use super::Kind;
use crate::{Result, NULL};

use core::ffi::c_int;

use libc::{EFAULT, ENOMEM};

/// Fixed-layout part of an [`Envelope`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C, align(8))]
pub struct Payload {
    /// Raw [`Kind`] of the call. Kept as a plain `usize`, since the other side may write
    /// anything here.
    pub kind: usize,
    pub num: usize,
    pub argv: [usize; 6],
    pub ret: usize,
    pub errno: c_int,
}

impl Payload {
    /// Returns the return value on success or the error reported by the callee.
    #[inline]
    pub fn result(&self) -> Result<usize> {
        if self.errno != 0 {
            Err(self.errno)
        } else {
            Ok(self.ret)
        }
    }

    /// Records the outcome of the call.
    ///
    /// On failure `ret` is set to `-1` following the POSIX convention.
    #[inline]
    pub fn complete(&mut self, res: Result<usize>) {
        match res {
            Ok(ret) => {
                self.ret = ret;
                self.errno = 0;
            }
            Err(errno) => {
                self.ret = -1isize as usize;
                self.errno = errno;
            }
        }
    }
}

/// Boundary-safe argument structure of one call.
///
/// The envelope owns its data section, every buffer argument in the
/// [payload](Payload::argv) is an offset into it.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Envelope {
    pub payload: Payload,
    pub data: Box<[u8]>,
}

impl Envelope {
    /// Creates an envelope with zeroed output fields.
    #[inline]
    pub fn new(kind: Kind, num: usize, argv: [usize; 6], data: Box<[u8]>) -> Self {
        Self {
            payload: Payload {
                kind: kind as _,
                num,
                argv,
                ret: 0,
                errno: 0,
            },
            data,
        }
    }

    /// Allocates a zeroed data section of `len` bytes, failing with [`ENOMEM`].
    pub fn alloc_data(len: usize) -> Result<Box<[u8]>> {
        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|_| ENOMEM)?;
        data.resize(len, 0);
        Ok(data.into_boxed_slice())
    }

    /// Returns `len` bytes of the data section at `offset`.
    #[inline]
    pub fn data(&self, offset: usize, len: usize) -> Result<&[u8]> {
        slice(&self.data, offset, len)
    }

    /// Returns `len` mutable bytes of the data section at `offset`.
    #[inline]
    pub fn data_mut(&mut self, offset: usize, len: usize) -> Result<&mut [u8]> {
        slice_mut(&mut self.data, offset, len)
    }
}

/// Validates that `data` contains `len` bytes at `offset` and returns them.
///
/// Fails with [`EFAULT`] for [`NULL`] and out of bounds ranges.
#[inline]
pub fn slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    if offset == NULL {
        return Err(EFAULT);
    }
    let end = offset.checked_add(len).ok_or(EFAULT)?;
    data.get(offset..end).ok_or(EFAULT)
}

/// Mutable version of [`slice`].
#[inline]
pub fn slice_mut(data: &mut [u8], offset: usize, len: usize) -> Result<&mut [u8]> {
    if offset == NULL {
        return Err(EFAULT);
    }
    let end = offset.checked_add(len).ok_or(EFAULT)?;
    data.get_mut(offset..end).ok_or(EFAULT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use libc::EBADF;
    use testaso::testaso;

    testaso! {
        struct Payload: 8, 80 => {
            kind: 0,
            num: 8,
            argv: 16,
            ret: 64,
            errno: 72
        }
    }

    #[test]
    fn complete() {
        let mut payload = Payload::default();
        payload.complete(Ok(4));
        assert_eq!(payload.result(), Ok(4));

        payload.complete(Err(EBADF));
        assert_eq!(payload.ret, usize::MAX);
        assert_eq!(payload.result(), Err(EBADF));
    }

    #[test]
    fn bounds() {
        let mut envelope = Envelope::new(Kind::File, 0, [0; 6], Envelope::alloc_data(8).unwrap());
        assert_eq!(envelope.data(0, 8).unwrap(), [0; 8]);
        assert_eq!(envelope.data(4, 5), Err(EFAULT));
        assert_eq!(envelope.data(NULL, 0), Err(EFAULT));
        assert_eq!(envelope.data(usize::MAX - 1, 2), Err(EFAULT));
        envelope.data_mut(6, 2).unwrap().copy_from_slice(b"ok");
        assert_eq!(&envelope.data[6..], b"ok");
    }
}
