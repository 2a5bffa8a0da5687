// SPDX-License-Identifier: Apache-2.0

//! Marshaling shared by the buffer-moving calls of several kinds.

use super::{Alloc, Call, Cross, Direction, Reply};
use crate::item::Kind;
use crate::{Result, MAX_DATA_SIZE};

use core::ffi::c_int;

use libc::EIO;

/// Executes an ocall whose arguments are all numbers.
#[inline]
pub(super) fn plain(cross: &dyn Cross, kind: Kind, num: usize, argv: [usize; 6]) -> Result<usize> {
    Call::execute(cross, Direction::Ocall, kind, num, argv, Alloc::new())?.ret()
}

/// Executes an ocall with a single input buffer at `argv[1]`.
///
/// `argv[2]` is overwritten with the length of `bytes`.
pub(super) fn input(
    cross: &dyn Cross,
    kind: Kind,
    num: usize,
    bytes: &[u8],
    mut argv: [usize; 6],
) -> Result<Reply> {
    let mut alloc = Alloc::new();
    argv[1] = alloc.input(bytes)?;
    argv[2] = bytes.len();
    Call::execute(cross, Direction::Ocall, kind, num, argv, alloc)
}

/// `READ`-like call: `[fd, data[buf], count, flags]`.
///
/// At most [`MAX_DATA_SIZE`] bytes are requested. A host claiming to have read more than was
/// requested is refused with [`EIO`].
pub(super) fn read(
    cross: &dyn Cross,
    kind: Kind,
    num: usize,
    fd: c_int,
    buf: &mut [u8],
    flags: c_int,
) -> Result<usize> {
    let count = buf.len().min(MAX_DATA_SIZE);
    let mut alloc = Alloc::new();
    let offset = alloc.output(count)?;
    let argv = [fd as _, offset, count, flags as _, 0, 0];
    let reply = Call::execute(cross, Direction::Ocall, kind, num, argv, alloc)?;

    let ret = reply.ret()?;
    if ret > count {
        return Err(EIO);
    }
    buf[..ret].copy_from_slice(reply.data(offset, ret)?);
    Ok(ret)
}

/// `WRITE`-like call: `[fd, data[buf], count, flags]`.
pub(super) fn write(
    cross: &dyn Cross,
    kind: Kind,
    num: usize,
    fd: c_int,
    buf: &[u8],
    flags: c_int,
) -> Result<usize> {
    let buf = &buf[..buf.len().min(MAX_DATA_SIZE)];
    let reply = input(cross, kind, num, buf, [fd as _, 0, 0, flags as _, 0, 0])?;

    let ret = reply.ret()?;
    if ret > buf.len() {
        return Err(EIO);
    }
    Ok(ret)
}
