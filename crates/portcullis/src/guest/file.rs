// SPDX-License-Identifier: Apache-2.0

//! Host file calls.

use super::{io, Alloc, Call, Cross, Direction};
use crate::item::file::Number;
use crate::item::Kind;
use crate::Result;

use core::ffi::c_int;

use libc::{mode_t, off_t};

fn path(cross: &dyn Cross, num: Number, path: &str, mut argv: [usize; 6]) -> Result<usize> {
    let mut alloc = Alloc::new();
    argv[0] = alloc.input_str(path)?;
    Call::execute(cross, Direction::Ocall, Kind::File, num as _, argv, alloc)?.ret()
}

pub fn open(cross: &dyn Cross, pathname: &str, flags: c_int, mode: mode_t) -> Result<c_int> {
    path(cross, Number::Open, pathname, [0, flags as _, mode as _, 0, 0, 0]).map(|fd| fd as _)
}

pub fn close(cross: &dyn Cross, fd: c_int) -> Result<()> {
    io::plain(cross, Kind::File, Number::Close as _, [fd as _, 0, 0, 0, 0, 0]).map(|_| ())
}

pub fn read(cross: &dyn Cross, fd: c_int, buf: &mut [u8]) -> Result<usize> {
    io::read(cross, Kind::File, Number::Read as _, fd, buf, 0)
}

pub fn write(cross: &dyn Cross, fd: c_int, buf: &[u8]) -> Result<usize> {
    io::write(cross, Kind::File, Number::Write as _, fd, buf, 0)
}

/// Repositions the file offset, returning the new offset.
pub fn lseek(cross: &dyn Cross, fd: c_int, offset: off_t, whence: c_int) -> Result<off_t> {
    let argv = [fd as _, offset as _, whence as _, 0, 0, 0];
    io::plain(cross, Kind::File, Number::Lseek as _, argv).map(|off| off as _)
}

pub fn unlink(cross: &dyn Cross, pathname: &str) -> Result<()> {
    path(cross, Number::Unlink, pathname, [0; 6]).map(|_| ())
}

/// Returns the size of the file open as `fd`.
pub fn size(cross: &dyn Cross, fd: c_int) -> Result<u64> {
    io::plain(cross, Kind::File, Number::Size as _, [fd as _, 0, 0, 0, 0, 0]).map(|size| size as _)
}
