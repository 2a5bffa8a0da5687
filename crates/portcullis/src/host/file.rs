// SPDX-License-Identifier: Apache-2.0

use super::{check, deref_str, Dispatcher};
use crate::item::file::Number;
use crate::item::{self, Kind};
use crate::Result;

use core::ffi::{c_int, c_uint};
use core::mem::zeroed;

use libc::off_t;

pub(super) fn register(dispatcher: &mut Dispatcher) {
    dispatcher.insert(Kind::File, Number::Open as _, open);
    dispatcher.insert(Kind::File, Number::Close as _, close);
    dispatcher.insert(Kind::File, Number::Read as _, read);
    dispatcher.insert(Kind::File, Number::Write as _, write);
    dispatcher.insert(Kind::File, Number::Lseek as _, lseek);
    dispatcher.insert(Kind::File, Number::Unlink as _, unlink);
    dispatcher.insert(Kind::File, Number::Size as _, size);
}

fn open(argv: &[usize; 6], data: &mut [u8]) -> Result<usize> {
    let path = deref_str(data, argv[0])?;
    check(unsafe { libc::open(path.as_ptr(), argv[1] as c_int, argv[2] as c_uint) })
}

fn close(argv: &[usize; 6], _: &mut [u8]) -> Result<usize> {
    check(unsafe { libc::close(argv[0] as _) })
}

fn read(argv: &[usize; 6], data: &mut [u8]) -> Result<usize> {
    let buf = item::slice_mut(data, argv[1], argv[2])?;
    check(unsafe { libc::read(argv[0] as _, buf.as_mut_ptr().cast(), buf.len()) })
}

fn write(argv: &[usize; 6], data: &mut [u8]) -> Result<usize> {
    let buf = item::slice(data, argv[1], argv[2])?;
    check(unsafe { libc::write(argv[0] as _, buf.as_ptr().cast(), buf.len()) })
}

fn lseek(argv: &[usize; 6], _: &mut [u8]) -> Result<usize> {
    check(unsafe { libc::lseek(argv[0] as _, argv[1] as off_t, argv[2] as c_int) })
}

fn unlink(argv: &[usize; 6], data: &mut [u8]) -> Result<usize> {
    let path = deref_str(data, argv[0])?;
    check(unsafe { libc::unlink(path.as_ptr()) })
}

fn size(argv: &[usize; 6], _: &mut [u8]) -> Result<usize> {
    // SAFETY: all-zero is a valid `stat`.
    let mut st: libc::stat = unsafe { zeroed() };
    check(unsafe { libc::fstat(argv[0] as _, &mut st) })?;
    Ok(st.st_size as _)
}
