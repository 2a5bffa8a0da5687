// SPDX-License-Identifier: Apache-2.0

//! Host socket calls.
//!
//! Addresses are raw `sockaddr` bytes, descriptors are host descriptors.

use super::{io, Alloc, Call, Cross, Direction};
use crate::item::socket::Number;
use crate::item::Kind;
use crate::{Result, NULL};

use core::ffi::c_int;
use core::mem::size_of;

use libc::EIO;

#[inline]
fn plain(cross: &dyn Cross, num: Number, argv: [usize; 6]) -> Result<usize> {
    io::plain(cross, Kind::Socket, num as _, argv)
}

fn address(cross: &dyn Cross, num: Number, fd: c_int, addr: &[u8]) -> Result<()> {
    io::input(cross, Kind::Socket, num as _, addr, [fd as _, 0, 0, 0, 0, 0])?.ret()?;
    Ok(())
}

pub fn socket(cross: &dyn Cross, domain: c_int, typ: c_int, protocol: c_int) -> Result<c_int> {
    let argv = [domain as _, typ as _, protocol as _, 0, 0, 0];
    plain(cross, Number::Socket, argv).map(|fd| fd as _)
}

pub fn close(cross: &dyn Cross, fd: c_int) -> Result<()> {
    plain(cross, Number::Close, [fd as _, 0, 0, 0, 0, 0]).map(|_| ())
}

pub fn read(cross: &dyn Cross, fd: c_int, buf: &mut [u8]) -> Result<usize> {
    io::read(cross, Kind::Socket, Number::Read as _, fd, buf, 0)
}

pub fn write(cross: &dyn Cross, fd: c_int, buf: &[u8]) -> Result<usize> {
    io::write(cross, Kind::Socket, Number::Write as _, fd, buf, 0)
}

pub fn recv(cross: &dyn Cross, fd: c_int, buf: &mut [u8], flags: c_int) -> Result<usize> {
    io::read(cross, Kind::Socket, Number::Recv as _, fd, buf, flags)
}

pub fn send(cross: &dyn Cross, fd: c_int, buf: &[u8], flags: c_int) -> Result<usize> {
    io::write(cross, Kind::Socket, Number::Send as _, fd, buf, flags)
}

pub fn connect(cross: &dyn Cross, fd: c_int, addr: &[u8]) -> Result<()> {
    address(cross, Number::Connect, fd, addr)
}

pub fn bind(cross: &dyn Cross, fd: c_int, addr: &[u8]) -> Result<()> {
    address(cross, Number::Bind, fd, addr)
}

pub fn listen(cross: &dyn Cross, fd: c_int, backlog: c_int) -> Result<()> {
    plain(cross, Number::Listen, [fd as _, backlog as _, 0, 0, 0, 0]).map(|_| ())
}

/// Accepts a connection, writing the peer address into `addr` when given.
///
/// Returns the new descriptor and the full length of the peer address, which may exceed the
/// length of `addr` if the address was truncated.
pub fn accept(cross: &dyn Cross, fd: c_int, addr: Option<&mut [u8]>) -> Result<(c_int, usize)> {
    let capacity = addr.as_ref().map_or(0, |addr| addr.len());
    let capacity_bytes = u32::try_from(capacity).map_err(|_| libc::EINVAL)?.to_ne_bytes();

    let mut alloc = Alloc::new();
    let addr_offset = match addr {
        Some(_) => alloc.output(capacity)?,
        None => NULL,
    };
    let len_offset = alloc.input(&capacity_bytes)?;
    let argv = [fd as _, addr_offset, len_offset, 0, 0, 0];
    let reply = Call::execute(
        cross,
        Direction::Ocall,
        Kind::Socket,
        Number::Accept as _,
        argv,
        alloc,
    )?;

    let conn = reply.ret()?;
    let len = reply.data(len_offset, size_of::<u32>())?;
    let len = u32::from_ne_bytes([len[0], len[1], len[2], len[3]]) as usize;
    if let Some(addr) = addr {
        let copied = len.min(capacity);
        addr[..copied].copy_from_slice(reply.data(addr_offset, copied)?);
    }
    let conn = c_int::try_from(conn).map_err(|_| EIO)?;
    Ok((conn, len))
}

pub fn shutdown(cross: &dyn Cross, fd: c_int, how: c_int) -> Result<()> {
    plain(cross, Number::Shutdown, [fd as _, how as _, 0, 0, 0, 0]).map(|_| ())
}
