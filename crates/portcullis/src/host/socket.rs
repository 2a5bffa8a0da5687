// SPDX-License-Identifier: Apache-2.0

use super::{check, Dispatcher};
use crate::item::socket::Number;
use crate::item::{self, Kind};
use crate::{Result, NULL};

use core::ffi::c_int;
use core::mem::{size_of, zeroed};
use core::ptr::{addr_of, addr_of_mut};

use libc::{sockaddr, sockaddr_storage, socklen_t, EINVAL};

pub(super) fn register(dispatcher: &mut Dispatcher) {
    dispatcher.insert(Kind::Socket, Number::None as _, |_, _| Ok(0));
    dispatcher.insert(Kind::Socket, Number::Socket as _, socket);
    dispatcher.insert(Kind::Socket, Number::Close as _, close);
    dispatcher.insert(Kind::Socket, Number::Read as _, read);
    dispatcher.insert(Kind::Socket, Number::Write as _, write);
    dispatcher.insert(Kind::Socket, Number::Recv as _, recv);
    dispatcher.insert(Kind::Socket, Number::Send as _, send);
    dispatcher.insert(Kind::Socket, Number::Connect as _, connect);
    dispatcher.insert(Kind::Socket, Number::Bind as _, bind);
    dispatcher.insert(Kind::Socket, Number::Listen as _, listen);
    dispatcher.insert(Kind::Socket, Number::Accept as _, accept);
    dispatcher.insert(Kind::Socket, Number::Shutdown as _, shutdown);
}

/// Copies raw address bytes into properly aligned storage.
pub(super) fn sockaddr(bytes: &[u8]) -> Result<(sockaddr_storage, socklen_t)> {
    if bytes.len() > size_of::<sockaddr_storage>() {
        return Err(EINVAL);
    }
    // SAFETY: all-zero is a valid `sockaddr_storage`.
    let mut storage: sockaddr_storage = unsafe { zeroed() };
    // SAFETY: the length was checked against the size of `storage` above.
    unsafe {
        core::ptr::copy_nonoverlapping(
            bytes.as_ptr(),
            addr_of_mut!(storage).cast::<u8>(),
            bytes.len(),
        )
    };
    Ok((storage, bytes.len() as _))
}

fn socket(argv: &[usize; 6], _: &mut [u8]) -> Result<usize> {
    check(unsafe { libc::socket(argv[0] as _, argv[1] as _, argv[2] as _) })
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

fn recv(argv: &[usize; 6], data: &mut [u8]) -> Result<usize> {
    let buf = item::slice_mut(data, argv[1], argv[2])?;
    check(unsafe {
        libc::recv(
            argv[0] as _,
            buf.as_mut_ptr().cast(),
            buf.len(),
            argv[3] as c_int,
        )
    })
}

fn send(argv: &[usize; 6], data: &mut [u8]) -> Result<usize> {
    let buf = item::slice(data, argv[1], argv[2])?;
    check(unsafe { libc::send(argv[0] as _, buf.as_ptr().cast(), buf.len(), argv[3] as c_int) })
}

fn connect(argv: &[usize; 6], data: &mut [u8]) -> Result<usize> {
    let (addr, len) = sockaddr(item::slice(data, argv[1], argv[2])?)?;
    check(unsafe { libc::connect(argv[0] as _, addr_of!(addr).cast(), len) })
}

fn bind(argv: &[usize; 6], data: &mut [u8]) -> Result<usize> {
    let (addr, len) = sockaddr(item::slice(data, argv[1], argv[2])?)?;
    check(unsafe { libc::bind(argv[0] as _, addr_of!(addr).cast(), len) })
}

fn listen(argv: &[usize; 6], _: &mut [u8]) -> Result<usize> {
    check(unsafe { libc::listen(argv[0] as _, argv[1] as _) })
}

fn accept(argv: &[usize; 6], data: &mut [u8]) -> Result<usize> {
    let capacity = item::slice(data, argv[2], size_of::<u32>())?;
    let capacity = u32::from_ne_bytes([capacity[0], capacity[1], capacity[2], capacity[3]]);
    if argv[1] != NULL {
        item::slice(data, argv[1], capacity as _)?;
    }

    // SAFETY: all-zero is a valid `sockaddr_storage`.
    let mut storage: sockaddr_storage = unsafe { zeroed() };
    let mut len = size_of::<sockaddr_storage>() as socklen_t;
    let fd = check(unsafe {
        libc::accept(
            argv[0] as _,
            addr_of_mut!(storage).cast::<sockaddr>(),
            &mut len,
        )
    })?;

    if argv[1] != NULL {
        let copied = (len as usize)
            .min(capacity as _)
            .min(size_of::<sockaddr_storage>());
        // SAFETY: `storage` is plain old data of at least `copied` bytes.
        let bytes =
            unsafe { core::slice::from_raw_parts(addr_of!(storage).cast::<u8>(), copied) };
        item::slice_mut(data, argv[1], copied)?.copy_from_slice(bytes);
    }
    item::slice_mut(data, argv[2], size_of::<u32>())?.copy_from_slice(&len.to_ne_bytes());
    Ok(fd)
}

fn shutdown(argv: &[usize; 6], _: &mut [u8]) -> Result<usize> {
    check(unsafe { libc::shutdown(argv[0] as _, argv[1] as _) })
}
