// SPDX-License-Identifier: Apache-2.0

use super::{check, Dispatcher};
use crate::item::futex::{decode_timespec, Number, TIMESPEC_SIZE};
use crate::item::{self, Kind};
use crate::{Result, NULL};

use core::ffi::c_int;
use core::ptr::{null, null_mut};

use libc::{timespec, EFAULT, SYS_futex};

pub(super) fn register(dispatcher: &mut Dispatcher) {
    dispatcher.insert(Kind::Futex, Number::Futex as _, futex);
}

/// Issues the real futex syscall.
///
/// The futex words are addressed directly, they live in memory shared with the caller.
fn futex(argv: &[usize; 6], data: &mut [u8]) -> Result<usize> {
    let timeout = match argv[3] {
        NULL => None,
        offset => {
            let ts = item::slice(data, offset, TIMESPEC_SIZE)?;
            Some(decode_timespec(ts).ok_or(EFAULT)?)
        }
    };
    let timeout = timeout.as_ref().map_or(null(), |ts| ts as *const timespec);
    let uaddr2 = match argv[4] {
        NULL => null_mut(),
        addr => addr as *mut u32,
    };

    check(unsafe {
        libc::syscall(
            SYS_futex,
            argv[0] as *mut u32,
            argv[1] as c_int,
            argv[2] as u32,
            timeout,
            uaddr2,
            argv[5] as u32,
        )
    })
}
