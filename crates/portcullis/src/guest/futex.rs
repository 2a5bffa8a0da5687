// SPDX-License-Identifier: Apache-2.0

use super::{Alloc, Call, Direction, Thread};
use crate::item::futex::{encode_timespec, Number};
use crate::item::Kind;
use crate::{Result, NULL};

use core::ffi::{c_int, c_long};
use core::sync::atomic::AtomicU32;

use libc::{timespec, ESRCH};
use tracing::instrument;

/// Issues a futex operation, serviced by the host the calling thread is bound to.
///
/// The futex words must live in memory the host can address. `timeout` is copied, `None`
/// waits forever while a zero timeout returns at once.
///
/// Fails without crossing with [`ESRCH`] if the calling thread is not
/// [bound](Thread::bind) and with [`ENOMEM`](libc::ENOMEM) if the arguments cannot be
/// allocated.
#[instrument(level = "trace", skip(uaddr, timeout, uaddr2))]
pub fn futex(
    uaddr: &AtomicU32,
    op: c_int,
    val: u32,
    timeout: Option<&timespec>,
    uaddr2: Option<&AtomicU32>,
    val3: u32,
) -> Result<c_long> {
    let thread = Thread::current().ok_or(ESRCH)?;

    let mut alloc = Alloc::new();
    let timeout = match timeout {
        Some(ts) => alloc.input(&encode_timespec(ts))?,
        None => NULL,
    };
    let argv = [
        uaddr.as_ptr() as _,
        op as _,
        val as _,
        timeout,
        uaddr2.map_or(NULL, |addr| addr.as_ptr() as _),
        val3 as _,
    ];
    let reply = Call::execute(
        thread.cross(),
        Direction::Ocall,
        Kind::Futex,
        Number::Futex as _,
        argv,
        alloc,
    )?;
    reply.ret().map(|ret| ret as _)
}
