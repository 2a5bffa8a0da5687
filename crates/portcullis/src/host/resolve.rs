// SPDX-License-Identifier: Apache-2.0

use super::socket::sockaddr;
use super::{deref_str, Dispatcher};
use crate::item::resolve::{Hints, Number, Record, ADDR_SIZE, HINTS_SIZE};
use crate::item::{self, Kind};
use crate::{Result, NULL};

use core::ffi::{c_char, c_int, CStr};
use core::mem::zeroed;
use core::ptr::{addr_of, null, null_mut};

use libc::{addrinfo, EFAULT};

pub(super) fn register(dispatcher: &mut Dispatcher) {
    dispatcher.insert(Kind::Resolve, Number::GetAddrInfo as _, getaddrinfo);
    dispatcher.insert(Kind::Resolve, Number::GetNameInfo as _, getnameinfo);
}

fn optional_str(data: &[u8], offset: usize) -> Result<Option<&CStr>> {
    match offset {
        NULL => Ok(None),
        offset => deref_str(data, offset).map(Some),
    }
}

fn getaddrinfo(argv: &[usize; 6], data: &mut [u8]) -> Result<usize> {
    let capacity = argv[4];
    let out_len = capacity.checked_mul(Record::SIZE).ok_or(EFAULT)?;
    item::slice(data, argv[3], out_len)?;

    let node = optional_str(data, argv[0])?.map(|s| s.to_owned());
    let service = optional_str(data, argv[1])?.map(|s| s.to_owned());
    let hints = match argv[2] {
        NULL => None,
        offset => {
            let hints = Hints::from_bytes(item::slice(data, offset, HINTS_SIZE)?).ok_or(EFAULT)?;
            // SAFETY: all-zero is a valid `addrinfo`.
            let mut ai: addrinfo = unsafe { zeroed() };
            ai.ai_flags = hints.flags;
            ai.ai_family = hints.family;
            ai.ai_socktype = hints.socktype;
            ai.ai_protocol = hints.protocol;
            Some(ai)
        }
    };

    let mut res: *mut addrinfo = null_mut();
    let rc = unsafe {
        libc::getaddrinfo(
            node.as_ref().map_or(null(), |s| s.as_ptr()),
            service.as_ref().map_or(null(), |s| s.as_ptr()),
            hints.as_ref().map_or(null(), |ai| ai as *const addrinfo),
            &mut res,
        )
    };
    if rc != 0 {
        return Err(rc);
    }

    let out = item::slice_mut(data, argv[3], out_len)?;
    let mut count = 0;
    let mut cur = res;
    while !cur.is_null() && count < capacity {
        // SAFETY: `cur` is an element of the list returned by `getaddrinfo`.
        let ai = unsafe { &*cur };
        let mut record = Record {
            family: ai.ai_family,
            socktype: ai.ai_socktype,
            protocol: ai.ai_protocol,
            addrlen: ai.ai_addrlen as _,
            addr: [0; ADDR_SIZE],
        };
        if !ai.ai_addr.is_null() {
            let len = (ai.ai_addrlen as usize).min(ADDR_SIZE);
            // SAFETY: `ai_addr` points to `ai_addrlen` bytes.
            let addr = unsafe { core::slice::from_raw_parts(ai.ai_addr.cast::<u8>(), len) };
            record.addr[..len].copy_from_slice(addr);
        }
        out[count * Record::SIZE..][..Record::SIZE].copy_from_slice(&record.to_bytes());
        count += 1;
        cur = ai.ai_next;
    }
    unsafe { libc::freeaddrinfo(res) };
    Ok(count)
}

fn getnameinfo(argv: &[usize; 6], data: &mut [u8]) -> Result<usize> {
    let (addr, len) = sockaddr(item::slice(data, argv[0], argv[1])?)?;
    let (hostlen, servlen) = (argv[3], argv[4]);
    let out = item::slice_mut(data, argv[2], hostlen.checked_add(servlen).ok_or(EFAULT)?)?;
    let (host, serv) = out.split_at_mut(hostlen);

    let rc = unsafe {
        libc::getnameinfo(
            addr_of!(addr).cast(),
            len,
            host.as_mut_ptr().cast::<c_char>(),
            hostlen as _,
            serv.as_mut_ptr().cast::<c_char>(),
            servlen as _,
            argv[5] as c_int,
        )
    };
    match rc {
        0 => Ok(0),
        rc => Err(rc),
    }
}
