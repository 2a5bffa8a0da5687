// SPDX-License-Identifier: Apache-2.0

//! Host name resolution calls.
//!
//! Failures of the host resolver are its `EAI_*` codes, which are negative and so never clash
//! with the positive errno values reported for local or transport failures.

use super::{Alloc, Call, Cross, Direction};
use crate::item::resolve::{Hints, Number, Record};
use crate::item::Kind;
use crate::{Result, NULL};

use core::ffi::{c_int, CStr};

use libc::EIO;

/// Maximum number of records returned by a single [`getaddrinfo`].
pub const MAX_RECORDS: usize = 16;

/// Capacity of the host name buffer of [`getnameinfo`].
pub const NI_MAXHOST: usize = 1025;

/// Capacity of the service name buffer of [`getnameinfo`].
pub const NI_MAXSERV: usize = 32;

fn optional_str(alloc: &mut Alloc, s: Option<&str>) -> Result<usize> {
    s.map_or(Ok(NULL), |s| alloc.input_str(s))
}

pub fn getaddrinfo(
    cross: &dyn Cross,
    node: Option<&str>,
    service: Option<&str>,
    hints: Option<&Hints>,
) -> Result<Vec<Record>> {
    let mut alloc = Alloc::new();
    let node = optional_str(&mut alloc, node)?;
    let service = optional_str(&mut alloc, service)?;
    let hints = hints.map_or(Ok(NULL), |hints| alloc.input(&hints.to_bytes()))?;
    let out = alloc.output(MAX_RECORDS * Record::SIZE)?;

    let argv = [node, service, hints, out, MAX_RECORDS, 0];
    let reply = Call::execute(
        cross,
        Direction::Ocall,
        Kind::Resolve,
        Number::GetAddrInfo as _,
        argv,
        alloc,
    )?;

    let count = reply.ret()?;
    if count > MAX_RECORDS {
        return Err(EIO);
    }
    reply
        .data(out, count * Record::SIZE)?
        .chunks_exact(Record::SIZE)
        .map(|chunk| Record::from_bytes(chunk).ok_or(EIO))
        .collect()
}

/// Translates a raw socket address into a host and a service name.
pub fn getnameinfo(cross: &dyn Cross, addr: &[u8], flags: c_int) -> Result<(String, String)> {
    let mut alloc = Alloc::new();
    let addr_offset = alloc.input(addr)?;
    let out = alloc.output(NI_MAXHOST + NI_MAXSERV)?;

    let argv = [addr_offset, addr.len(), out, NI_MAXHOST, NI_MAXSERV, flags as _];
    let reply = Call::execute(
        cross,
        Direction::Ocall,
        Kind::Resolve,
        Number::GetNameInfo as _,
        argv,
        alloc,
    )?;
    reply.ret()?;

    let host = reply.data(out, NI_MAXHOST)?;
    let serv = reply.data(out + NI_MAXHOST, NI_MAXSERV)?;
    let name = |buf: &[u8]| -> Result<String> {
        let s = CStr::from_bytes_until_nul(buf).map_err(|_| EIO)?;
        Ok(s.to_string_lossy().into_owned())
    };
    Ok((name(host)?, name(serv)?))
}
