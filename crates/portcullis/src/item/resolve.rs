// SPDX-License-Identifier: Apache-2.0

//! Name resolution call definitions
//!
//! * `GETADDRINFO`: `[data[node] | NULL, data[service] | NULL, data[hints] | NULL, data[out],
//!   capacity]`, `node` and `service` are NUL terminated, `hints` is [`HINTS_SIZE`] bytes and
//!   `out` has room for `capacity` [records](Record). Returns the number of records written.
//! * `GETNAMEINFO`: `[data[addr], addrlen, data[out], hostlen, servlen, flags]`, `out` holds
//!   `hostlen` bytes for the host name followed by `servlen` bytes for the service name, both
//!   NUL terminated on return.
//!
//! Failures are reported with the resolver's `EAI_*` code in the `errno` field.

use core::ffi::c_int;
use core::mem::size_of;

super::numbers! {
    /// Name resolution operation number.
    pub enum Number {
        GetAddrInfo = 0x01,
        GetNameInfo = 0x02,
    }
}

/// Size of the address buffer of a [`Record`], large enough for a `sockaddr_in6`.
pub const ADDR_SIZE: usize = 32;

/// Size of encoded [`Hints`].
pub const HINTS_SIZE: usize = 4 * size_of::<i32>();

/// Hints restricting the results of a lookup, mirroring the input fields of `addrinfo`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Hints {
    pub flags: c_int,
    pub family: c_int,
    pub socktype: c_int,
    pub protocol: c_int,
}

impl Hints {
    /// Encodes the hints for the data section.
    pub fn to_bytes(&self) -> [u8; HINTS_SIZE] {
        let mut buf = [0u8; HINTS_SIZE];
        for (chunk, value) in buf
            .chunks_exact_mut(4)
            .zip([self.flags, self.family, self.socktype, self.protocol])
        {
            chunk.copy_from_slice(&value.to_ne_bytes());
        }
        buf
    }

    /// Decodes hints from the data section.
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        let mut fields = buf
            .get(..HINTS_SIZE)?
            .chunks_exact(4)
            .map(|c| c_int::from_ne_bytes([c[0], c[1], c[2], c[3]]));
        Some(Self {
            flags: fields.next()?,
            family: fields.next()?,
            socktype: fields.next()?,
            protocol: fields.next()?,
        })
    }
}

/// One resolved address as written by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct Record {
    pub family: i32,
    pub socktype: i32,
    pub protocol: i32,
    pub addrlen: u32,
    pub addr: [u8; ADDR_SIZE],
}

impl Record {
    /// Size of an encoded record.
    pub const SIZE: usize = size_of::<Self>();

    /// Returns the meaningful part of the address buffer.
    #[inline]
    pub fn addr(&self) -> &[u8] {
        &self.addr[..(self.addrlen as usize).min(ADDR_SIZE)]
    }

    /// Encodes the record for the data section.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.family.to_ne_bytes());
        buf[4..8].copy_from_slice(&self.socktype.to_ne_bytes());
        buf[8..12].copy_from_slice(&self.protocol.to_ne_bytes());
        buf[12..16].copy_from_slice(&self.addrlen.to_ne_bytes());
        buf[16..].copy_from_slice(&self.addr);
        buf
    }

    /// Decodes a record from the data section.
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        let buf = buf.get(..Self::SIZE)?;
        let word = |i: usize| [buf[i], buf[i + 1], buf[i + 2], buf[i + 3]];
        Some(Self {
            family: i32::from_ne_bytes(word(0)),
            socktype: i32::from_ne_bytes(word(4)),
            protocol: i32::from_ne_bytes(word(8)),
            addrlen: u32::from_ne_bytes(word(12)),
            addr: buf[16..].try_into().ok()?,
        })
    }
}
