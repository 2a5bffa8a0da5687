// SPDX-License-Identifier: Apache-2.0

//! Conversion between [`SocketAddr`] and raw `sockaddr` bytes.

use portcullis::Result;

use core::ffi::c_int;
use core::mem::size_of;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use libc::{sa_family_t, sockaddr_in, sockaddr_in6, AF_INET, AF_INET6, EAFNOSUPPORT, EINVAL};

const FAMILY: usize = size_of::<sa_family_t>();

/// Encodes `addr` as a `sockaddr_in` or `sockaddr_in6`.
pub fn to_raw(addr: &SocketAddr) -> Vec<u8> {
    match addr {
        SocketAddr::V4(addr) => {
            let mut buf = vec![0u8; size_of::<sockaddr_in>()];
            buf[..FAMILY].copy_from_slice(&(AF_INET as sa_family_t).to_ne_bytes());
            buf[2..4].copy_from_slice(&addr.port().to_be_bytes());
            buf[4..8].copy_from_slice(&addr.ip().octets());
            buf
        }
        SocketAddr::V6(addr) => {
            let mut buf = vec![0u8; size_of::<sockaddr_in6>()];
            buf[..FAMILY].copy_from_slice(&(AF_INET6 as sa_family_t).to_ne_bytes());
            buf[2..4].copy_from_slice(&addr.port().to_be_bytes());
            buf[4..8].copy_from_slice(&addr.flowinfo().to_ne_bytes());
            buf[8..24].copy_from_slice(&addr.ip().octets());
            buf[24..28].copy_from_slice(&addr.scope_id().to_ne_bytes());
            buf
        }
    }
}

/// Decodes a `sockaddr_in` or `sockaddr_in6`.
///
/// Fails with [`EINVAL`] if `buf` is too short for its family and with [`EAFNOSUPPORT`] for
/// other families.
pub fn from_raw(buf: &[u8]) -> Result<SocketAddr> {
    let family = buf.get(..FAMILY).ok_or(EINVAL)?;
    match c_int::from(sa_family_t::from_ne_bytes([family[0], family[1]])) {
        AF_INET => {
            let buf = buf.get(..size_of::<sockaddr_in>()).ok_or(EINVAL)?;
            let port = u16::from_be_bytes([buf[2], buf[3]]);
            let ip = Ipv4Addr::new(buf[4], buf[5], buf[6], buf[7]);
            Ok(SocketAddrV4::new(ip, port).into())
        }
        AF_INET6 => {
            let buf = buf.get(..size_of::<sockaddr_in6>()).ok_or(EINVAL)?;
            let port = u16::from_be_bytes([buf[2], buf[3]]);
            let flowinfo = u32::from_ne_bytes([buf[4], buf[5], buf[6], buf[7]]);
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&buf[8..24]);
            let scope_id = u32::from_ne_bytes([buf[24], buf[25], buf[26], buf[27]]);
            Ok(SocketAddrV6::new(Ipv6Addr::from(octets), port, flowinfo, scope_id).into())
        }
        _ => Err(EAFNOSUPPORT),
    }
}

/// Returns the address family of `addr`.
#[inline]
pub fn family(addr: &SocketAddr) -> c_int {
    match addr {
        SocketAddr::V4(_) => AF_INET,
        SocketAddr::V6(_) => AF_INET6,
    }
}
