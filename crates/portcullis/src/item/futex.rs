// SPDX-License-Identifier: Apache-2.0

//! Futex call definitions
//!
//! * `FUTEX`: `[uaddr, op, val, data[timeout] | NULL, uaddr2 | NULL, val3]`
//!
//! `uaddr` and `uaddr2` are addresses of futex words, which must live in memory shared by both
//! sides. The timeout is never shared, it is copied into the data section as
//! [`TIMESPEC_SIZE`] bytes: `tv_sec` followed by `tv_nsec`, both as native endian `i64`.
//! A [`NULL`](crate::NULL) offset means "no timeout", which is different from a zero timeout.

use libc::timespec;

super::numbers! {
    /// Futex operation number.
    pub enum Number {
        Futex = 0x01,
    }
}

/// Size of an encoded timeout.
pub const TIMESPEC_SIZE: usize = 16;

/// Encodes a timeout for the data section.
#[inline]
pub fn encode_timespec(ts: &timespec) -> [u8; TIMESPEC_SIZE] {
    let mut buf = [0u8; TIMESPEC_SIZE];
    buf[..8].copy_from_slice(&i64::from(ts.tv_sec).to_ne_bytes());
    buf[8..].copy_from_slice(&i64::from(ts.tv_nsec).to_ne_bytes());
    buf
}

/// Decodes a timeout from the data section.
#[inline]
pub fn decode_timespec(buf: &[u8]) -> Option<timespec> {
    let sec: [u8; 8] = buf.get(..8)?.try_into().ok()?;
    let nsec: [u8; 8] = buf.get(8..TIMESPEC_SIZE)?.try_into().ok()?;
    Some(timespec {
        tv_sec: i64::from_ne_bytes(sec) as _,
        tv_nsec: i64::from_ne_bytes(nsec) as _,
    })
}
