// SPDX-License-Identifier: Apache-2.0

//! API for the enclave-host call boundary
//!
//! `portcullis` is a protocol crate for proxying service requests (file and socket I/O, futex
//! waits, name resolution) from code running inside an enclave to the untrusted host, and for
//! the host to call back into the enclave. Like the gate it is named after, every request
//! passes through one narrow, guarded opening.
//!
//! # Mechanism of action
//!
//! A request is marshaled into an [envelope](item::Envelope): a fixed-layout
//! [payload](item::Payload) followed by a data section owned by the envelope. Both sides treat
//! the envelope as mutually distrusted memory. Once the envelope is prepared, the caller hands
//! it to the opaque boundary-crossing primitive ([`Cross`](guest::Cross)) and blocks until the
//! other side has executed the request and written the results back.
//!
//! # Payload format
//!
//! * `kind`: `usize` - the [call kind](item::Kind)
//! * `num`: `usize` - the operation number within the kind
//! * `argv`: `[usize; 6]` - the arguments
//! * `ret`: `usize` - the return value
//! * `errno`: `c_int` - the error code of the callee at the time of return, `0` on success
//!
//! The argument values may contain numeric values. Buffers are never passed by pointer,
//! instead they are placed in the data section and referenced by their offset from the start of
//! the data section. An absent optional argument is encoded as [`NULL`].
//!
//! The one exception are futex words: they must live in memory both sides can address, so
//! their address is passed verbatim.
//!
//! # Dispatch
//!
//! The receiving side looks the `(kind, num)` pair up in a [`Dispatcher`](host::Dispatcher).
//! An unknown pair is refused with [`ENOSYS`](libc::ENOSYS) without touching the envelope.
//!
//! High-frequency callers may use [switchless calls](switchless), where a standing worker polls
//! a shared queue instead of paying for a crossing per request.

#![deny(clippy::all)]
#![warn(rust_2018_idioms)]

pub mod guest;
pub mod host;
pub mod item;
pub mod switchless;
pub mod sync;

use core::ffi::c_int;

/// Error type used within this crate.
pub type Error = c_int;

/// Result type returned by functionality exposed by this crate.
pub type Result<T> = core::result::Result<T, Error>;

/// Internal representation of a null pointer or [`Option::None`] value in an envelope.
pub const NULL: usize = usize::MAX;

/// Maximum size of the data section of a single envelope.
///
/// Reads and writes larger than this are split by the caller or result in a short count.
pub const MAX_DATA_SIZE: usize = 64 * 1024;
