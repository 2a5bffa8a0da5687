// SPDX-License-Identifier: Apache-2.0

//! Guest entrypoint into the call boundary.
//!
//! Every call goes through the same life cycle, tracked by [`Call`]:
//!
//! ## Prepare
//! The arguments are laid out in a fresh data section by an [`Alloc`]: inputs are copied in,
//! outputs are zeroed. Once the envelope is built ([`State::ArgsPrepared`]) nothing else is
//! allocated for the call.
//!
//! ## Cross
//! The envelope is handed to the [`Cross`] primitive ([`State::InFlight`]). Crossing is
//! synchronous from the caller's perspective and has no cancellation path.
//!
//! ## Collect
//! The other side has written `ret` and `errno` ([`State::Completed`]). The caller copies
//! outputs out of the data section, checking every length the other side returned, and
//! releases the envelope ([`State::Drained`]).
//!
//! The functions in [`socket`], [`file`], [`resolve`] and [`futex`](fn@futex) wrap this life
//! cycle for the host services, akin to their `libc` counterparts.

mod alloc;
mod call;
pub mod file;
mod futex;
mod io;
pub mod resolve;
pub mod socket;
mod thread;

pub use alloc::Alloc;
pub use call::{Call, Reply, State};
pub use futex::futex;
pub use thread::{Bound, Thread};

use crate::item::Envelope;
use crate::Result;

/// Direction of a crossing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// From the enclave out to the host.
    Ocall,
    /// From the host into the enclave.
    Ecall,
}

/// The boundary-crossing primitive.
///
/// Implementations transfer control to the other side, which executes the request in
/// `envelope` and writes the results back into it before `cross` returns. An error means the
/// transport itself failed: the envelope contents must then be treated as garbage.
pub trait Cross: Send + Sync {
    fn cross(&self, direction: Direction, envelope: &mut Envelope) -> Result<()>;
}
