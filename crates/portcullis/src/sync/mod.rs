// SPDX-License-Identifier: Apache-2.0

//! Synchronization primitives usable where no thread parking facility is trusted.
//!
//! Everything in here spins. Blocking waits that need the host's scheduler go through the
//! [futex bridge](crate::guest::futex) instead.

mod once;
mod queue;
mod spin;

pub use self::once::Once;
pub use self::queue::{Node, SpinQueue};
pub use self::spin::{SpinLock, SpinLockGuard};
