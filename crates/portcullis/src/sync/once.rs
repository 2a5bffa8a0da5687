// SPDX-License-Identifier: Apache-2.0

use crate::Result;

use std::panic::{self, AssertUnwindSafe};

use libc::EINVAL;

/// One-shot initialization flag on top of [`spin::Once`].
///
/// The stored value records whether the initializer returned. A panicking initializer
/// therefore leaves the inner `Once` complete, and later callers see the failure instead of
/// spinning forever.
#[derive(Debug, Default)]
pub struct Once {
    inner: spin::Once<bool>,
}

impl Once {
    /// Creates a new, uninitialized flag.
    #[inline]
    pub const fn new() -> Self {
        Self {
            inner: spin::Once::new(),
        }
    }

    /// Runs `init` if and only if no other call on this flag has done so.
    ///
    /// When this returns `Ok(())`, the initializer has completed and all its effects are
    /// visible to the caller. A panic of the initializer is resumed on the winning caller,
    /// this and all later calls then return [`EINVAL`].
    pub fn call_once<F: FnOnce()>(&self, init: F) -> Result<()> {
        let mut panicked = None;
        let returned = *self.inner.call_once(|| {
            panic::catch_unwind(AssertUnwindSafe(init))
                .map_err(|payload| panicked = Some(payload))
                .is_ok()
        });
        if let Some(payload) = panicked {
            panic::resume_unwind(payload);
        }
        match returned {
            true => Ok(()),
            false => Err(EINVAL),
        }
    }

    /// Returns `true` once the initializer has returned.
    #[inline]
    pub fn is_completed(&self) -> bool {
        self.inner.get() == Some(&true)
    }

    /// Returns `true` if the initializer panicked.
    #[inline]
    pub fn is_poisoned(&self) -> bool {
        self.inner.get() == Some(&false)
    }
}
