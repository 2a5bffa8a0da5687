// SPDX-License-Identifier: Apache-2.0

//! Host-specific functionality.
//!
//! The receiving side of a crossing looks up the handler of the envelope's `(kind, num)` pair
//! in a [`Dispatcher`] and runs it against the arguments and the data section. The same
//! dispatcher type serves the enclave-side table of ecalls.

mod file;
mod futex;
mod loopback;
mod resolve;
mod socket;

pub use loopback::Loopback;

use crate::item::{self, Envelope, Kind};
use crate::{Error, Result};

use core::ffi::CStr;
use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;

use libc::{EEXIST, EFAULT, EINVAL, EIO, ENOSYS};
use spin::RwLock;
use tracing::{debug, trace, warn};

/// Handler of one `(kind, num)` pair.
///
/// Called with the argument vector and the data section of the envelope, returns the value
/// for `ret` or the error code for `errno`.
pub type Handler = Arc<dyn Fn(&[usize; 6], &mut [u8]) -> Result<usize> + Send + Sync>;

type Builtin = fn(&[usize; 6], &mut [u8]) -> Result<usize>;

/// Table of handlers keyed by `(kind, num)`.
#[derive(Default)]
pub struct Dispatcher {
    handlers: RwLock<BTreeMap<(usize, usize), Handler>>,
}

impl Dispatcher {
    /// Creates an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a dispatcher serving the host services: sockets, files, futexes and name
    /// resolution, backed by the host's `libc`.
    pub fn host() -> Self {
        let mut dispatcher = Self::new();
        socket::register(&mut dispatcher);
        file::register(&mut dispatcher);
        futex::register(&mut dispatcher);
        resolve::register(&mut dispatcher);
        dispatcher
    }

    fn insert(&mut self, kind: Kind, num: usize, handler: Builtin) {
        self.handlers
            .get_mut()
            .insert((kind as _, num), Arc::new(handler));
    }

    /// Registers `handler` for `(kind, num)`, failing with [`EEXIST`] if the pair is taken.
    pub fn register(&self, kind: Kind, num: usize, handler: Handler) -> Result<()> {
        let mut handlers = self.handlers.write();
        if handlers.contains_key(&(kind as _, num)) {
            warn!(?kind, num, "handler already registered");
            return Err(EEXIST);
        }
        debug!(?kind, num, "registering handler");
        handlers.insert((kind as _, num), handler);
        Ok(())
    }

    /// Registers a closure as handler, see [`register`](Self::register).
    #[inline]
    pub fn register_fn<F>(&self, kind: Kind, num: usize, f: F) -> Result<()>
    where
        F: Fn(&[usize; 6], &mut [u8]) -> Result<usize> + Send + Sync + 'static,
    {
        self.register(kind, num, Arc::new(f))
    }

    /// Returns whether a handler is registered for `(kind, num)`.
    pub fn contains(&self, kind: usize, num: usize) -> bool {
        self.handlers.read().contains_key(&(kind, num))
    }

    /// Executes the call in `envelope`.
    ///
    /// A missing envelope fails with [`EINVAL`]. An unknown `(kind, num)` pair fails with
    /// [`ENOSYS`] and leaves the envelope untouched. Otherwise the handler's outcome is
    /// recorded in the payload and `Ok` is returned, whatever the outcome.
    pub fn dispatch(&self, envelope: Option<&mut Envelope>) -> Result<()> {
        let envelope = envelope.ok_or(EINVAL)?;
        let (kind, num) = (envelope.payload.kind, envelope.payload.num);

        // The lock is not held while the handler runs, it may block.
        let handler = self.handlers.read().get(&(kind, num)).cloned();
        let handler = match handler {
            Some(handler) => handler,
            None => {
                warn!(kind, num, "no handler for call");
                return Err(ENOSYS);
            }
        };

        let argv = envelope.payload.argv;
        let res = handler(&argv, &mut envelope.data);
        trace!(kind, num, ?argv, ?res, "dispatched");
        envelope.payload.complete(res);
        Ok(())
    }
}

/// Returns the calling thread's current host `errno`.
#[inline]
pub(crate) fn errno() -> Error {
    io::Error::last_os_error().raw_os_error().unwrap_or(EIO)
}

/// Converts a `-1`-on-failure return value of a host function.
#[inline]
pub(crate) fn check<T: TryInto<usize>>(ret: T) -> Result<usize> {
    ret.try_into().map_err(|_| errno())
}

/// Returns the NUL terminated string at `offset` in `data`.
#[inline]
pub(crate) fn deref_str(data: &[u8], offset: usize) -> Result<&CStr> {
    let tail = item::slice(data, offset, data.len().saturating_sub(offset))?;
    CStr::from_bytes_until_nul(tail).map_err(|_| EFAULT)
}
