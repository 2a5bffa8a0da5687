// SPDX-License-Identifier: Apache-2.0

use super::Dispatcher;
use crate::guest::{Cross, Direction};
use crate::item::Envelope;
use crate::Result;

use std::sync::Arc;

use tracing::trace;

/// In-process [`Cross`] implementation.
///
/// Ocalls are handed straight to the host dispatcher, ecalls to the enclave-side dispatcher.
/// The envelope never leaves the address space, which makes the loopback suitable for running
/// the whole call boundary without isolation hardware.
#[derive(Clone)]
pub struct Loopback {
    ocalls: Arc<Dispatcher>,
    ecalls: Arc<Dispatcher>,
}

impl Loopback {
    pub fn new(ocalls: Arc<Dispatcher>, ecalls: Arc<Dispatcher>) -> Self {
        Self { ocalls, ecalls }
    }

    /// Creates a loopback serving ocalls with [`Dispatcher::host`] and no ecalls yet.
    pub fn host() -> Self {
        Self::new(Arc::new(Dispatcher::host()), Arc::new(Dispatcher::new()))
    }

    #[inline]
    pub fn ocalls(&self) -> &Arc<Dispatcher> {
        &self.ocalls
    }

    #[inline]
    pub fn ecalls(&self) -> &Arc<Dispatcher> {
        &self.ecalls
    }
}

impl Cross for Loopback {
    fn cross(&self, direction: Direction, envelope: &mut Envelope) -> Result<()> {
        trace!(?direction, "loopback crossing");
        let dispatcher = match direction {
            Direction::Ocall => &self.ocalls,
            Direction::Ecall => &self.ecalls,
        };
        dispatcher.dispatch(Some(envelope))
    }
}
