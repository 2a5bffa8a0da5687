// SPDX-License-Identifier: Apache-2.0

use super::{Alloc, Cross, Direction};
use crate::item::{self, Envelope, Kind};
use crate::Result;

use core::mem;

use tracing::{trace, warn};

/// Life cycle state of a [`Call`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Idle,
    ArgsPrepared,
    InFlight,
    Completed,
    Drained,
}

#[derive(Debug)]
enum Stage {
    Idle,
    ArgsPrepared(Envelope),
    InFlight,
    Completed(Envelope),
    Drained,
}

impl Stage {
    fn state(&self) -> State {
        match self {
            Stage::Idle => State::Idle,
            Stage::ArgsPrepared(_) => State::ArgsPrepared,
            Stage::InFlight => State::InFlight,
            Stage::Completed(_) => State::Completed,
            Stage::Drained => State::Drained,
        }
    }
}

/// One in-flight cross-boundary call.
///
/// Transitions must happen in order; calling a method in the wrong state is a bug in trusted
/// code and panics.
#[derive(Debug)]
pub struct Call {
    stage: Stage,
}

impl Call {
    #[inline]
    pub const fn new() -> Self {
        Self { stage: Stage::Idle }
    }

    #[inline]
    pub fn state(&self) -> State {
        self.stage.state()
    }

    /// `Idle → ArgsPrepared`: builds the envelope from the arguments and the data section
    /// laid out in `alloc`.
    pub fn prepare(&mut self, kind: Kind, num: usize, argv: [usize; 6], alloc: Alloc) {
        match self.stage {
            Stage::Idle => {
                self.stage = Stage::ArgsPrepared(Envelope::new(kind, num, argv, alloc.finish()))
            }
            ref stage => panic!("call prepared in state {:?}", stage.state()),
        }
    }

    /// `ArgsPrepared → InFlight → Completed`: crosses the boundary and waits for the result.
    ///
    /// A transport failure drains the call without a result.
    pub fn sally(&mut self, cross: &dyn Cross, direction: Direction) -> Result<()> {
        let mut envelope = match mem::replace(&mut self.stage, Stage::InFlight) {
            Stage::ArgsPrepared(envelope) => envelope,
            stage => panic!("call crossed in state {:?}", stage.state()),
        };

        trace!(
            ?direction,
            kind = envelope.payload.kind,
            num = envelope.payload.num,
            "crossing"
        );
        match cross.cross(direction, &mut envelope) {
            Ok(()) => {
                self.stage = Stage::Completed(envelope);
                Ok(())
            }
            Err(e) => {
                warn!(?direction, errno = e, "boundary crossing failed");
                self.stage = Stage::Drained;
                Err(e)
            }
        }
    }

    /// `Completed → Drained`: hands the results to the caller.
    pub fn collect(&mut self) -> Reply {
        match mem::replace(&mut self.stage, Stage::Drained) {
            Stage::Completed(envelope) => Reply {
                ret: envelope.payload.result(),
                data: envelope.data,
            },
            stage => panic!("call collected in state {:?}", stage.state()),
        }
    }

    /// Runs a whole call from preparation to collection.
    ///
    /// The outer error reports a transport failure, the reply carries the callee's result.
    pub fn execute(
        cross: &dyn Cross,
        direction: Direction,
        kind: Kind,
        num: usize,
        argv: [usize; 6],
        alloc: Alloc,
    ) -> Result<Reply> {
        let mut call = Self::new();
        call.prepare(kind, num, argv, alloc);
        call.sally(cross, direction)?;
        Ok(call.collect())
    }
}

impl Default for Call {
    fn default() -> Self {
        Self::new()
    }
}

/// Results of a completed call.
#[derive(Debug, PartialEq, Eq)]
pub struct Reply {
    ret: Result<usize>,
    data: Box<[u8]>,
}

impl Reply {
    /// Returns the callee's return value or error code.
    #[inline]
    pub fn ret(&self) -> Result<usize> {
        self.ret
    }

    /// Returns `len` bytes of the data section at `offset`.
    #[inline]
    pub fn data(&self, offset: usize, len: usize) -> Result<&[u8]> {
        item::slice(&self.data, offset, len)
    }
}
