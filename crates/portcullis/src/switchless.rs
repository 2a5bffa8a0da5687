// SPDX-License-Identifier: Apache-2.0

//! Switchless calls.
//!
//! A [`SwitchlessContext`] is shared by the callers and a set of standing [`Worker`]s. Callers
//! queue their envelope and spin until a worker has dispatched it, so that no crossing is
//! needed per call.
//!
//! Shutdown is a two flag handshake: [`SwitchlessContext::shutdown`] raises
//! `shutdown_initiated`, which every worker checks on each iteration. The last worker to stop
//! cancels whatever is still queued and raises `shutdown_complete`, exactly once. Calls made
//! after shutdown was initiated fail with [`ESHUTDOWN`].

use crate::guest::{Cross, Direction};
use crate::host::Dispatcher;
use crate::item::Envelope;
use crate::sync::{Node, SpinLock, SpinQueue};
use crate::Result;

use core::hint::spin_loop;
use core::mem;
use core::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use libc::{EAGAIN, ESHUTDOWN};
use tracing::{debug, instrument, trace, warn};

const PENDING: u8 = 0;
const RUNNING: u8 = 1;
const DONE: u8 = 2;
const CANCELLED: u8 = 3;

struct Slot {
    state: AtomicU8,
    envelope: SpinLock<Envelope>,
    result: SpinLock<Result<()>>,
}

/// State shared between switchless callers and workers.
pub struct SwitchlessContext {
    dispatcher: Arc<Dispatcher>,
    queue: SpinQueue<Arc<Slot>>,
    running: AtomicUsize,
    shutdown_initiated: AtomicBool,
    shutdown_complete: AtomicBool,
}

impl SwitchlessContext {
    /// Creates a context whose workers execute calls with `dispatcher`.
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            queue: SpinQueue::new(),
            running: AtomicUsize::new(0),
            shutdown_initiated: AtomicBool::new(false),
            shutdown_complete: AtomicBool::new(false),
        }
    }

    /// Spawns `count` worker threads polling `ctx`.
    ///
    /// Fails with [`ESHUTDOWN`] once shutdown was initiated and with the host error, or
    /// [`EAGAIN`], if a thread cannot be spawned.
    pub fn spawn_workers(ctx: &Arc<Self>, count: usize) -> Result<Vec<JoinHandle<()>>> {
        let mut handles = Vec::with_capacity(count);
        for i in 0..count {
            if ctx.is_shutdown_initiated() {
                return Err(ESHUTDOWN);
            }
            ctx.running.fetch_add(1, Ordering::AcqRel);
            let worker = Worker { ctx: ctx.clone() };
            let spawned = thread::Builder::new()
                .name(format!("switchless-{i}"))
                .spawn(move || worker.run());
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    ctx.running.fetch_sub(1, Ordering::AcqRel);
                    warn!(error = %e, "failed to spawn switchless worker");
                    return Err(e.raw_os_error().unwrap_or(EAGAIN));
                }
            }
        }
        debug!(count, "spawned switchless workers");
        Ok(handles)
    }

    #[inline]
    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_shutdown_complete(&self) -> bool {
        self.shutdown_complete.load(Ordering::Acquire)
    }

    /// Returns the number of workers currently polling.
    #[inline]
    pub fn workers(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }

    /// Executes the call in `envelope` on a worker and waits for it to complete.
    ///
    /// Without running workers the call is dispatched on the calling thread.
    #[instrument(
        level = "trace",
        skip_all,
        fields(kind = envelope.payload.kind, num = envelope.payload.num)
    )]
    pub fn call(&self, envelope: &mut Envelope) -> Result<()> {
        if self.is_shutdown_initiated() {
            return Err(ESHUTDOWN);
        }
        if self.workers() == 0 {
            return self.dispatcher.dispatch(Some(envelope));
        }

        let slot = Arc::new(Slot {
            state: AtomicU8::new(PENDING),
            envelope: SpinLock::new(mem::take(envelope)),
            result: SpinLock::new(Ok(())),
        });
        self.queue.push_back(Node::new(slot.clone()));

        loop {
            match slot.state.load(Ordering::Acquire) {
                DONE => break,
                CANCELLED => {
                    *envelope = mem::take(&mut *slot.envelope.lock());
                    return Err(ESHUTDOWN);
                }
                PENDING if self.is_shutdown_complete() => {
                    // No worker is left to pick the slot up.
                    if slot
                        .state
                        .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        *envelope = mem::take(&mut *slot.envelope.lock());
                        return Err(ESHUTDOWN);
                    }
                }
                _ => {
                    spin_loop();
                    thread::yield_now();
                }
            }
        }

        let result = *slot.result.lock();
        *envelope = mem::take(&mut *slot.envelope.lock());
        result
    }

    /// Initiates shutdown and waits until the last worker has stopped.
    pub fn shutdown(&self) {
        if !self.shutdown_initiated.swap(true, Ordering::AcqRel) {
            debug!(workers = self.workers(), "initiating switchless shutdown");
        }
        if self.workers() == 0 {
            self.complete();
        }
        while !self.is_shutdown_complete() {
            spin_loop();
            thread::yield_now();
        }
    }

    fn execute(&self, slot: &Slot) {
        if slot
            .state
            .compare_exchange(PENDING, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let result = self.dispatcher.dispatch(Some(&mut slot.envelope.lock()));
        trace!(?result, "switchless call executed");
        *slot.result.lock() = result;
        slot.state.store(DONE, Ordering::Release);
    }

    fn complete(&self) {
        while let Some(node) = self.queue.pop_front() {
            let slot = node.into_inner();
            let _ = slot.state.compare_exchange(
                PENDING,
                CANCELLED,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
        if self
            .shutdown_complete
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            debug!("switchless shutdown complete");
        }
    }
}

impl Cross for SwitchlessContext {
    /// Only ocalls are switchless, ecalls are refused with [`EINVAL`](libc::EINVAL).
    fn cross(&self, direction: Direction, envelope: &mut Envelope) -> Result<()> {
        match direction {
            Direction::Ocall => self.call(envelope),
            Direction::Ecall => Err(libc::EINVAL),
        }
    }
}

/// A standing poller of a [`SwitchlessContext`].
pub struct Worker {
    ctx: Arc<SwitchlessContext>,
}

impl Worker {
    /// Polls the queue until shutdown is initiated.
    pub fn run(self) {
        while !self.ctx.is_shutdown_initiated() {
            match self.ctx.queue.pop_front() {
                Some(node) => self.ctx.execute(&node.into_inner()),
                None => {
                    spin_loop();
                    thread::yield_now();
                }
            }
        }

        if self.ctx.running.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.ctx.complete();
        }
    }
}
