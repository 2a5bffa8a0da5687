// SPDX-License-Identifier: Apache-2.0

//! Name resolution through a chain of prioritized resolvers.
//!
//! Lookups are offered to the registered resolvers in ascending slot order. The first
//! resolver to succeed answers the lookup, so a resolver in a lower slot shadows the names
//! of those behind it. Failures are `EAI_*` codes.

mod host;
mod hosts;

pub use host::HostResolver;
pub use hosts::StaticResolver;

use portcullis::item::resolve::Hints;
use portcullis::Result;

use core::ffi::c_int;
use std::net::SocketAddr;
use std::sync::Arc;

use libc::{EAI_NONAME, EEXIST, EINVAL};
use spin::RwLock;
use tracing::{debug, trace};

/// Number of resolver slots.
pub const MAX_RESOLVERS: usize = 3;

/// One resolved address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddrInfo {
    pub family: c_int,
    pub socktype: c_int,
    pub protocol: c_int,
    pub addr: SocketAddr,
}

/// The answer to a lookup, remembering the slot of the resolver that produced it.
#[derive(Debug, PartialEq, Eq)]
pub struct AddrInfoList {
    slot: usize,
    entries: Vec<AddrInfo>,
}

impl AddrInfoList {
    /// Returns the slot of the resolver that answered the lookup.
    #[inline]
    pub fn slot(&self) -> usize {
        self.slot
    }

    #[inline]
    pub fn entries(&self) -> &[AddrInfo] {
        &self.entries
    }
}

/// A name service.
pub trait Resolver: Send + Sync {
    fn name(&self) -> &str;

    fn getaddrinfo(
        &self,
        node: Option<&str>,
        service: Option<&str>,
        hints: &Hints,
    ) -> Result<Vec<AddrInfo>>;

    fn getnameinfo(&self, addr: &SocketAddr, flags: c_int) -> Result<(String, String)>;

    /// Takes back a list this resolver produced.
    fn freeaddrinfo(&self, entries: Vec<AddrInfo>) {
        drop(entries)
    }
}

/// Resolvers in priority order.
#[derive(Default)]
pub struct ResolverChain {
    slots: RwLock<[Option<Arc<dyn Resolver>>; MAX_RESOLVERS]>,
}

impl ResolverChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `resolver` in `slot`.
    ///
    /// Fails with [`EINVAL`] for slots past [`MAX_RESOLVERS`] and with [`EEXIST`] if the slot
    /// is taken.
    pub fn register(&self, slot: usize, resolver: Arc<dyn Resolver>) -> Result<()> {
        let mut slots = self.slots.write();
        let entry = slots.get_mut(slot).ok_or(EINVAL)?;
        if entry.is_some() {
            return Err(EEXIST);
        }
        debug!(slot, resolver = resolver.name(), "registering resolver");
        *entry = Some(resolver);
        Ok(())
    }

    /// Registers `resolver` in the first free slot, returning the slot.
    pub fn push(&self, resolver: Arc<dyn Resolver>) -> Result<usize> {
        let mut slots = self.slots.write();
        let slot = slots.iter().position(Option::is_none).ok_or(EINVAL)?;
        debug!(slot, resolver = resolver.name(), "registering resolver");
        slots[slot] = Some(resolver);
        Ok(slot)
    }

    fn resolvers(&self) -> Vec<(usize, Arc<dyn Resolver>)> {
        self.slots
            .read()
            .iter()
            .enumerate()
            .filter_map(|(slot, resolver)| resolver.clone().map(|r| (slot, r)))
            .collect()
    }

    /// Runs `f` on the resolvers until one succeeds, returning its slot and answer.
    ///
    /// Fails with the error of the last resolver, or [`EAI_NONAME`] with no resolvers.
    fn first<T>(&self, mut f: impl FnMut(&dyn Resolver) -> Result<T>) -> Result<(usize, T)> {
        let mut error = EAI_NONAME;
        for (slot, resolver) in self.resolvers() {
            match f(resolver.as_ref()) {
                Ok(answer) => return Ok((slot, answer)),
                Err(e) => {
                    trace!(slot, resolver = resolver.name(), error = e, "resolver failed");
                    error = e;
                }
            }
        }
        Err(error)
    }

    pub fn getaddrinfo(
        &self,
        node: Option<&str>,
        service: Option<&str>,
        hints: &Hints,
    ) -> Result<AddrInfoList> {
        let (slot, entries) = self.first(|r| r.getaddrinfo(node, service, hints))?;
        Ok(AddrInfoList { slot, entries })
    }

    pub fn getnameinfo(&self, addr: &SocketAddr, flags: c_int) -> Result<(String, String)> {
        self.first(|r| r.getnameinfo(addr, flags))
            .map(|(_, names)| names)
    }

    /// Hands `list` back to the resolver that produced it.
    pub fn freeaddrinfo(&self, list: AddrInfoList) {
        let resolver = self.slots.read().get(list.slot).cloned().flatten();
        match resolver {
            Some(resolver) => resolver.freeaddrinfo(list.entries),
            None => drop(list),
        }
    }
}
