// SPDX-License-Identifier: Apache-2.0

use super::{AddrInfo, Resolver};

use portcullis::item::resolve::Hints;
use portcullis::Result;

use core::ffi::c_int;
use std::net::{IpAddr, SocketAddr};

use libc::{
    AF_INET, AF_INET6, AF_UNSPEC, AI_NUMERICHOST, EAI_FAMILY, EAI_NONAME, EAI_SERVICE,
    IPPROTO_TCP, IPPROTO_UDP, NI_NAMEREQD, NI_NUMERICHOST, SOCK_DGRAM, SOCK_STREAM,
};
use spin::RwLock;

/// In-enclave name table, akin to `/etc/hosts`.
///
/// Only numeric services are understood.
#[derive(Default)]
pub struct StaticResolver {
    entries: RwLock<Vec<(String, IpAddr)>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `name` resolving to `addr`. Names are matched case-insensitively in insertion order.
    pub fn insert(&self, name: &str, addr: IpAddr) {
        self.entries.write().push((name.to_ascii_lowercase(), addr));
    }

    fn lookup(&self, node: &str, numeric: bool) -> Vec<IpAddr> {
        if let Ok(ip) = node.parse::<IpAddr>() {
            return vec![ip];
        }
        if numeric {
            return Vec::new();
        }
        let node = node.to_ascii_lowercase();
        self.entries
            .read()
            .iter()
            .filter(|(name, _)| *name == node)
            .map(|(_, addr)| *addr)
            .collect()
    }
}

fn family_of(ip: &IpAddr) -> c_int {
    match ip {
        IpAddr::V4(_) => AF_INET,
        IpAddr::V6(_) => AF_INET6,
    }
}

fn port(service: Option<&str>) -> Result<u16> {
    match service {
        None => Ok(0),
        Some(service) => service.parse().map_err(|_| EAI_SERVICE),
    }
}

/// Socket types reported for each address when the hints leave the type open.
fn socktypes(hints: &Hints) -> Vec<(c_int, c_int)> {
    match hints.socktype {
        0 => vec![(SOCK_STREAM, IPPROTO_TCP), (SOCK_DGRAM, IPPROTO_UDP)],
        SOCK_STREAM => vec![(SOCK_STREAM, IPPROTO_TCP)],
        SOCK_DGRAM => vec![(SOCK_DGRAM, IPPROTO_UDP)],
        typ => vec![(typ, hints.protocol)],
    }
}

impl Resolver for StaticResolver {
    fn name(&self) -> &str {
        "static"
    }

    fn getaddrinfo(
        &self,
        node: Option<&str>,
        service: Option<&str>,
        hints: &Hints,
    ) -> Result<Vec<AddrInfo>> {
        if ![AF_UNSPEC, AF_INET, AF_INET6].contains(&hints.family) {
            return Err(EAI_FAMILY);
        }
        let port = port(service)?;
        let node = node.ok_or(EAI_NONAME)?;

        let entries: Vec<_> = self
            .lookup(node, hints.flags & AI_NUMERICHOST != 0)
            .into_iter()
            .filter(|ip| hints.family == AF_UNSPEC || family_of(ip) == hints.family)
            .flat_map(|ip| {
                socktypes(hints)
                    .into_iter()
                    .map(move |(socktype, protocol)| AddrInfo {
                        family: family_of(&ip),
                        socktype,
                        protocol,
                        addr: SocketAddr::new(ip, port),
                    })
            })
            .collect();

        if entries.is_empty() {
            return Err(EAI_NONAME);
        }
        Ok(entries)
    }

    fn getnameinfo(&self, addr: &SocketAddr, flags: c_int) -> Result<(String, String)> {
        let service = addr.port().to_string();
        if flags & NI_NUMERICHOST == 0 {
            let entries = self.entries.read();
            if let Some((name, _)) = entries.iter().find(|(_, ip)| *ip == addr.ip()) {
                return Ok((name.clone(), service));
            }
        }
        if flags & NI_NAMEREQD != 0 {
            return Err(EAI_NONAME);
        }
        Ok((addr.ip().to_string(), service))
    }
}
