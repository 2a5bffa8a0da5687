// SPDX-License-Identifier: Apache-2.0

use super::{AddrInfo, Resolver};
use crate::net;

use portcullis::guest::{resolve, Cross};
use portcullis::item::resolve::Hints;
use portcullis::Result;

use core::ffi::c_int;
use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{trace, warn};

/// Resolver asking the host's `getaddrinfo` and `getnameinfo`.
pub struct HostResolver {
    cross: Arc<dyn Cross>,
}

impl HostResolver {
    pub fn new(cross: Arc<dyn Cross>) -> Self {
        Self { cross }
    }
}

impl Resolver for HostResolver {
    fn name(&self) -> &str {
        "host"
    }

    fn getaddrinfo(
        &self,
        node: Option<&str>,
        service: Option<&str>,
        hints: &Hints,
    ) -> Result<Vec<AddrInfo>> {
        let records = resolve::getaddrinfo(self.cross.as_ref(), node, service, Some(hints))?;
        trace!(?node, ?service, count = records.len(), "host resolved");

        // Families other than IP cannot be expressed as a `SocketAddr` and are skipped.
        Ok(records
            .iter()
            .filter_map(|record| match net::from_raw(record.addr()) {
                Ok(addr) => Some(AddrInfo {
                    family: record.family,
                    socktype: record.socktype,
                    protocol: record.protocol,
                    addr,
                }),
                Err(e) => {
                    warn!(family = record.family, error = e, "dropping host record");
                    None
                }
            })
            .collect())
    }

    fn getnameinfo(&self, addr: &SocketAddr, flags: c_int) -> Result<(String, String)> {
        resolve::getnameinfo(self.cross.as_ref(), &net::to_raw(addr), flags)
    }
}
